//! Integration tests for token renewal through the full pipeline
//!
//! Covers the expiry-skew round trip, single-flight broadcast, and the
//! terminal refresh failure path.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use steward_client::testing::MockTransport;
use steward_client::{
    ApiError, AuthError, AuthTokens, MemoryTokenStore, MockClock, PipelineConfig, RefreshConfig,
    RequestPipeline, RequestSpec, RetryPolicy, TokenRefresher, TokenStore,
};

const BASE: &str = "https://api.test/v1";
const TOKEN_URL: &str = "https://auth.test/oauth/token";
const USERS_URL: &str = "https://api.test/v1/users";

fn login_store(expires_at_secs: i64) -> Arc<MemoryTokenStore> {
    let expires_at = Utc.timestamp_opt(expires_at_secs, 0).single().expect("valid timestamp");
    Arc::new(MemoryTokenStore::with_tokens(AuthTokens::new("t-login", "rt-login", expires_at)))
}

fn pipeline(
    transport: Arc<MockTransport>,
    store: Arc<MemoryTokenStore>,
    clock: MockClock,
) -> RequestPipeline<MockClock> {
    RequestPipeline::builder()
        .transport(transport)
        .token_store(store)
        .config(PipelineConfig {
            base_url: BASE.to_string(),
            request_timeout: Duration::from_millis(500),
            retry: RetryPolicy { base_delay: Duration::from_millis(1), jitter: false, ..RetryPolicy::default() },
        })
        .refresh_config(RefreshConfig { token_url: TOKEN_URL.to_string(), ..RefreshConfig::default() })
        .clock(clock)
        .build()
        .expect("valid pipeline")
}

fn renewal_body(access: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access,
        "refresh_token": "rt-renewed",
        "expires_in": 900,
    })
}

/// Login issues tokens valid for 900s. A request at t=500s is well inside
/// the token's lifetime and must not renew; a request at t=870s is inside
/// the 30s skew and must renew exactly once, then succeed.
#[tokio::test]
async fn test_expiry_skew_round_trip() {
    let clock = MockClock::new();
    let store = login_store(900);
    let transport = Arc::new(MockTransport::new());
    transport.respond(USERS_URL, 200, serde_json::json!({"items": []}));
    transport.respond(TOKEN_URL, 200, renewal_body("t-renewed"));
    let p = pipeline(transport.clone(), store.clone(), clock.clone());

    // t = 500s: plenty of lifetime left.
    clock.set_elapsed(Duration::from_secs(500));
    p.request(RequestSpec::get("/users")).await.expect("request succeeds");
    assert_eq!(transport.calls(TOKEN_URL), 0, "no renewal outside the skew");

    // t = 870s: 30s of lifetime left triggers exactly one renewal.
    clock.set_elapsed(Duration::from_secs(870));
    p.request(RequestSpec::get("/users")).await.expect("request succeeds after renewal");
    assert_eq!(transport.calls(TOKEN_URL), 1);

    let renewed = store.get().expect("tokens stored");
    assert_eq!(renewed.access_token, "t-renewed");

    // The renewed request carried the fresh token.
    let last = transport.requests().into_iter().filter(|r| r.url == USERS_URL).next_back();
    assert_eq!(last.expect("data request").header("authorization"), Some("Bearer t-renewed"));
}

/// N concurrent requests discovering an expired token share one renewal
/// round-trip and every request completes against the renewed session.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_requests_share_one_renewal() {
    let clock = MockClock::new();
    clock.set_elapsed(Duration::from_secs(880));
    let store = login_store(900);
    let transport = Arc::new(MockTransport::with_latency(Duration::from_millis(15)));
    transport.respond(USERS_URL, 200, serde_json::json!({"items": []}));
    transport.respond(TOKEN_URL, 200, renewal_body("t-shared"));
    let p = Arc::new(pipeline(transport.clone(), store, clock));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let p = Arc::clone(&p);
        handles.push(tokio::spawn(async move { p.request(RequestSpec::get("/users")).await }));
    }
    for handle in handles {
        handle.await.expect("task").expect("request succeeds");
    }

    assert_eq!(transport.calls(TOKEN_URL), 1, "one renewal for all concurrent requests");
    assert_eq!(transport.calls(USERS_URL), 5);
}

/// A rejected refresh token is terminal: the store is cleared, every
/// waiter sees the same `AuthExpired`, and nothing is retried.
#[tokio::test]
async fn test_rejected_refresh_is_terminal_for_all_waiters() {
    let clock = MockClock::new();
    clock.set_elapsed(Duration::from_secs(880));
    let store = login_store(900);
    let transport = Arc::new(MockTransport::with_latency(Duration::from_millis(15)));
    transport.respond(TOKEN_URL, 401, serde_json::json!({"error": "invalid_grant"}));
    let p = Arc::new(pipeline(transport.clone(), store.clone(), clock));

    let (a, b) = tokio::join!(
        p.request(RequestSpec::get("/users")),
        p.request(RequestSpec::get("/users"))
    );

    assert!(matches!(a, Err(ApiError::AuthExpired)));
    assert!(matches!(b, Err(ApiError::AuthExpired)));
    assert!(store.get().is_none(), "terminal failure clears the session");
    assert_eq!(transport.calls(TOKEN_URL), 1);
    assert_eq!(transport.calls(USERS_URL), 0, "no data request goes out without a token");
}

/// Transient renewal failures surface as `AuthRefreshFailed`, distinct
/// from the terminal `AuthExpired`, so the UI can offer "try again".
#[tokio::test]
async fn test_transient_refresh_failure_is_distinguishable() {
    let clock = MockClock::new();
    clock.set_elapsed(Duration::from_secs(880));
    let store = login_store(900);
    let transport = Arc::new(MockTransport::new());
    transport.respond_error(
        TOKEN_URL,
        steward_client::TransportError::Timeout("deadline".to_string()),
    );
    let p = pipeline(transport.clone(), store.clone(), clock);

    let result = p.request(RequestSpec::get("/users")).await;
    assert!(matches!(result, Err(ApiError::AuthRefreshFailed(_))));
    assert!(store.get().is_some(), "session survives a transient failure");
}

/// The refresher alone: renewal goes straight through the transport and a
/// settled flight does not leak into the next renewal round.
#[tokio::test]
async fn test_refresher_rounds_are_independent() {
    let clock = MockClock::new();
    let store = login_store(900);
    let transport = Arc::new(MockTransport::new());
    transport.enqueue(TOKEN_URL, 200, renewal_body("round-1"));
    transport.enqueue(TOKEN_URL, 200, renewal_body("round-2"));
    let refresher = TokenRefresher::with_clock(
        store.clone(),
        transport.clone(),
        RefreshConfig { token_url: TOKEN_URL.to_string(), ..RefreshConfig::default() },
        clock,
    );

    let first = refresher.force_refresh().await.expect("first round");
    assert_eq!(first.access_token, "round-1");

    let second = refresher.force_refresh().await.expect("second round");
    assert_eq!(second.access_token, "round-2");
    assert_eq!(transport.calls(TOKEN_URL), 2);
    assert_eq!(store.get().expect("stored").access_token, "round-2");
}

/// Without any stored session the refresher reports `NotAuthenticated`
/// without touching the network.
#[tokio::test]
async fn test_no_session_never_calls_network() {
    let transport = Arc::new(MockTransport::new());
    let refresher = TokenRefresher::new(
        Arc::new(MemoryTokenStore::new()),
        transport.clone(),
        RefreshConfig { token_url: TOKEN_URL.to_string(), ..RefreshConfig::default() },
    );

    assert_eq!(refresher.ensure_valid().await, Err(AuthError::NotAuthenticated));
    assert!(transport.requests().is_empty());
}
