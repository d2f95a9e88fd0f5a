//! Mock implementations of the core's capability traits
//!
//! [`MockTransport`] answers requests from a per-URL script: one-shot
//! queued outcomes are consumed first, then a repeating fallback. Every
//! request is recorded so tests can assert on call counts and headers.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

#[derive(Debug, Clone)]
enum Scripted {
    Reply(Result<HttpResponse, TransportError>),
    /// Never resolves; exercises hard-timeout paths
    Stall,
}

#[derive(Debug, Default)]
struct Route {
    queue: VecDeque<Scripted>,
    fallback: Option<Scripted>,
}

/// Scripted transport for tests
///
/// # Examples
///
/// ```
/// use steward_client::testing::MockTransport;
///
/// let transport = MockTransport::new();
/// transport.respond("https://api.test/v1/users", 200, serde_json::json!({"name": "ada"}));
/// transport.enqueue_error(
///     "https://api.test/v1/users",
///     steward_client::transport::TransportError::Timeout("deadline".to_string()),
/// );
/// // The queued timeout is served first, then the 200 repeats.
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Option<Duration>,
}

impl MockTransport {
    /// Create a transport with no scripted routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that delays every exchange
    ///
    /// Useful for holding a renewal flight open long enough for concurrent
    /// callers to join it.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency: Some(latency), ..Self::default() }
    }

    /// Set a repeating JSON response for a URL
    pub fn respond(&self, url: &str, status: u16, body: serde_json::Value) {
        self.set_fallback(url, Scripted::Reply(Ok(Self::json_response(status, &body))));
    }

    /// Set a repeating network failure for a URL
    pub fn respond_error(&self, url: &str, error: TransportError) {
        self.set_fallback(url, Scripted::Reply(Err(error)));
    }

    /// Make every unqueued exchange against a URL hang forever
    pub fn stall(&self, url: &str) {
        self.set_fallback(url, Scripted::Stall);
    }

    /// Queue a one-shot JSON response for a URL
    pub fn enqueue(&self, url: &str, status: u16, body: serde_json::Value) {
        self.push(url, Scripted::Reply(Ok(Self::json_response(status, &body))));
    }

    /// Queue a one-shot network failure for a URL
    pub fn enqueue_error(&self, url: &str, error: TransportError) {
        self.push(url, Scripted::Reply(Err(error)));
    }

    /// Queue a one-shot hang for a URL
    pub fn enqueue_stall(&self, url: &str) {
        self.push(url, Scripted::Stall);
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests made against a URL
    pub fn calls(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|request| request.url == url).count()
    }

    /// Build a JSON response the way the real backend would
    pub fn json_response(status: u16, body: &serde_json::Value) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(body).unwrap_or_default(),
        }
    }

    fn set_fallback(&self, url: &str, scripted: Scripted) {
        self.routes.lock().entry(url.to_string()).or_default().fallback = Some(scripted);
    }

    fn push(&self, url: &str, scripted: Scripted) {
        self.routes.lock().entry(url.to_string()).or_default().queue.push_back(scripted);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        self.requests.lock().push(request);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = {
            let mut routes = self.routes.lock();
            routes
                .get_mut(&url)
                .and_then(|route| route.queue.pop_front().or_else(|| route.fallback.clone()))
        };

        match scripted {
            Some(Scripted::Reply(outcome)) => outcome,
            Some(Scripted::Stall) => {
                futures::future::pending::<Result<HttpResponse, TransportError>>().await
            }
            None => Err(TransportError::Other(format!("no scripted response for {url}"))),
        }
    }
}
