//! Production transport backed by reqwest
//!
//! Maps the core's wire types onto a shared `reqwest::Client`. No retry or
//! auth logic lives here; this adapter only performs the exchange and
//! classifies network-level failures.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{HttpRequest, HttpResponse, Method, Transport, TransportError};
use crate::error::ApiError;

/// Configuration for the reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Connect + exchange timeout applied by reqwest itself
    ///
    /// The pipeline enforces its own hard timeout on top of this one, so a
    /// hung connection can never stall breaker accounting.
    pub timeout: Duration,
    /// `User-Agent` header sent with every request
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("steward-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// [`Transport`] implementation over a pooled reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given configuration
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the underlying client cannot be built.
    pub fn new(config: HttpTransportConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self { client })
    }

    /// Create a transport with default configuration
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the underlying client cannot be built.
    pub fn with_defaults() -> Result<Self, ApiError> {
        Self::new(HttpTransportConfig::default())
    }

    fn map_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn map_error(err: reqwest::Error) -> TransportError {
        let detail = err.to_string();
        if err.is_timeout() {
            TransportError::Timeout(detail)
        } else if err.is_connect() {
            TransportError::ConnectionRefused(detail)
        } else {
            TransportError::Other(detail)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "transport exchange");

        let mut builder =
            self.client.request(Self::map_method(request.method), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(Self::map_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();

        // A drop mid-body means the request reached the server; classify as
        // a reset so the pipeline will not re-send non-idempotent requests.
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::ConnectionReset(e.to_string()))?
            .to_vec();

        Ok(HttpResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_exchange_returns_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let transport = HttpTransport::with_defaults().unwrap();
        let request = HttpRequest::new(Method::Get, format!("{}/ping", server.uri()));

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"pong");
    }

    #[tokio::test]
    async fn test_headers_and_json_body_are_forwarded() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/users"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let transport = HttpTransport::with_defaults().unwrap();
        let mut request = HttpRequest::new(Method::Post, format!("{}/users", server.uri()));
        request.headers.push(("Authorization".to_string(), "Bearer token-1".to_string()));
        request.body = Some(serde_json::json!({"name": "ada"}));

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_error_statuses_are_responses_not_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = HttpTransport::with_defaults().unwrap();
        let request = HttpRequest::new(Method::Get, format!("{}/broken", server.uri()));

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        // Port 1 is reserved and nothing listens on it.
        let transport = HttpTransport::with_defaults().unwrap();
        let request = HttpRequest::new(Method::Get, "http://127.0.0.1:1/unreachable");

        let result = transport.send(request).await;
        match result {
            Err(TransportError::ConnectionRefused(_) | TransportError::Other(_)) => {}
            other => panic!("expected network failure, got {other:?}"),
        }
    }
}
