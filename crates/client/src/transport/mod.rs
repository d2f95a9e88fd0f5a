//! Transport capability boundary
//!
//! The core never performs HTTP itself; it hands a fully built request to
//! a [`Transport`] and gets back either an HTTP response (any status) or a
//! network-level failure. Retry, auth, and breaker logic all live above
//! this boundary, which is what makes the pipeline testable with a
//! scripted transport.

mod http;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use http::{HttpTransport, HttpTransportConfig};

use crate::error::ApiError;

/// HTTP method of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET — safe, idempotent
    Get,
    /// POST — non-idempotent by default
    Post,
    /// PUT — idempotent by definition
    Put,
    /// PATCH — non-idempotent by default
    Patch,
    /// DELETE — idempotent by definition
    Delete,
}

impl Method {
    /// Canonical wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether requests with this method are safe to re-send by default
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::Get | Self::Put | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fully built outbound HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Request headers as name/value pairs
    pub headers: Vec<(String, String)>,
    /// Optional JSON body
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Create a request with no headers or body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: Vec::new(), body: None }
    }

    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// The response side of one HTTP exchange
///
/// Carries every status, including errors; only network-level failures are
/// reported through [`TransportError`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as name/value pairs
    pub headers: Vec<(String, String)>,
    /// Raw response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Body as lossy UTF-8, for error messages and logs
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Network-level failures, distinct from HTTP error statuses
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// TCP connection could not be established
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Host name could not be resolved
    #[error("dns resolution failed: {0}")]
    Dns(String),

    /// The exchange exceeded the transport's own timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The connection dropped after the request may have been sent
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// Any other network-level failure
    #[error("network failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether this failure is known to have occurred before the request
    /// could reach the server
    ///
    /// Connection resets may happen after the server started processing,
    /// so they are excluded; the pipeline uses this to decide whether a
    /// non-idempotent request is safe to re-send.
    pub fn before_send(&self) -> bool {
        matches!(self, Self::ConnectionRefused(_) | Self::Dns(_) | Self::Timeout(_))
    }
}

/// Capability the core requires to perform one HTTP exchange
///
/// Implementations must not retry, refresh tokens, or inspect statuses;
/// the pipeline owns all of that.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one HTTP exchange
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    //! Unit tests for transport types.
    use super::*;

    #[test]
    fn test_method_wire_names() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Post.as_str(), "POST");
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_method_idempotence_defaults() {
        assert!(Method::Get.is_idempotent());
        assert!(Method::Put.is_idempotent());
        assert!(Method::Delete.is_idempotent());
        assert!(!Method::Post.is_idempotent());
        assert!(!Method::Patch.is_idempotent());
    }

    #[test]
    fn test_request_header_lookup_is_case_insensitive() {
        let mut request = HttpRequest::new(Method::Get, "https://api.example.com/users");
        request.headers.push(("Authorization".to_string(), "Bearer abc".to_string()));

        assert_eq!(request.header("authorization"), Some("Bearer abc"));
        assert_eq!(request.header("AUTHORIZATION"), Some("Bearer abc"));
        assert_eq!(request.header("x-missing"), None);
    }

    #[test]
    fn test_response_success_range() {
        let ok = HttpResponse { status: 204, headers: Vec::new(), body: Vec::new() };
        let err = HttpResponse { status: 503, headers: Vec::new(), body: Vec::new() };
        assert!(ok.is_success());
        assert!(!err.is_success());
    }

    #[test]
    fn test_response_json_decode() {
        let response = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: br#"{"name":"ada"}"#.to_vec(),
        };

        #[derive(serde::Deserialize)]
        struct Payload {
            name: String,
        }

        let payload: Payload = response.json().expect("valid json");
        assert_eq!(payload.name, "ada");

        let garbled = HttpResponse { status: 200, headers: Vec::new(), body: b"{".to_vec() };
        let result: Result<Payload, _> = garbled.json();
        assert!(matches!(result, Err(ApiError::Decode(_))));
    }

    #[test]
    fn test_before_send_classification() {
        assert!(TransportError::ConnectionRefused("refused".to_string()).before_send());
        assert!(TransportError::Dns("nxdomain".to_string()).before_send());
        assert!(TransportError::Timeout("deadline".to_string()).before_send());
        assert!(!TransportError::ConnectionReset("reset".to_string()).before_send());
        assert!(!TransportError::Other("tls".to_string()).before_send());
    }
}
