//! Token storage capability
//!
//! The core requires synchronous get/set/clear and nothing else; the host
//! decides where tokens actually live. [`MemoryTokenStore`] is the default
//! in-process implementation and the one tests use.

use parking_lot::RwLock;

use super::types::AuthTokens;

/// Synchronous storage for the current token set
///
/// Implementations must not perform I/O or block; the refresher calls
/// these from async context. Only the refresher and the host's
/// login/logout flows may write.
pub trait TokenStore: Send + Sync {
    /// Current tokens, if a session exists
    fn get(&self) -> Option<AuthTokens>;

    /// Replace the stored tokens
    fn set(&self, tokens: AuthTokens);

    /// Drop the stored tokens (logout, terminal refresh failure)
    fn clear(&self);
}

/// In-memory token store
///
/// Suitable for session-scoped storage where tokens should not outlive the
/// process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<AuthTokens>>,
}

impl MemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with tokens (login flows, tests)
    pub fn with_tokens(tokens: AuthTokens) -> Self {
        Self { tokens: RwLock::new(Some(tokens)) }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<AuthTokens> {
        self.tokens.read().clone()
    }

    fn set(&self, tokens: AuthTokens) {
        *self.tokens.write() = Some(tokens);
    }

    fn clear(&self) {
        *self.tokens.write() = None;
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the in-memory token store.
    use chrono::{TimeZone, Utc};

    use super::*;

    fn sample_tokens() -> AuthTokens {
        let expires_at = Utc.timestamp_opt(1_000, 0).single().expect("valid timestamp");
        AuthTokens::new("access", "refresh", expires_at)
    }

    #[test]
    fn test_empty_store_returns_none() {
        let store = MemoryTokenStore::new();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_set_then_get_round_trips() {
        let store = MemoryTokenStore::new();
        store.set(sample_tokens());

        let stored = store.get().expect("tokens present");
        assert_eq!(stored.access_token, "access");
        assert_eq!(stored.refresh_token, "refresh");
    }

    #[test]
    fn test_clear_removes_tokens() {
        let store = MemoryTokenStore::with_tokens(sample_tokens());
        assert!(store.get().is_some());

        store.clear();
        assert!(store.get().is_none());
    }
}
