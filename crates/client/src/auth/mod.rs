//! Authentication: token types, storage capability, and renewal
//!
//! The refresher guarantees at most one renewal round-trip is in flight at
//! any time; the store is a synchronous capability owned by the host
//! application (browser storage, keychain, in-memory).

mod refresher;
mod store;
mod types;

pub use refresher::{AuthError, RefreshConfig, TokenRefresher};
pub use store::{MemoryTokenStore, TokenStore};
pub use types::{AuthTokens, TokenResponse};
