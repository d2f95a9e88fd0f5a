//! Permission/role cache (RBAC cache)
//!
//! UI gating needs synchronous, cheap authorization checks; the backend is
//! neither. The cache resolves that by holding one immutable
//! [`PermissionSnapshot`] behind a lock and replacing it wholesale on every
//! successful sync. Readers clone an `Arc`, so no reader ever observes a
//! half-written view; replace-not-mutate is the cache's entire concurrency
//! strategy.
//!
//! Deny-by-default is the controlling invariant: not-yet-loaded, cleared,
//! or failed-on-first-load states all answer `false`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::ApiError;
use crate::pipeline::{RequestPipeline, RequestSpec};

/// One resolved authorization view for the current user
///
/// Immutable once built; the cache replaces the whole snapshot and never
/// mutates one in place. `version` increments monotonically across
/// replacements (including across invalidate/reload cycles) so callers
/// that captured a reference can detect staleness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSnapshot {
    /// Subject the snapshot was resolved for
    pub user_id: String,
    /// Role names held by the user
    pub roles: HashSet<String>,
    /// Granted permissions in `resource:action` form
    pub permissions: HashSet<String>,
    /// When this snapshot was fetched
    pub fetched_at: DateTime<Utc>,
    /// Monotonic replacement counter
    pub version: u64,
}

impl PermissionSnapshot {
    /// Whether this snapshot grants a permission
    ///
    /// Matching rules, evaluated in order: exact `resource:action`,
    /// resource wildcard `resource:*`, then global wildcard `*:*`.
    pub fn grants(&self, permission: &str) -> bool {
        if self.permissions.contains(permission) {
            return true;
        }
        if let Some((resource, _)) = permission.split_once(':') {
            if self.permissions.contains(&format!("{resource}:*")) {
                return true;
            }
        }
        self.permissions.contains("*:*")
    }
}

/// Wire payload of the permissions endpoint
#[derive(Debug, Deserialize)]
pub struct PermissionsPayload {
    /// Subject the grants belong to
    pub user_id: String,
    /// Role names
    #[serde(default)]
    pub roles: Vec<String>,
    /// Granted permissions
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Configuration for the permission cache
#[derive(Debug, Clone)]
pub struct PermissionCacheConfig {
    /// Path of the permissions endpoint, relative to the pipeline base URL
    pub endpoint: String,
    /// Breaker key the sync request is routed through
    pub breaker_key: String,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self { endpoint: "/me/permissions".to_string(), breaker_key: "identity".to_string() }
    }
}

/// Observability snapshot for the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCacheStats {
    /// Version of the loaded snapshot, 0 when unloaded
    pub version: u64,
    /// Fetch time of the loaded snapshot
    pub fetched_at: Option<DateTime<Utc>>,
    /// Number of granted permissions in the loaded snapshot
    pub entry_count: usize,
}

/// Synchronous authorization checks backed by an async-refreshed snapshot
pub struct PermissionCache<C: Clock = SystemClock> {
    pipeline: Arc<RequestPipeline<C>>,
    config: PermissionCacheConfig,
    snapshot: RwLock<Option<Arc<PermissionSnapshot>>>,
    next_version: AtomicU64,
    clock: Arc<C>,
}

impl<C: Clock> PermissionCache<C> {
    /// Create a cache over the given pipeline
    pub fn new(
        pipeline: Arc<RequestPipeline<C>>,
        config: PermissionCacheConfig,
        clock: C,
    ) -> Self {
        Self {
            pipeline,
            config,
            snapshot: RwLock::new(None),
            next_version: AtomicU64::new(0),
            clock: Arc::new(clock),
        }
    }

    /// Fetch the current user's grants and swap in a fresh snapshot
    ///
    /// On failure the previous snapshot is retained (stale-but-available
    /// beats unavailable) and the error is returned for the caller to log
    /// or toast; it is never thrown into render paths.
    ///
    /// # Errors
    /// Any pipeline error from the underlying request.
    pub async fn sync(&self) -> Result<(), ApiError> {
        let spec = RequestSpec::get(self.config.endpoint.as_str())
            .with_breaker_key(self.config.breaker_key.as_str());

        let payload: PermissionsPayload = match self.pipeline.request_json(spec).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "permission sync failed, keeping previous snapshot");
                return Err(err);
            }
        };

        let fetched_at = self.clock.now_utc();
        let mut guard = self.snapshot.write();
        // Version assignment happens inside the write lock so replacement
        // order and version order cannot diverge under concurrent syncs.
        let version = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(PermissionSnapshot {
            user_id: payload.user_id,
            roles: payload.roles.into_iter().collect(),
            permissions: payload.permissions.into_iter().collect(),
            fetched_at,
            version,
        });
        info!(
            version,
            entries = snapshot.permissions.len(),
            "permission snapshot replaced"
        );
        *guard = Some(snapshot);

        Ok(())
    }

    /// Synchronous permission check against the current snapshot
    ///
    /// Deny-by-default: `false` whenever no snapshot is loaded.
    pub fn can(&self, permission: &str) -> bool {
        self.snapshot.read().as_ref().is_some_and(|snapshot| snapshot.grants(permission))
    }

    /// Synchronous role membership check, deny-by-default
    pub fn has_role(&self, role: &str) -> bool {
        self.snapshot.read().as_ref().is_some_and(|snapshot| snapshot.roles.contains(role))
    }

    /// Drop the snapshot without fetching a replacement
    ///
    /// Used on logout or an explicit admin cache-clear; subsequent checks
    /// deny until the next successful [`sync`](Self::sync).
    pub fn invalidate(&self) {
        debug!("permission snapshot invalidated");
        *self.snapshot.write() = None;
    }

    /// Current snapshot, if loaded
    ///
    /// Callers holding the `Arc` can compare `version` against a later
    /// call to detect staleness.
    pub fn snapshot(&self) -> Option<Arc<PermissionSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Observability snapshot
    pub fn stats(&self) -> PermissionCacheStats {
        self.snapshot.read().as_ref().map_or(
            PermissionCacheStats { version: 0, fetched_at: None, entry_count: 0 },
            |snapshot| PermissionCacheStats {
                version: snapshot.version,
                fetched_at: Some(snapshot.fetched_at),
                entry_count: snapshot.permissions.len(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for snapshot matching rules.
    use chrono::TimeZone;

    use super::*;

    fn snapshot(permissions: &[&str]) -> PermissionSnapshot {
        PermissionSnapshot {
            user_id: "u-1".to_string(),
            roles: ["admin".to_string()].into_iter().collect(),
            permissions: permissions.iter().map(|p| (*p).to_string()).collect(),
            fetched_at: Utc.timestamp_opt(0, 0).single().expect("valid timestamp"),
            version: 1,
        }
    }

    #[test]
    fn test_exact_match() {
        let snap = snapshot(&["users:view"]);
        assert!(snap.grants("users:view"));
        assert!(!snap.grants("users:edit"));
    }

    #[test]
    fn test_resource_wildcard() {
        let snap = snapshot(&["users:*"]);
        assert!(snap.grants("users:view"));
        assert!(snap.grants("users:delete"));
        assert!(!snap.grants("audit:view"));
    }

    #[test]
    fn test_global_wildcard() {
        let snap = snapshot(&["*:*"]);
        assert!(snap.grants("users:view"));
        assert!(snap.grants("anything:at-all"));
    }

    #[test]
    fn test_permission_without_separator() {
        let snap = snapshot(&["users:*"]);
        // No resource part to wildcard-match against.
        assert!(!snap.grants("users"));

        let exact = snapshot(&["impersonate"]);
        assert!(exact.grants("impersonate"));
    }
}
