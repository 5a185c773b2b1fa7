//! HTTP session persistence on top of [`crate::repository`].
//!
//! [`SessionCacheManager`] keeps recently used session rows in an
//! [`ExpiringCache`] and implements load/save/refresh/remove with optimistic
//! versioning. [`ManagedSession`] is the request-facing session object and
//! [`SessionIdManager`] maps node-qualified ids.

pub mod cache;
pub mod id;
pub mod manager;
pub mod model;
pub mod session;

use crate::error::ModelError;
use crate::repository::RepositoryError;
use std::time::{SystemTime, UNIX_EPOCH};

pub use cache::ExpiringCache;
pub use id::SessionIdManager;
pub use manager::SessionCacheManager;
pub use model::{SessionRow, SessionRowMapper};
pub use session::ManagedSession;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {cluster_id} has been invalidated")]
    Invalidated { cluster_id: String },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
