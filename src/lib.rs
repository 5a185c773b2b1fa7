pub mod auth;
pub mod config;
pub mod error;
pub mod model;
pub mod mutation;
pub mod repository;
pub mod scan;
pub mod session;
pub mod session_cache;
pub mod store;
pub mod visibility;

pub use auth::ModelUserContext;
pub use config::{BatchWriterConfig, ConnectionSettings, SessionCacheConfig, SessionConfig};
pub use error::{ModelError, ModelErrorCode, ResourceType};
pub use model::{Column, ColumnFamily, DirtyBits, Row, RowKey, Value, ValueKind};
pub use mutation::{CellOp, RowMutation};
pub use repository::{Repository, RepositoryError, RowDecodeError, RowMapper};
pub use scan::{Cell, KeyRange, RowGrouper};
pub use session::{
    ColumnSelection, ColumnStoreSession, FlushPolicy, MemorySession, ModelSession, RowIter,
    WriteOutcome,
};
pub use session_cache::{
    ExpiringCache, ManagedSession, SessionCacheManager, SessionError, SessionIdManager,
    SessionRow, SessionRowMapper,
};
pub use store::EmbeddedStore;
pub use visibility::{Authorizations, ColumnVisibility};
