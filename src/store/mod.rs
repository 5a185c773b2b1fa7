//! Client contract for the sorted column-family store behind
//! [`ColumnStoreSession`](crate::session::column_store::ColumnStoreSession).

pub mod embedded;

use crate::config::{BatchWriterConfig, ConnectionSettings};
use crate::error::{ModelError, ResourceType};
use crate::mutation::RowMutation;
use crate::scan::{Cell, KeyRange};
use crate::visibility::Authorizations;
use std::sync::Arc;
use thiserror::Error;

pub use embedded::EmbeddedStore;

/// Name under which the row-deleting filter is attached to a table.
pub const ROW_DELETING_FILTER: &str = "RowDeletingFilter";
pub const ROW_DELETING_PRIORITY: u32 = 7;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table {0} does not exist")]
    TableNotFound(String),
    #[error("table {0} already exists")]
    TableExists(String),
    #[error("mutations rejected for table {table}: {message}")]
    MutationsRejected { table: String, message: String },
    #[error("security violation: {0}")]
    Security(String),
    #[error("filter {filter} is already attached to table {table}")]
    FilterExists { table: String, filter: String },
    #[error("invalid filter pattern '{pattern}': {message}")]
    InvalidFilter { pattern: String, message: String },
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ModelError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TableNotFound(table) => ModelError::table_not_found(table),
            StoreError::TableExists(table) => ModelError::AlreadyExists {
                resource_type: ResourceType::Table,
                resource_id: table,
            },
            StoreError::MutationsRejected { table, message } => {
                ModelError::MutationsRejected { table, message }
            }
            StoreError::Security(message) => ModelError::PermissionDenied(message),
            StoreError::FilterExists { table, filter } => {
                ModelError::FilterAlreadyAttached { table, filter }
            }
            StoreError::InvalidFilter { pattern, message } => {
                ModelError::InvalidPattern { pattern, message }
            }
            StoreError::InvalidMutation(message) => ModelError::Encode(message),
            StoreError::Unavailable(message) => ModelError::Unavailable { message },
        }
    }
}

/// Server-side filter applied while the store produces a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFilter {
    /// Hides every cell of a row at or before its newest delete-row marker.
    RowDeleting,
    /// Keeps rows whose whole key matches the pattern.
    RowRegex(String),
    /// Keeps cells whose whole family name matches the pattern.
    FamilyRegex(String),
}

/// A filter attached to a table, applied to every scan and compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSetting {
    pub name: String,
    pub priority: u32,
    pub filter: ServerFilter,
}

impl FilterSetting {
    pub fn row_deleting() -> Self {
        Self {
            name: ROW_DELETING_FILTER.to_string(),
            priority: ROW_DELETING_PRIORITY,
            filter: ServerFilter::RowDeleting,
        }
    }
}

/// Restricts a scan to whole families or single columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchColumn {
    Family(String),
    Column { family: String, qualifier: String },
}

impl FetchColumn {
    pub fn matches(&self, family: &str, qualifier: &str) -> bool {
        match self {
            FetchColumn::Family(f) => f == family,
            FetchColumn::Column {
                family: f,
                qualifier: q,
            } => f == family && q == qualifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSpec {
    pub range: KeyRange,
    pub filters: Vec<ServerFilter>,
    pub fetch: Vec<FetchColumn>,
}

impl ScanSpec {
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            filters: Vec::new(),
            fetch: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: ServerFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_fetch(mut self, fetch: impl IntoIterator<Item = FetchColumn>) -> Self {
        self.fetch.extend(fetch);
        self
    }
}

impl Default for ScanSpec {
    fn default() -> Self {
        Self::new(KeyRange::all())
    }
}

/// Key-ordered stream of visible cells.
pub type CellStream = Box<dyn Iterator<Item = Result<Cell, StoreError>> + Send>;

pub trait StoreConnector: Send + Sync {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn StoreClient>, StoreError>;
}

/// An authenticated connection to the store.
pub trait StoreClient: Send + Sync {
    fn create_table(&self, table: &str) -> Result<(), StoreError>;
    fn delete_table(&self, table: &str) -> Result<(), StoreError>;
    fn table_exists(&self, table: &str) -> Result<bool, StoreError>;
    fn list_tables(&self) -> Result<Vec<String>, StoreError>;
    /// Names of the filters attached to `table`.
    fn list_filters(&self, table: &str) -> Result<Vec<String>, StoreError>;
    fn attach_filter(&self, table: &str, setting: FilterSetting) -> Result<(), StoreError>;
    /// Persists and compacts `table`, physically dropping deleted data.
    fn flush_table(&self, table: &str) -> Result<(), StoreError>;
    fn create_batch_writer(
        &self,
        table: &str,
        config: &BatchWriterConfig,
    ) -> Result<Arc<dyn StoreBatchWriter>, StoreError>;
    /// Cells whose visibility `auths` does not satisfy are never produced.
    fn scan(
        &self,
        table: &str,
        auths: &Authorizations,
        spec: ScanSpec,
    ) -> Result<CellStream, StoreError>;
}

/// Buffered, table-scoped mutation channel. Safe to share across threads.
pub trait StoreBatchWriter: Send + Sync {
    fn add_mutation(&self, mutation: RowMutation) -> Result<(), StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
    /// Flushes and refuses further mutations. Closing twice is a no-op.
    fn close(&self) -> Result<(), StoreError>;
}
