//! Backend-neutral storage session.
//!
//! [`ModelSession`] is the only surface callers depend on. Two backends ship
//! with the crate:
//!
//! - [`MemorySession`]: an in-process reference backend used by tests and
//!   single-node tools.
//! - [`ColumnStoreSession`]: talks to a sorted column-family store through the
//!   [`crate::store`] client contract, with per-table cached batch writers and
//!   server-side row deletion.

pub mod column_store;
pub mod memory;

use crate::auth::ModelUserContext;
use crate::error::ModelError;
use crate::model::{ColumnFamily, Row, RowKey};
use crate::store::FetchColumn;
use crate::visibility::ColumnVisibility;
use std::collections::{BTreeMap, HashMap};

pub use column_store::ColumnStoreSession;
pub use memory::MemorySession;

/// Lazy, single-pass sequence of rows in ascending key order. Issue a new
/// query to read again.
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Row, ModelError>> + Send + 'a>;

/// When a write is pushed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum FlushPolicy {
    /// Flush iff the session was configured with autoflush.
    #[default]
    Default,
    /// Flush before returning.
    Flush,
    /// Leave buffered until an explicit flush or close.
    NoFlush,
}

impl FlushPolicy {
    pub(crate) fn should_flush(self, autoflush: bool) -> bool {
        match self {
            FlushPolicy::Default => autoflush,
            FlushPolicy::Flush => true,
            FlushPolicy::NoFlush => false,
        }
    }
}

/// Result of saving a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Submitted,
    /// The row had no dirty or deleted columns; the store was not contacted.
    NothingToWrite,
}

impl WriteOutcome {
    pub fn is_submitted(self) -> bool {
        self == WriteOutcome::Submitted
    }
}

/// Column subset for a point lookup: family name to a single qualifier, or
/// `*` for the whole family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSelection {
    columns: BTreeMap<String, String>,
}

impl ColumnSelection {
    pub const WHOLE_FAMILY: &'static str = "*";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn family(mut self, family: &str) -> Self {
        self.columns
            .insert(family.to_string(), Self::WHOLE_FAMILY.to_string());
        self
    }

    pub fn column(mut self, family: &str, qualifier: &str) -> Self {
        self.columns
            .insert(family.to_string(), qualifier.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn matches(&self, family: &str, qualifier: &str) -> bool {
        match self.columns.get(family) {
            Some(selected) => selected == Self::WHOLE_FAMILY || selected == qualifier,
            None => false,
        }
    }

    pub(crate) fn to_fetch(&self) -> Vec<FetchColumn> {
        self.columns
            .iter()
            .map(|(family, qualifier)| {
                if qualifier == Self::WHOLE_FAMILY {
                    FetchColumn::Family(family.clone())
                } else {
                    FetchColumn::Column {
                        family: family.clone(),
                        qualifier: qualifier.clone(),
                    }
                }
            })
            .collect()
    }
}

impl From<HashMap<String, String>> for ColumnSelection {
    fn from(columns: HashMap<String, String>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }
}

/// Storage session over one backend.
///
/// Reads are scoped by a [`ModelUserContext`]; cells the context may not see
/// never leave the backend. Writes go through per-table buffered writers and
/// are pushed according to a [`FlushPolicy`].
pub trait ModelSession: Send + Sync {
    /// Validates `properties` and connects. Fails on the first missing
    /// required key.
    fn init(&mut self, properties: &HashMap<String, String>) -> Result<(), ModelError>;

    fn save(&self, row: &Row, flush: FlushPolicy) -> Result<WriteOutcome, ModelError>;

    /// Saves `rows` through `table`'s writer. Returns how many rows had
    /// something to write. An empty slice never touches the backend.
    fn save_many(&self, table: &str, rows: &[Row], flush: FlushPolicy) -> Result<usize, ModelError>;

    /// Rows with `start <= key < end`.
    fn find_by_row_key_range(
        &self,
        table: &str,
        start: &str,
        end: &str,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError>;

    fn find_by_row_starts_with(
        &self,
        table: &str,
        prefix: &str,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError>;

    /// Rows whose whole key matches `regex`.
    fn find_by_row_key_regex(
        &self,
        table: &str,
        regex: &str,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError>;

    fn find_all(&self, table: &str, user: &ModelUserContext) -> Result<RowIter<'_>, ModelError>;

    fn row_count(&self, table: &str, user: &ModelUserContext) -> Result<u64, ModelError>;

    /// Point lookup. More than one row for the key is reported as
    /// [`ModelError::TooManyRows`].
    fn find_by_row_key(
        &self,
        table: &str,
        row_key: &str,
        user: &ModelUserContext,
    ) -> Result<Option<Row>, ModelError>;

    fn find_by_row_key_columns(
        &self,
        table: &str,
        row_key: &str,
        columns: &ColumnSelection,
        user: &ModelUserContext,
    ) -> Result<Option<Row>, ModelError>;

    /// Families of one row whose name matches `family_regex`, skipping
    /// `offset` of them and returning at most `limit`.
    fn find_column_families_by_regex(
        &self,
        table: &str,
        row_key: &str,
        offset: usize,
        limit: usize,
        family_regex: &str,
        user: &ModelUserContext,
    ) -> Result<Vec<ColumnFamily>, ModelError>;

    /// Creates `table` unless it exists. Concurrent initialization is not an error.
    fn initialize_table(&self, table: &str, user: &ModelUserContext) -> Result<(), ModelError>;

    /// Drops `table` if present.
    fn delete_table(&self, table: &str, user: &ModelUserContext) -> Result<(), ModelError>;

    /// Removes every currently stored cell of the row. Deleting an absent row
    /// is not an error.
    fn delete_row(&self, table: &str, row_key: &RowKey, user: &ModelUserContext) -> Result<(), ModelError>;

    /// Writes `row`'s pending changes plus a delete of one cell.
    fn delete_column(
        &self,
        row: &Row,
        table: &str,
        family: &str,
        qualifier: &str,
        visibility: &str,
        user: &ModelUserContext,
    ) -> Result<(), ModelError>;

    fn table_list(&self, user: &ModelUserContext) -> Result<Vec<String>, ModelError>;

    /// Flushes and closes every cached writer.
    fn close(&self) -> Result<(), ModelError>;

    fn flush(&self) -> Result<(), ModelError>;

    /// Builds this backend's user context from authorization labels. `[""]`
    /// means "no labels".
    fn create_user_context(&self, authorizations: &[&str]) -> Result<ModelUserContext, ModelError>;

    /// Rewrites every column of `row` under `visibility`.
    ///
    /// Not atomic: the old row is deleted before the relabeled copy is
    /// written, so a concurrent reader may observe either labeling or neither.
    /// Callers that need more must serialize externally.
    fn alter_all_columns_visibility(
        &self,
        row: &Row,
        visibility: &str,
        user: &ModelUserContext,
        flush: FlushPolicy,
    ) -> Result<WriteOutcome, ModelError> {
        ColumnVisibility::parse(visibility)?;
        let copy = row.relabeled_copy(|_| visibility.to_string());
        self.delete_row(row.table_name(), row.row_key(), user)?;
        self.save(&copy, flush)
    }

    /// Like [`ModelSession::alter_all_columns_visibility`], relabeling only
    /// columns whose visibility is exactly `match_visibility`. Other columns
    /// are rewritten unchanged. Same race.
    fn alter_columns_visibility(
        &self,
        row: &Row,
        match_visibility: &str,
        new_visibility: &str,
        user: &ModelUserContext,
        flush: FlushPolicy,
    ) -> Result<WriteOutcome, ModelError> {
        ColumnVisibility::parse(new_visibility)?;
        let copy = row.relabeled_copy(|current| {
            if current == match_visibility {
                new_visibility.to_string()
            } else {
                current.to_string()
            }
        });
        self.delete_row(row.table_name(), row.row_key(), user)?;
        self.save(&copy, flush)
    }
}

/// Collapses a point-lookup result to at most one row.
pub(crate) fn single_row(
    table: &str,
    row_key: &str,
    mut rows: RowIter<'_>,
) -> Result<Option<Row>, ModelError> {
    let Some(first) = rows.next().transpose()? else {
        return Ok(None);
    };
    if rows.next().transpose()?.is_some() {
        return Err(ModelError::TooManyRows {
            table: table.to_string(),
            row_key: row_key.to_string(),
        });
    }
    Ok(Some(first))
}

#[cfg(test)]
mod tests {
    use super::{ColumnSelection, FlushPolicy, RowIter, single_row};
    use crate::model::Row;
    use crate::store::FetchColumn;

    #[test]
    fn flush_policy_honours_autoflush_only_by_default() {
        assert!(FlushPolicy::Default.should_flush(true));
        assert!(!FlushPolicy::Default.should_flush(false));
        assert!(FlushPolicy::Flush.should_flush(false));
        assert!(!FlushPolicy::NoFlush.should_flush(true));
    }

    #[test]
    fn column_selection_maps_to_fetch_columns() {
        let selection = ColumnSelection::new()
            .family("data")
            .column("metadata", "version");
        assert!(selection.matches("data", "anything"));
        assert!(selection.matches("metadata", "version"));
        assert!(!selection.matches("metadata", "created"));
        assert_eq!(
            selection.to_fetch(),
            vec![
                FetchColumn::Family("data".into()),
                FetchColumn::Column {
                    family: "metadata".into(),
                    qualifier: "version".into()
                },
            ]
        );
    }

    #[test]
    fn single_row_rejects_duplicates() {
        let rows = || -> RowIter<'static> {
            Box::new(vec![Row::new("t", "k"), Row::new("t", "k")].into_iter())
        };
        let err = single_row("t", "k", rows()).expect_err("two rows");
        assert_eq!(err.code_str(), "too_many_rows");

        let empty: RowIter<'static> = Box::new(std::iter::empty());
        assert!(single_row("t", "k", empty).expect("ok").is_none());
    }
}
