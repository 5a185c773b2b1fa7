use crate::auth::ModelUserContext;
use crate::error::ModelError;
use crate::model::{Column, ColumnFamily, Row, RowKey, Value};
use crate::mutation::{CellOp, RowMutation};
use crate::scan::KeyRange;
use crate::session::{
    ColumnSelection, FlushPolicy, ModelSession, RowIter, WriteOutcome, single_row,
};
use crate::visibility::{Authorizations, ColumnVisibility};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

type TableRows = BTreeMap<RowKey, Row>;

/// Reference backend holding every table in process memory.
///
/// Writes apply immediately (flush policies are accepted and ignored). Reads
/// copy the matching rows out under a read lock, so a scan sees the table as
/// it was when the query was issued. [`create_user_context`] issues an
/// unrestricted context; label contexts are honoured when supplied.
///
/// [`create_user_context`]: ModelSession::create_user_context
#[derive(Default)]
pub struct MemorySession {
    tables: RwLock<HashMap<String, TableRows>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    fn scan<F>(&self, table: &str, user: &ModelUserContext, mut keep: F) -> Result<Vec<Row>, ModelError>
    where
        F: FnMut(&RowKey) -> bool,
    {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| ModelError::table_not_found(table))?;
        let mut labels = LabelCache::new(user);
        Ok(rows
            .iter()
            .filter(|(key, _)| keep(key))
            .filter_map(|(_, row)| labels.visible_copy(row))
            .collect())
    }

    fn scan_range(
        &self,
        table: &str,
        range: KeyRange,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError> {
        let rows = self.scan(table, user, |key| range.contains(key.as_bytes()))?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn apply(rows: &mut TableRows, table: &str, mutation: RowMutation) -> Result<(), ModelError> {
        let key = mutation.row_key().clone();
        if !rows.contains_key(&key) {
            rows.insert(key.clone(), Row::new(table, key.clone())?);
        }
        let Some(stored) = rows.get_mut(&key) else {
            return Ok(());
        };
        for op in mutation.into_ops() {
            match op {
                CellOp::Put {
                    family,
                    qualifier,
                    visibility,
                    value,
                } => {
                    stored
                        .family_mut(&family)
                        .add_column(Column::loaded(qualifier, Value::from_bytes(value), visibility));
                }
                CellOp::Delete {
                    family,
                    qualifier,
                    visibility,
                } => {
                    if let Some(stored_family) = stored.get_mut(&family) {
                        stored_family.remove(&qualifier, &visibility);
                    }
                }
            }
        }
        stored.retain_families(|f| !f.is_empty());
        if stored.column_count() == 0 {
            rows.remove(&key);
        }
        Ok(())
    }
}

/// Evaluates visibility expressions for one read, parsing each distinct label once.
struct LabelCache<'a> {
    auths: Option<&'a Authorizations>,
    parsed: HashMap<String, bool>,
}

impl<'a> LabelCache<'a> {
    fn new(user: &'a ModelUserContext) -> Self {
        Self {
            auths: user.authorizations(),
            parsed: HashMap::new(),
        }
    }

    fn is_visible(&mut self, expression: &str) -> bool {
        let Some(auths) = self.auths else {
            return true;
        };
        if let Some(visible) = self.parsed.get(expression) {
            return *visible;
        }
        let visible = ColumnVisibility::parse(expression)
            .map(|v| v.is_visible_to(auths))
            .unwrap_or(false);
        self.parsed.insert(expression.to_string(), visible);
        visible
    }

    /// `row` restricted to visible columns, or `None` when nothing is visible.
    fn visible_copy(&mut self, row: &Row) -> Option<Row> {
        let mut copy = row.clone();
        copy.retain_columns(|_, column| self.is_visible(column.visibility()));
        (copy.column_count() > 0).then_some(copy)
    }
}

fn full_match(pattern: &str) -> Result<Regex, ModelError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| ModelError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

impl ModelSession for MemorySession {
    fn init(&mut self, _properties: &HashMap<String, String>) -> Result<(), ModelError> {
        Ok(())
    }

    fn save(&self, row: &Row, _flush: FlushPolicy) -> Result<WriteOutcome, ModelError> {
        trace!(table = row.table_name(), row_key = %row.row_key(), "save");
        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(row.table_name())
            .ok_or_else(|| ModelError::table_not_found(row.table_name()))?;
        match RowMutation::from_row(row)? {
            Some(mutation) => {
                Self::apply(rows, row.table_name(), mutation)?;
                Ok(WriteOutcome::Submitted)
            }
            None => Ok(WriteOutcome::NothingToWrite),
        }
    }

    fn save_many(&self, table: &str, rows: &[Row], _flush: FlushPolicy) -> Result<usize, ModelError> {
        trace!(table, rows = rows.len(), "save_many");
        if rows.is_empty() {
            return Ok(0);
        }
        let mutations = rows
            .iter()
            .map(RowMutation::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables.write();
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| ModelError::table_not_found(table))?;
        let mut submitted = 0;
        for mutation in mutations.into_iter().flatten() {
            Self::apply(stored, table, mutation)?;
            submitted += 1;
        }
        Ok(submitted)
    }

    fn find_by_row_key_range(
        &self,
        table: &str,
        start: &str,
        end: &str,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError> {
        trace!(table, start, end, "find_by_row_key_range");
        self.scan_range(table, KeyRange::half_open(start, end), user)
    }

    fn find_by_row_starts_with(
        &self,
        table: &str,
        prefix: &str,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError> {
        trace!(table, prefix, "find_by_row_starts_with");
        self.scan_range(table, KeyRange::prefix(prefix), user)
    }

    fn find_by_row_key_regex(
        &self,
        table: &str,
        regex: &str,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError> {
        trace!(table, regex, "find_by_row_key_regex");
        let pattern = full_match(regex)?;
        let rows = self.scan(table, user, |key| pattern.is_match(key.as_str()))?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn find_all(&self, table: &str, user: &ModelUserContext) -> Result<RowIter<'_>, ModelError> {
        trace!(table, "find_all");
        self.scan_range(table, KeyRange::all(), user)
    }

    fn row_count(&self, table: &str, user: &ModelUserContext) -> Result<u64, ModelError> {
        trace!(table, "row_count");
        Ok(self.scan(table, user, |_| true)?.len() as u64)
    }

    fn find_by_row_key(
        &self,
        table: &str,
        row_key: &str,
        user: &ModelUserContext,
    ) -> Result<Option<Row>, ModelError> {
        trace!(table, row_key, "find_by_row_key");
        single_row(
            table,
            row_key,
            self.scan_range(table, KeyRange::exact(row_key), user)?,
        )
    }

    fn find_by_row_key_columns(
        &self,
        table: &str,
        row_key: &str,
        columns: &ColumnSelection,
        user: &ModelUserContext,
    ) -> Result<Option<Row>, ModelError> {
        trace!(table, row_key, ?columns, "find_by_row_key_columns");
        let Some(mut row) = self.find_by_row_key(table, row_key, user)? else {
            return Ok(None);
        };
        if !columns.is_empty() {
            row.retain_columns(|family, column| columns.matches(family, column.name()));
        }
        Ok((row.column_count() > 0).then_some(row))
    }

    fn find_column_families_by_regex(
        &self,
        table: &str,
        row_key: &str,
        offset: usize,
        limit: usize,
        family_regex: &str,
        user: &ModelUserContext,
    ) -> Result<Vec<ColumnFamily>, ModelError> {
        trace!(table, row_key, offset, limit, family_regex, "find_column_families_by_regex");
        let pattern = full_match(family_regex)?;
        let Some(row) = self.find_by_row_key(table, row_key, user)? else {
            return Ok(Vec::new());
        };
        Ok(row
            .into_column_families()
            .into_iter()
            .filter(|f| pattern.is_match(f.name()))
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn initialize_table(&self, table: &str, _user: &ModelUserContext) -> Result<(), ModelError> {
        debug!(table, "initialize_table");
        self.tables.write().entry(table.to_string()).or_default();
        Ok(())
    }

    fn delete_table(&self, table: &str, _user: &ModelUserContext) -> Result<(), ModelError> {
        debug!(table, "delete_table");
        self.tables.write().remove(table);
        Ok(())
    }

    fn delete_row(&self, table: &str, row_key: &RowKey, _user: &ModelUserContext) -> Result<(), ModelError> {
        trace!(table, row_key = %row_key, "delete_row");
        self.tables
            .write()
            .get_mut(table)
            .ok_or_else(|| ModelError::table_not_found(table))?
            .remove(row_key);
        Ok(())
    }

    fn delete_column(
        &self,
        row: &Row,
        table: &str,
        family: &str,
        qualifier: &str,
        visibility: &str,
        _user: &ModelUserContext,
    ) -> Result<(), ModelError> {
        trace!(table, row_key = %row.row_key(), family, qualifier, visibility, "delete_column");
        let mut mutation = RowMutation::from_row(row)?
            .unwrap_or_else(|| RowMutation::new(row.row_key().clone()));
        mutation.delete(family, qualifier, visibility)?;
        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| ModelError::table_not_found(table))?;
        Self::apply(rows, table, mutation)
    }

    fn table_list(&self, _user: &ModelUserContext) -> Result<Vec<String>, ModelError> {
        let mut tables: Vec<String> = self.tables.read().keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    fn close(&self) -> Result<(), ModelError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), ModelError> {
        Ok(())
    }

    fn create_user_context(&self, _authorizations: &[&str]) -> Result<ModelUserContext, ModelError> {
        Ok(ModelUserContext::Unrestricted)
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySession;
    use crate::auth::ModelUserContext;
    use crate::model::{Row, RowKey};
    use crate::session::{FlushPolicy, ModelSession, WriteOutcome};

    fn session_with_table(table: &str) -> MemorySession {
        let session = MemorySession::new();
        session
            .initialize_table(table, &ModelUserContext::Unrestricted)
            .expect("init table");
        session
    }

    #[test]
    fn save_merges_into_the_stored_row() {
        let session = session_with_table("t");
        let user = ModelUserContext::Unrestricted;
        let mut row = Row::new("t", "k").expect("row");
        row.family_mut("f").set("a", "1").set("b", "2");
        session.save(&row, FlushPolicy::Default).expect("save");

        let mut update = Row::new("t", "k").expect("row");
        update.family_mut("f").set("a", "3");
        session.save(&update, FlushPolicy::Default).expect("save");

        let stored = session.find_by_row_key("t", "k", &user).expect("find").expect("row");
        let family = stored.get("f").expect("family");
        assert_eq!(family.get("a").map(|v| v.to_string()), Some("3".into()));
        assert_eq!(family.get("b").map(|v| v.to_string()), Some("2".into()));
        assert!(!stored.has_pending_writes());
    }

    #[test]
    fn deleting_every_column_removes_the_row() {
        let session = session_with_table("t");
        let user = ModelUserContext::Unrestricted;
        let mut row = Row::new("t", "k").expect("row");
        row.family_mut("f").set("a", "1");
        session.save(&row, FlushPolicy::Default).expect("save");

        session
            .delete_column(&Row::new("t", "k").expect("row"), "t", "f", "a", "", &user)
            .expect("delete column");
        assert!(session.find_by_row_key("t", "k", &user).expect("find").is_none());
        assert_eq!(session.row_count("t", &user).expect("count"), 0);
    }

    #[test]
    fn clean_row_reports_nothing_to_write() {
        let session = session_with_table("t");
        let row = Row::new("t", "k").expect("row");
        assert_eq!(
            session.save(&row, FlushPolicy::Flush).expect("save"),
            WriteOutcome::NothingToWrite
        );
    }

    #[test]
    fn missing_table_is_reported_for_writes_and_deletes() {
        let session = MemorySession::new();
        let user = ModelUserContext::Unrestricted;
        let mut row = Row::new("absent", "k").expect("row");
        row.family_mut("f").set("a", "1");
        assert!(session.save(&row, FlushPolicy::Default).expect_err("save").is_table_not_found());
        assert!(
            session
                .delete_row("absent", &RowKey::from("k"), &user)
                .expect_err("delete")
                .is_table_not_found()
        );
    }
}
