use crate::error::ModelError;
use crate::model::column::Column;
use crate::model::family::ColumnFamily;
use std::fmt;

/// Primary row identifier. Ordering is byte-lexicographic on the UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(String);

impl RowKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RowKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Anything that carries per-column write intents. Reads clear them so an
/// unmodified entity saved back performs no writes.
pub trait DirtyBits {
    fn set_dirty_bits(&mut self, dirty: bool);
}

/// A logical row: table, immutable key and insertion-ordered column families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    table_name: String,
    row_key: RowKey,
    families: Vec<ColumnFamily>,
}

impl Row {
    /// Fails fast on an empty key instead of at write time.
    pub fn new(table_name: impl Into<String>, row_key: impl Into<RowKey>) -> Result<Self, ModelError> {
        let table_name = table_name.into();
        let row_key = row_key.into();
        if row_key.is_empty() {
            return Err(ModelError::InvalidRowKey(format!(
                "row key for table '{table_name}' cannot be empty"
            )));
        }
        Ok(Self {
            table_name,
            row_key,
            families: Vec::new(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn row_key(&self) -> &RowKey {
        &self.row_key
    }

    pub fn get(&self, family: &str) -> Option<&ColumnFamily> {
        self.families.iter().find(|f| f.name() == family)
    }

    pub fn get_mut(&mut self, family: &str) -> Option<&mut ColumnFamily> {
        self.families.iter_mut().find(|f| f.name() == family)
    }

    /// Returns the named family, appending an empty one when absent.
    pub fn family_mut(&mut self, family: &str) -> &mut ColumnFamily {
        let idx = match self.families.iter().position(|f| f.name() == family) {
            Some(idx) => idx,
            None => {
                self.families.push(ColumnFamily::new(family));
                self.families.len() - 1
            }
        };
        &mut self.families[idx]
    }

    /// Adds `family`; an existing family of the same name absorbs its columns.
    pub fn add_column_family(&mut self, family: ColumnFamily) -> &mut Self {
        match self.get_mut(family.name()) {
            Some(existing) => {
                existing.add_columns(family.columns().iter().cloned());
            }
            None => self.families.push(family),
        }
        self
    }

    pub fn column_families(&self) -> &[ColumnFamily] {
        &self.families
    }

    pub fn into_column_families(self) -> Vec<ColumnFamily> {
        self.families
    }

    pub(crate) fn retain_families<F>(&mut self, keep: F)
    where
        F: FnMut(&ColumnFamily) -> bool,
    {
        self.families.retain(keep);
    }

    /// Keeps the columns `keep` accepts and drops families left empty.
    pub(crate) fn retain_columns<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &Column) -> bool,
    {
        for family in &mut self.families {
            let name = family.name().to_string();
            family.retain_columns(|column| keep(&name, column));
        }
        self.families.retain(|f| !f.is_empty());
    }

    pub fn column_count(&self) -> usize {
        self.families.iter().map(ColumnFamily::len).sum()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.families.iter().any(ColumnFamily::has_pending_writes)
    }

    /// Copy of this row with every column rewritten (dirty) under `relabel`'s
    /// answer for that column's current visibility.
    pub(crate) fn relabeled_copy<F>(&self, mut relabel: F) -> Row
    where
        F: FnMut(&str) -> String,
    {
        let mut copy = Row {
            table_name: self.table_name.clone(),
            row_key: self.row_key.clone(),
            families: Vec::with_capacity(self.families.len()),
        };
        for family in &self.families {
            let target = copy.family_mut(family.name());
            for column in family.live_columns() {
                target.add_column(column.relabeled(&relabel(column.visibility())));
            }
        }
        copy
    }
}

impl DirtyBits for Row {
    fn set_dirty_bits(&mut self, dirty: bool) {
        for family in &mut self.families {
            family.set_dirty_bits(dirty);
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.table_name, self.row_key)?;
        for family in &self.families {
            writeln!(f, "  {}", family.name())?;
            for column in family.columns() {
                writeln!(f, "    {}: {}", column.name(), column.value())?;
            }
        }
        Ok(())
    }
}
