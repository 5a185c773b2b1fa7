use crate::model::column::Column;
use crate::model::value::Value;

/// Named, insertion-ordered set of columns.
///
/// Entries are keyed by `(name, visibility)`: the same qualifier may exist
/// once per distinct label, which is how a scan surfaces cells written under
/// different visibilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamily {
    name: String,
    columns: Vec<Column>,
}

impl ColumnFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets an unlabeled column, updating it in place when it exists.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.set_with_visibility(name, value, "")
    }

    pub fn set_with_visibility(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        visibility: &str,
    ) -> &mut Self {
        let value = value.into();
        match self.position(name, visibility) {
            Some(idx) if !self.columns[idx].is_delete() => self.columns[idx].replace(value),
            Some(idx) => self.columns[idx] = Column::with_visibility(name, value, visibility),
            None => self
                .columns
                .push(Column::with_visibility(name, value, visibility)),
        }
        self
    }

    /// Inserts `column`, replacing any entry with the same name and visibility.
    pub fn add_column(&mut self, column: Column) -> &mut Self {
        match self.position(column.name(), column.visibility()) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
        self
    }

    pub fn add_columns<I>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = Column>,
    {
        for column in columns {
            self.add_column(column);
        }
        self
    }

    /// Value of the first live column called `name`, preferring the
    /// unlabeled entry.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.column(name).map(Column::value)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        let mut live = self
            .columns
            .iter()
            .filter(|c| c.name() == name && !c.is_delete());
        let first = live.next()?;
        if !first.has_visibility() {
            return Some(first);
        }
        live.find(|c| !c.has_visibility()).or(Some(first))
    }

    pub fn column_with_visibility(&self, name: &str, visibility: &str) -> Option<&Column> {
        self.position(name, visibility).map(|idx| &self.columns[idx])
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn live_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_delete())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Marks every entry called `name` for deletion. Returns how many were marked.
    pub fn delete(&mut self, name: &str) -> usize {
        let mut marked = 0;
        for column in self.columns.iter_mut().filter(|c| c.name() == name) {
            column.mark_deleted();
            marked += 1;
        }
        marked
    }

    pub fn delete_with_visibility(&mut self, name: &str, visibility: &str) -> bool {
        match self.position(name, visibility) {
            Some(idx) => {
                self.columns[idx].mark_deleted();
                true
            }
            None => false,
        }
    }

    /// Drops an entry outright (no tombstone). Backends use this to apply a
    /// delete to rows they hold in memory.
    pub(crate) fn remove(&mut self, name: &str, visibility: &str) -> Option<Column> {
        self.position(name, visibility)
            .map(|idx| self.columns.remove(idx))
    }

    pub(crate) fn retain_columns<F>(&mut self, keep: F)
    where
        F: FnMut(&Column) -> bool,
    {
        self.columns.retain(keep);
    }

    pub fn set_dirty_bits(&mut self, dirty: bool) {
        for column in &mut self.columns {
            column.set_dirty_bits(dirty);
        }
    }

    pub fn has_pending_writes(&self) -> bool {
        self.columns.iter().any(|c| c.is_dirty() || c.is_delete())
    }

    fn position(&self, name: &str, visibility: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name() == name && c.visibility() == visibility)
    }
}
