use crate::model::value::Value;

/// One cell of a column family: a value under a visibility label, plus the
/// pending-write intent.
///
/// `dirty` and `delete` are never both set: marking a column deleted clears
/// `dirty`, and a deleted column ignores further attempts to mark it dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    value: Value,
    visibility: String,
    dirty: bool,
    delete: bool,
}

impl Column {
    /// A new, application-created column. It is dirty until persisted.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_visibility(name, value, "")
    }

    pub fn with_visibility(
        name: impl Into<String>,
        value: impl Into<Value>,
        visibility: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            visibility: visibility.into(),
            dirty: true,
            delete: false,
        }
    }

    /// A column materialized from a scan. Neither flag is set.
    pub fn loaded(name: impl Into<String>, value: Value, visibility: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            visibility: visibility.into(),
            dirty: false,
            delete: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Label expression; empty means visible to every caller.
    pub fn visibility(&self) -> &str {
        &self.visibility
    }

    pub fn has_visibility(&self) -> bool {
        !self.visibility.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_delete(&self) -> bool {
        self.delete
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        if dirty && self.delete {
            return;
        }
        self.dirty = dirty;
    }

    pub fn mark_deleted(&mut self) {
        self.delete = true;
        self.dirty = false;
    }

    /// Clears (or sets) both intents. Used after a load so freshly read data
    /// is not mistaken for pending writes.
    pub fn set_dirty_bits(&mut self, dirty: bool) {
        self.dirty = dirty;
        self.delete = false;
    }

    pub(crate) fn replace(&mut self, value: Value) {
        self.value = value;
        self.dirty = true;
    }

    pub(crate) fn relabeled(&self, visibility: &str) -> Self {
        Self::with_visibility(self.name.clone(), self.value.clone(), visibility)
    }
}
