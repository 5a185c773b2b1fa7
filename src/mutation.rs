//! Translation of a row's change-tracking bits into store writes.

use crate::error::ModelError;
use crate::model::{Row, RowKey};
use crate::visibility::ColumnVisibility;

/// Value carried by a row-deleting marker cell.
pub const DELETE_ROW_VALUE: &[u8] = b"DEL_ROW";

/// One write against a single cell. An empty `visibility` is the unlabeled cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellOp {
    Put {
        family: String,
        qualifier: String,
        visibility: String,
        value: Vec<u8>,
    },
    Delete {
        family: String,
        qualifier: String,
        visibility: String,
    },
}

impl CellOp {
    pub fn family(&self) -> &str {
        match self {
            CellOp::Put { family, .. } | CellOp::Delete { family, .. } => family,
        }
    }

    pub fn qualifier(&self) -> &str {
        match self {
            CellOp::Put { qualifier, .. } | CellOp::Delete { qualifier, .. } => qualifier,
        }
    }

    pub fn visibility(&self) -> &str {
        match self {
            CellOp::Put { visibility, .. } | CellOp::Delete { visibility, .. } => visibility,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, CellOp::Delete { .. })
    }

    fn estimated_size(&self) -> usize {
        let key = self.family().len() + self.qualifier().len() + self.visibility().len();
        match self {
            CellOp::Put { value, .. } => key + value.len() + 16,
            CellOp::Delete { .. } => key + 16,
        }
    }
}

/// All writes for one row key, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMutation {
    row_key: RowKey,
    ops: Vec<CellOp>,
}

impl RowMutation {
    pub fn new(row_key: RowKey) -> Self {
        Self {
            row_key,
            ops: Vec::new(),
        }
    }

    /// Synthesizes the writes `row` needs: a delete per deleted column, a put
    /// per dirty column, nothing for clean columns. `Ok(None)` means the row
    /// has nothing to write.
    pub fn from_row(row: &Row) -> Result<Option<Self>, ModelError> {
        let mut mutation = Self::new(row.row_key().clone());
        for family in row.column_families() {
            for column in family.columns() {
                if column.is_delete() {
                    mutation.delete(family.name(), column.name(), column.visibility())?;
                } else if column.is_dirty() {
                    mutation.put(
                        family.name(),
                        column.name(),
                        column.visibility(),
                        column.value().to_bytes().to_vec(),
                    )?;
                }
            }
        }
        Ok((!mutation.is_empty()).then_some(mutation))
    }

    /// The single-cell marker a row-deleting filter interprets as "suppress
    /// every earlier cell of this row".
    pub fn delete_row_marker(row_key: RowKey) -> Self {
        Self {
            row_key,
            ops: vec![CellOp::Put {
                family: String::new(),
                qualifier: String::new(),
                visibility: String::new(),
                value: DELETE_ROW_VALUE.to_vec(),
            }],
        }
    }

    pub fn put(
        &mut self,
        family: &str,
        qualifier: &str,
        visibility: &str,
        value: Vec<u8>,
    ) -> Result<&mut Self, ModelError> {
        ColumnVisibility::parse(visibility)?;
        self.ops.push(CellOp::Put {
            family: family.to_string(),
            qualifier: qualifier.to_string(),
            visibility: visibility.to_string(),
            value,
        });
        Ok(self)
    }

    pub fn delete(
        &mut self,
        family: &str,
        qualifier: &str,
        visibility: &str,
    ) -> Result<&mut Self, ModelError> {
        ColumnVisibility::parse(visibility)?;
        self.ops.push(CellOp::Delete {
            family: family.to_string(),
            qualifier: qualifier.to_string(),
            visibility: visibility.to_string(),
        });
        Ok(self)
    }

    pub fn row_key(&self) -> &RowKey {
        &self.row_key
    }

    pub fn ops(&self) -> &[CellOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<CellOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn is_delete_row_marker(&self) -> bool {
        matches!(
            self.ops.as_slice(),
            [CellOp::Put { family, qualifier, value, .. }]
                if family.is_empty() && qualifier.is_empty() && value == DELETE_ROW_VALUE
        )
    }

    /// Approximate buffered size, used against a writer's memory limit.
    pub fn estimated_size(&self) -> usize {
        self.row_key.as_bytes().len() + self.ops.iter().map(CellOp::estimated_size).sum::<usize>()
    }
}
