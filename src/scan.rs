//! Key ranges and lazy grouping of a key-ordered cell stream into rows.

use crate::error::ModelError;
use crate::model::{Column, Row, Value};
use std::iter::Peekable;
use std::ops::Bound;

/// One visible cell as delivered by a store scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub row: String,
    pub family: String,
    pub qualifier: String,
    pub visibility: String,
    pub timestamp: u64,
    pub value: Vec<u8>,
}

/// Smallest byte string greater than every string starting with `prefix`, or
/// `None` when no such bound exists (empty or all-`0xFF` prefix).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    for i in (0..next.len()).rev() {
        if next[i] != 0xFF {
            next[i] += 1;
            next.truncate(i + 1);
            return Some(next);
        }
    }
    None
}

/// Row-key interval over raw key bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<Vec<u8>>,
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// `[start, end)`.
    pub fn half_open(start: &str, end: &str) -> Self {
        Self {
            start: Bound::Included(start.as_bytes().to_vec()),
            end: Bound::Excluded(end.as_bytes().to_vec()),
        }
    }

    pub fn exact(key: &str) -> Self {
        Self {
            start: Bound::Included(key.as_bytes().to_vec()),
            end: Bound::Included(key.as_bytes().to_vec()),
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        let start = if prefix.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(prefix.as_bytes().to_vec())
        };
        let end = match prefix_successor(prefix.as_bytes()) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Self { start, end }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(s) => key >= s.as_slice(),
            Bound::Excluded(s) => key > s.as_slice(),
        };
        after_start && !self.is_past_end(key)
    }

    /// True once `key` sorts beyond the end bound; scans stop here.
    pub fn is_past_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Unbounded => false,
            Bound::Included(e) => key > e.as_slice(),
            Bound::Excluded(e) => key >= e.as_slice(),
        }
    }
}

/// Groups consecutive cells sharing a row key into [`Row`]s, one row per
/// `next()`. Nothing past the current row is pulled from the source, so a
/// caller that stops early never materializes the rest of the scan.
///
/// Single-pass: re-reading requires a fresh scan.
pub struct RowGrouper<I>
where
    I: Iterator<Item = Result<Cell, ModelError>>,
{
    table: String,
    cells: Peekable<I>,
}

impl<I> RowGrouper<I>
where
    I: Iterator<Item = Result<Cell, ModelError>>,
{
    pub fn new(table: impl Into<String>, cells: I) -> Self {
        Self {
            table: table.into(),
            cells: cells.peekable(),
        }
    }
}

impl<I> Iterator for RowGrouper<I>
where
    I: Iterator<Item = Result<Cell, ModelError>>,
{
    type Item = Result<Row, ModelError>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.cells.next()? {
            Ok(cell) => cell,
            Err(err) => return Some(Err(err)),
        };
        let mut row = match Row::new(self.table.clone(), first.row.clone()) {
            Ok(row) => row,
            Err(err) => return Some(Err(err)),
        };
        push_cell(&mut row, first);

        while let Some(Ok(cell)) = self.cells.peek() {
            if cell.row != row.row_key().as_str() {
                break;
            }
            if let Some(Ok(cell)) = self.cells.next() {
                push_cell(&mut row, cell);
            }
        }
        Some(Ok(row))
    }
}

fn push_cell(row: &mut Row, cell: Cell) {
    let column = Column::loaded(cell.qualifier, Value::from_bytes(cell.value), cell.visibility);
    row.family_mut(&cell.family).add_column(column);
}
