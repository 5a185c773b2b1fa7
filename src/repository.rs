use crate::auth::ModelUserContext;
use crate::error::ModelError;
use crate::model::{DirtyBits, Row, RowKey, Value};
use crate::session::{ColumnSelection, FlushPolicy, ModelSession, WriteOutcome};
use std::sync::Arc;

/// Converts between one domain type and its row representation.
pub trait RowMapper: Send + Sync {
    type Entity: DirtyBits;

    fn table_name(&self) -> &str;

    fn from_row(&self, row: Row) -> Result<Self::Entity, RowDecodeError>;

    fn to_row(&self, entity: &Self::Entity) -> Result<Row, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowDecodeError {
    #[error("missing column '{family}:{column}'")]
    MissingColumn { family: String, column: String },
    #[error("column '{family}:{column}' cannot be read as {expected}: {message}")]
    TypeMismatch {
        family: String,
        column: String,
        expected: &'static str,
        message: String,
    },
    #[error("{message}")]
    Custom { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
}

/// Typed access to one table through a [`ModelSession`].
///
/// Every entity handed out has its dirty bits cleared, so saving it back
/// unmodified writes nothing.
pub struct Repository<M: RowMapper> {
    session: Arc<dyn ModelSession>,
    mapper: M,
}

impl<M: RowMapper> Repository<M> {
    pub fn new(session: Arc<dyn ModelSession>, mapper: M) -> Self {
        Self { session, mapper }
    }

    pub fn session(&self) -> &Arc<dyn ModelSession> {
        &self.session
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    pub fn table_name(&self) -> &str {
        self.mapper.table_name()
    }

    fn decode(&self, row: Row) -> Result<M::Entity, RepositoryError> {
        let mut entity = self.mapper.from_row(row)?;
        entity.set_dirty_bits(false);
        Ok(entity)
    }

    pub fn find_by_row_key(
        &self,
        row_key: &str,
        user: &ModelUserContext,
    ) -> Result<Option<M::Entity>, RepositoryError> {
        self.session
            .find_by_row_key(self.table_name(), row_key, user)?
            .map(|row| self.decode(row))
            .transpose()
    }

    pub fn find_by_row_key_columns(
        &self,
        row_key: &str,
        columns: &ColumnSelection,
        user: &ModelUserContext,
    ) -> Result<Option<M::Entity>, RepositoryError> {
        self.session
            .find_by_row_key_columns(self.table_name(), row_key, columns, user)?
            .map(|row| self.decode(row))
            .transpose()
    }

    /// Lazily decodes rows as the underlying scan yields them.
    pub fn find_by_row_starts_with<'a>(
        &'a self,
        prefix: &str,
        user: &ModelUserContext,
    ) -> Result<impl Iterator<Item = Result<M::Entity, RepositoryError>> + use<'a, M>, RepositoryError> {
        let rows = self
            .session
            .find_by_row_starts_with(self.table_name(), prefix, user)?;
        Ok(rows.map(move |row| self.decode(row?)))
    }

    pub fn find_all<'a>(
        &'a self,
        user: &ModelUserContext,
    ) -> Result<impl Iterator<Item = Result<M::Entity, RepositoryError>> + use<'a, M>, RepositoryError> {
        let rows = self.session.find_all(self.table_name(), user)?;
        Ok(rows.map(move |row| self.decode(row?)))
    }

    pub fn save(&self, entity: &M::Entity, flush: FlushPolicy) -> Result<WriteOutcome, RepositoryError> {
        let row = self.mapper.to_row(entity)?;
        Ok(self.session.save(&row, flush)?)
    }

    pub fn save_many(&self, entities: &[M::Entity], flush: FlushPolicy) -> Result<usize, RepositoryError> {
        let rows = entities
            .iter()
            .map(|entity| self.mapper.to_row(entity))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.session.save_many(self.table_name(), &rows, flush)?)
    }

    pub fn delete(&self, row_key: &RowKey, user: &ModelUserContext) -> Result<(), RepositoryError> {
        Ok(self.session.delete_row(self.table_name(), row_key, user)?)
    }

    pub fn flush(&self) -> Result<(), RepositoryError> {
        Ok(self.session.flush()?)
    }
}

fn value_in<'a>(row: &'a Row, family: &str, column: &str) -> Result<&'a Value, RowDecodeError> {
    row.get(family)
        .and_then(|f| f.get(column))
        .ok_or_else(|| RowDecodeError::MissingColumn {
            family: family.to_string(),
            column: column.to_string(),
        })
}

fn typed_in<T>(
    row: &Row,
    family: &str,
    column: &str,
    expected: &'static str,
    read: impl FnOnce(&Value) -> Result<T, ModelError>,
) -> Result<T, RowDecodeError> {
    read(value_in(row, family, column)?).map_err(|e| RowDecodeError::TypeMismatch {
        family: family.to_string(),
        column: column.to_string(),
        expected,
        message: e.to_string(),
    })
}

pub fn text_in(row: &Row, family: &str, column: &str) -> Result<String, RowDecodeError> {
    typed_in(row, family, column, "text", Value::to_text)
}

pub fn long_in(row: &Row, family: &str, column: &str) -> Result<i64, RowDecodeError> {
    typed_in(row, family, column, "long", Value::to_long)
}

pub fn integer_in(row: &Row, family: &str, column: &str) -> Result<i32, RowDecodeError> {
    typed_in(row, family, column, "integer", Value::to_integer)
}

pub fn double_in(row: &Row, family: &str, column: &str) -> Result<f64, RowDecodeError> {
    typed_in(row, family, column, "double", Value::to_double)
}

pub fn bytes_in(row: &Row, family: &str, column: &str) -> Result<Vec<u8>, RowDecodeError> {
    Ok(value_in(row, family, column)?.to_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::{RowDecodeError, bytes_in, double_in, integer_in, long_in, text_in};
    use crate::model::Row;

    #[test]
    fn typed_helpers_read_fixed_width_values() {
        let mut row = Row::new("t", "k").expect("row");
        row.family_mut("f")
            .set("name", "ada")
            .set("age", 36_i32)
            .set("id", 7_i64)
            .set("score", 1.5_f64);
        assert_eq!(text_in(&row, "f", "name").expect("text"), "ada");
        assert_eq!(integer_in(&row, "f", "age").expect("int"), 36);
        assert_eq!(long_in(&row, "f", "id").expect("long"), 7);
        assert_eq!(double_in(&row, "f", "score").expect("double"), 1.5);
        assert_eq!(bytes_in(&row, "f", "name").expect("bytes"), b"ada".to_vec());
    }

    #[test]
    fn typed_helpers_report_missing_and_mismatched_columns() {
        let mut row = Row::new("t", "k").expect("row");
        row.family_mut("f").set("name", "ada");
        assert_eq!(
            long_in(&row, "f", "absent").expect_err("missing"),
            RowDecodeError::MissingColumn {
                family: "f".into(),
                column: "absent".into()
            }
        );
        assert!(matches!(
            long_in(&row, "f", "name"),
            Err(RowDecodeError::TypeMismatch { expected: "long", .. })
        ));
        assert!(text_in(&row, "other", "name").is_err());
    }
}
