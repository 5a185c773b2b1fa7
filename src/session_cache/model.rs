use crate::error::ModelError;
use crate::model::{DirtyBits, Row, Value};
use crate::repository::{RepositoryError, RowDecodeError, RowMapper, long_in, text_in};
use std::collections::BTreeMap;

pub const TABLE_NAME: &str = "jetty_session";
pub const METADATA_FAMILY: &str = "metadata";
pub const DATA_FAMILY: &str = "data";

const CREATED: &str = "created";
const ACCESSED: &str = "accessed";
const CLUSTER_ID: &str = "clusterId";
const VERSION: &str = "version";

/// Persisted form of one HTTP session, keyed by its cluster id.
///
/// `metadata` holds creation/access times (epoch millis), the cluster id and
/// the version; `data` holds one JSON-encoded column per attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    row: Row,
}

impl SessionRow {
    pub fn new(cluster_id: &str) -> Result<Self, ModelError> {
        Ok(Self {
            row: Row::new(TABLE_NAME, cluster_id)?,
        })
    }

    pub fn cluster_id(&self) -> &str {
        self.row.row_key().as_str()
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    fn metadata_long(&self, column: &str) -> Option<i64> {
        long_in(&self.row, METADATA_FAMILY, column).ok()
    }

    pub fn created(&self) -> Option<i64> {
        self.metadata_long(CREATED)
    }

    pub fn accessed(&self) -> Option<i64> {
        self.metadata_long(ACCESSED)
    }

    pub fn version(&self) -> Option<i64> {
        self.metadata_long(VERSION)
    }

    pub fn stored_cluster_id(&self) -> Option<String> {
        text_in(&self.row, METADATA_FAMILY, CLUSTER_ID).ok()
    }

    pub fn set_created(&mut self, created: i64) {
        self.row.family_mut(METADATA_FAMILY).set(CREATED, created);
    }

    pub fn set_accessed(&mut self, accessed: i64) {
        self.row.family_mut(METADATA_FAMILY).set(ACCESSED, accessed);
    }

    pub fn set_version(&mut self, version: i64) {
        self.row.family_mut(METADATA_FAMILY).set(VERSION, version);
    }

    pub fn set_stored_cluster_id(&mut self, cluster_id: &str) {
        self.row.family_mut(METADATA_FAMILY).set(CLUSTER_ID, cluster_id);
    }

    pub fn attribute(&self, name: &str) -> Result<Option<serde_json::Value>, ModelError> {
        let Some(value) = self.row.get(DATA_FAMILY).and_then(|f| f.get(name)) else {
            return Ok(None);
        };
        decode_attribute(name, value).map(Some)
    }

    pub fn attributes(&self) -> Result<BTreeMap<String, serde_json::Value>, ModelError> {
        let Some(data) = self.row.get(DATA_FAMILY) else {
            return Ok(BTreeMap::new());
        };
        data.live_columns()
            .map(|column| {
                decode_attribute(column.name(), column.value())
                    .map(|value| (column.name().to_string(), value))
            })
            .collect()
    }

    pub fn set_attribute(&mut self, name: &str, value: &serde_json::Value) -> Result<(), ModelError> {
        let encoded = serde_json::to_vec(value)
            .map_err(|e| ModelError::Encode(format!("session attribute '{name}': {e}")))?;
        self.row.family_mut(DATA_FAMILY).set(name, encoded);
        Ok(())
    }

    /// Marks the attribute for deletion. Returns whether it was stored.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.row
            .get_mut(DATA_FAMILY)
            .is_some_and(|data| data.delete(name) > 0)
    }

    /// Brings the in-memory row in line with what was just written: deleted
    /// attributes are dropped and nothing is left pending.
    pub(crate) fn mark_persisted(&mut self) {
        self.row.retain_columns(|_, column| !column.is_delete());
        self.row.set_dirty_bits(false);
    }
}

impl DirtyBits for SessionRow {
    fn set_dirty_bits(&mut self, dirty: bool) {
        self.row.set_dirty_bits(dirty);
    }
}

fn decode_attribute(name: &str, value: &Value) -> Result<serde_json::Value, ModelError> {
    serde_json::from_slice(value.to_bytes())
        .map_err(|e| ModelError::Decode(format!("session attribute '{name}': {e}")))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionRowMapper;

impl RowMapper for SessionRowMapper {
    type Entity = SessionRow;

    fn table_name(&self) -> &str {
        TABLE_NAME
    }

    fn from_row(&self, row: Row) -> Result<SessionRow, RowDecodeError> {
        if row.table_name() != TABLE_NAME {
            return Err(RowDecodeError::Custom {
                message: format!("row from table '{}' is not a session row", row.table_name()),
            });
        }
        Ok(SessionRow { row })
    }

    fn to_row(&self, entity: &SessionRow) -> Result<Row, RepositoryError> {
        Ok(entity.row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{DATA_FAMILY, SessionRow, SessionRowMapper};
    use crate::model::{DirtyBits, Row};
    use crate::repository::RowMapper;
    use serde_json::json;

    #[test]
    fn metadata_and_attributes_round_trip_through_the_row() {
        let mut session = SessionRow::new("abc").expect("row");
        session.set_created(10);
        session.set_accessed(20);
        session.set_version(0);
        session.set_stored_cluster_id("abc");
        session
            .set_attribute("cart", &json!({"items": [1, 2]}))
            .expect("encode");

        assert_eq!(session.created(), Some(10));
        assert_eq!(session.accessed(), Some(20));
        assert_eq!(session.version(), Some(0));
        assert_eq!(session.stored_cluster_id().as_deref(), Some("abc"));
        assert_eq!(
            session.attribute("cart").expect("decode"),
            Some(json!({"items": [1, 2]}))
        );
        assert!(session.row().has_pending_writes());
    }

    #[test]
    fn persisting_drops_removed_attributes_and_clears_intents() {
        let mut session = SessionRow::new("abc").expect("row");
        session.set_attribute("a", &json!(1)).expect("encode");
        session.set_attribute("b", &json!(2)).expect("encode");
        session.set_dirty_bits(false);

        assert!(session.remove_attribute("a"));
        assert!(!session.remove_attribute("missing"));
        assert!(session.row().has_pending_writes());

        session.mark_persisted();
        assert!(!session.row().has_pending_writes());
        let names: Vec<_> = session.attributes().expect("decode").into_keys().collect();
        assert_eq!(names, ["b"]);
    }

    #[test]
    fn mapper_rejects_rows_of_other_tables() {
        let row = Row::new("other", "abc").expect("row");
        assert!(SessionRowMapper.from_row(row).is_err());

        let mut row = Row::new("jetty_session", "abc").expect("row");
        row.family_mut(DATA_FAMILY).set("x", b"not json".to_vec());
        let session = SessionRowMapper.from_row(row).expect("session row");
        assert_eq!(session.attribute("x").expect_err("bad json").code_str(), "decode");
    }
}
