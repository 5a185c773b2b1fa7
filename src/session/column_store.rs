use crate::auth::ModelUserContext;
use crate::config::{BatchWriterConfig, SessionConfig};
use crate::error::ModelError;
use crate::model::{ColumnFamily, Row, RowKey};
use crate::mutation::RowMutation;
use crate::scan::{KeyRange, RowGrouper};
use crate::session::{
    ColumnSelection, FlushPolicy, ModelSession, RowIter, WriteOutcome, single_row,
};
use crate::store::{
    FilterSetting, ROW_DELETING_FILTER, ScanSpec, ServerFilter, StoreBatchWriter, StoreClient,
    StoreConnector, StoreError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Session over a sorted column-family store.
///
/// Each table gets one cached batch writer, created on first use. The
/// row-deleting filter is attached to a table the first time it is scanned or
/// has a row deleted, and remembered for the life of the session. Reads
/// require a [`ModelUserContext::Labels`] context.
pub struct ColumnStoreSession {
    connector: Option<Arc<dyn StoreConnector>>,
    client: Option<Arc<dyn StoreClient>>,
    autoflush: bool,
    writer_config: BatchWriterConfig,
    writers: Mutex<HashMap<String, Arc<dyn StoreBatchWriter>>>,
    row_deleting_attached: Mutex<HashSet<String>>,
}

impl ColumnStoreSession {
    /// An unconnected session; [`ModelSession::init`] connects through `connector`.
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector: Some(connector),
            client: None,
            autoflush: true,
            writer_config: BatchWriterConfig::default(),
            writers: Mutex::new(HashMap::new()),
            row_deleting_attached: Mutex::new(HashSet::new()),
        }
    }

    /// A session over an already connected client.
    pub fn with_client(
        client: Arc<dyn StoreClient>,
        autoflush: bool,
        writer_config: BatchWriterConfig,
    ) -> Self {
        Self {
            connector: None,
            client: Some(client),
            autoflush,
            writer_config,
            writers: Mutex::new(HashMap::new()),
            row_deleting_attached: Mutex::new(HashSet::new()),
        }
    }

    pub fn autoflush(&self) -> bool {
        self.autoflush
    }

    pub fn writer_config(&self) -> &BatchWriterConfig {
        &self.writer_config
    }

    pub fn client(&self) -> Result<&Arc<dyn StoreClient>, ModelError> {
        self.client.as_ref().ok_or_else(|| ModelError::Unavailable {
            message: "session is not initialized".into(),
        })
    }

    /// The table's cached writer, created under the registry lock on a miss so
    /// concurrent first writers share one instance.
    fn batch_writer(&self, table: &str) -> Result<Arc<dyn StoreBatchWriter>, ModelError> {
        let client = self.client()?;
        let mut writers = self.writers.lock();
        if let Some(writer) = writers.get(table) {
            return Ok(Arc::clone(writer));
        }
        let writer = client.create_batch_writer(table, &self.writer_config)?;
        debug!(table, "created batch writer");
        writers.insert(table.to_string(), Arc::clone(&writer));
        Ok(writer)
    }

    fn writers_snapshot(&self) -> Vec<(String, Arc<dyn StoreBatchWriter>)> {
        self.writers
            .lock()
            .iter()
            .map(|(table, writer)| (table.clone(), Arc::clone(writer)))
            .collect()
    }

    fn ensure_row_deleting_filter(&self, table: &str) -> Result<(), ModelError> {
        let client = self.client()?;
        let mut attached = self.row_deleting_attached.lock();
        if attached.contains(table) {
            return Ok(());
        }
        let filters = client.list_filters(table)?;
        if !filters.iter().any(|name| name == ROW_DELETING_FILTER) {
            match client.attach_filter(table, FilterSetting::row_deleting()) {
                Ok(()) => debug!(table, "attached row deleting filter"),
                Err(StoreError::FilterExists { .. }) => {
                    debug!(table, "row deleting filter attached by another session");
                }
                Err(err) => return Err(err.into()),
            }
        }
        attached.insert(table.to_string());
        Ok(())
    }

    fn scan_rows(
        &self,
        table: &str,
        user: &ModelUserContext,
        spec: ScanSpec,
    ) -> Result<RowIter<'_>, ModelError> {
        let auths = user.require_labels()?;
        let client = self.client()?;
        self.ensure_row_deleting_filter(table)?;
        let cells = client.scan(table, auths, spec.with_filter(ServerFilter::RowDeleting))?;
        Ok(Box::new(RowGrouper::new(
            table,
            cells.map(|cell| cell.map_err(ModelError::from)),
        )))
    }

    fn flush_writer(
        &self,
        writer: &Arc<dyn StoreBatchWriter>,
        flush: FlushPolicy,
    ) -> Result<(), ModelError> {
        if flush.should_flush(self.autoflush) {
            writer.flush()?;
        }
        Ok(())
    }
}

impl ModelSession for ColumnStoreSession {
    fn init(&mut self, properties: &HashMap<String, String>) -> Result<(), ModelError> {
        let config = SessionConfig::from_properties(properties)?;
        let connector = self.connector.as_ref().ok_or_else(|| ModelError::Unavailable {
            message: "no store connector configured".into(),
        })?;
        let client = connector
            .connect(&config.connection)
            .map_err(|e| ModelError::Unavailable {
                message: e.to_string(),
            })?;
        debug!(
            instance = %config.connection.instance_name,
            user = %config.connection.username,
            autoflush = config.autoflush,
            "column store session initialized"
        );
        self.client = Some(client);
        self.autoflush = config.autoflush;
        self.writer_config = config.writer;
        Ok(())
    }

    fn save(&self, row: &Row, flush: FlushPolicy) -> Result<WriteOutcome, ModelError> {
        trace!(table = row.table_name(), row_key = %row.row_key(), ?flush, "save");
        let writer = self.batch_writer(row.table_name())?;
        let Some(mutation) = RowMutation::from_row(row)? else {
            return Ok(WriteOutcome::NothingToWrite);
        };
        writer.add_mutation(mutation)?;
        self.flush_writer(&writer, flush)?;
        Ok(WriteOutcome::Submitted)
    }

    fn save_many(&self, table: &str, rows: &[Row], flush: FlushPolicy) -> Result<usize, ModelError> {
        trace!(table, rows = rows.len(), ?flush, "save_many");
        if rows.is_empty() {
            return Ok(0);
        }
        let writer = self.batch_writer(table)?;
        let mut submitted = 0;
        for row in rows {
            if let Some(mutation) = RowMutation::from_row(row)? {
                writer.add_mutation(mutation)?;
                submitted += 1;
            }
        }
        self.flush_writer(&writer, flush)?;
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
        self.scan_rows(table, user, ScanSpec::new(KeyRange::half_open(start, end)))
    }

    fn find_by_row_starts_with(
        &self,
        table: &str,
        prefix: &str,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError> {
        trace!(table, prefix, "find_by_row_starts_with");
        self.scan_rows(table, user, ScanSpec::new(KeyRange::prefix(prefix)))
    }

    fn find_by_row_key_regex(
        &self,
        table: &str,
        regex: &str,
        user: &ModelUserContext,
    ) -> Result<RowIter<'_>, ModelError> {
        trace!(table, regex, "find_by_row_key_regex");
        let spec = ScanSpec::default().with_filter(ServerFilter::RowRegex(regex.to_string()));
        self.scan_rows(table, user, spec)
    }

    fn find_all(&self, table: &str, user: &ModelUserContext) -> Result<RowIter<'_>, ModelError> {
        trace!(table, "find_all");
        self.scan_rows(table, user, ScanSpec::default())
    }

    fn row_count(&self, table: &str, user: &ModelUserContext) -> Result<u64, ModelError> {
        trace!(table, "row_count");
        self.scan_rows(table, user, ScanSpec::default())?
            .try_fold(0_u64, |count, row| row.map(|_| count + 1))
    }

    fn find_by_row_key(
        &self,
        table: &str,
        row_key: &str,
        user: &ModelUserContext,
    ) -> Result<Option<Row>, ModelError> {
        trace!(table, row_key, "find_by_row_key");
        let rows = self.scan_rows(table, user, ScanSpec::new(KeyRange::exact(row_key)))?;
        single_row(table, row_key, rows)
    }

    fn find_by_row_key_columns(
        &self,
        table: &str,
        row_key: &str,
        columns: &ColumnSelection,
        user: &ModelUserContext,
    ) -> Result<Option<Row>, ModelError> {
        trace!(table, row_key, ?columns, "find_by_row_key_columns");
        let spec = ScanSpec::new(KeyRange::exact(row_key)).with_fetch(columns.to_fetch());
        single_row(table, row_key, self.scan_rows(table, user, spec)?)
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
        let spec = ScanSpec::new(KeyRange::exact(row_key))
            .with_filter(ServerFilter::FamilyRegex(family_regex.to_string()));
        let Some(row) = single_row(table, row_key, self.scan_rows(table, user, spec)?)? else {
            return Ok(Vec::new());
        };
        Ok(row
            .into_column_families()
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn initialize_table(&self, table: &str, _user: &ModelUserContext) -> Result<(), ModelError> {
        debug!(table, "initialize_table");
        let client = self.client()?;
        if client.table_exists(table)? {
            return Ok(());
        }
        match client.create_table(table) {
            Ok(()) => Ok(()),
            Err(StoreError::TableExists(_)) => {
                warn!(table, "table created concurrently during initialize");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn delete_table(&self, table: &str, _user: &ModelUserContext) -> Result<(), ModelError> {
        debug!(table, "delete_table");
        let client = self.client()?;
        let cached = self.writers.lock().remove(table);
        if let Some(writer) = cached {
            writer.close()?;
        }
        self.row_deleting_attached.lock().remove(table);
        if !client.table_exists(table)? {
            return Ok(());
        }
        match client.delete_table(table) {
            Ok(()) | Err(StoreError::TableNotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_row(&self, table: &str, row_key: &RowKey, _user: &ModelUserContext) -> Result<(), ModelError> {
        trace!(table, row_key = %row_key, "delete_row");
        let client = self.client()?;
        self.ensure_row_deleting_filter(table)?;
        // Buffered writes issued before the delete must land before the marker.
        let cached = self.writers.lock().get(table).cloned();
        if let Some(writer) = cached {
            writer.flush()?;
        }
        let writer = client.create_batch_writer(table, &self.writer_config)?;
        writer.add_mutation(RowMutation::delete_row_marker(row_key.clone()))?;
        writer.close()?;
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
        let client = self.client()?;
        let writer = self.batch_writer(table)?;
        let mut mutation = RowMutation::from_row(row)?
            .unwrap_or_else(|| RowMutation::new(row.row_key().clone()));
        mutation.delete(family, qualifier, visibility)?;
        writer.add_mutation(mutation)?;
        if self.autoflush {
            writer.flush()?;
            client.flush_table(table)?;
        }
        Ok(())
    }

    fn table_list(&self, _user: &ModelUserContext) -> Result<Vec<String>, ModelError> {
        Ok(self.client()?.list_tables()?)
    }

    /// Every cached writer is flushed and closed even when one fails; the
    /// first failure is returned.
    fn close(&self) -> Result<(), ModelError> {
        let flushed = self.flush();
        let writers = std::mem::take(&mut *self.writers.lock());
        let mut first_err = None;
        for (table, writer) in writers {
            if let Err(e) = writer.close() {
                warn!(table = %table, error = %e, "could not close writer");
                first_err.get_or_insert(ModelError::MutationsRejected {
                    table,
                    message: format!("could not close writer: {e}"),
                });
            }
        }
        flushed?;
        first_err.map_or(Ok(()), Err)
    }

    fn flush(&self) -> Result<(), ModelError> {
        let mut first_err = None;
        for (table, writer) in self.writers_snapshot() {
            if let Err(e) = writer.flush() {
                warn!(table = %table, error = %e, "could not flush writer");
                first_err.get_or_insert(ModelError::MutationsRejected {
                    table,
                    message: format!("could not flush writer: {e}"),
                });
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn create_user_context(&self, authorizations: &[&str]) -> Result<ModelUserContext, ModelError> {
        ModelUserContext::labels(authorizations.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::ColumnStoreSession;
    use crate::auth::ModelUserContext;
    use crate::config::BatchWriterConfig;
    use crate::model::Row;
    use crate::session::{FlushPolicy, ModelSession};
    use crate::store::{
        CellStream, EmbeddedStore, FilterSetting, ScanSpec, StoreBatchWriter, StoreClient,
        StoreConnector, StoreError,
    };
    use crate::visibility::Authorizations;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn connected(store: &EmbeddedStore) -> Arc<dyn StoreClient> {
        store.add_user("root", "pw", Authorizations::empty());
        let settings = crate::config::ConnectionSettings {
            instance_name: "test".into(),
            zookeeper_servers: vec!["zk".into()],
            username: "root".into(),
            password: zeroize::Zeroizing::new("pw".into()),
        };
        store.connect(&settings).expect("connect")
    }

    /// Reports no filters, as a listing taken before another session attached one would.
    struct StaleFilterListing(Arc<dyn StoreClient>);

    impl StoreClient for StaleFilterListing {
        fn create_table(&self, table: &str) -> Result<(), StoreError> {
            self.0.create_table(table)
        }
        fn delete_table(&self, table: &str) -> Result<(), StoreError> {
            self.0.delete_table(table)
        }
        fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
            self.0.table_exists(table)
        }
        fn list_tables(&self) -> Result<Vec<String>, StoreError> {
            self.0.list_tables()
        }
        fn list_filters(&self, _table: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        fn attach_filter(&self, table: &str, setting: FilterSetting) -> Result<(), StoreError> {
            self.0.attach_filter(table, setting)
        }
        fn flush_table(&self, table: &str) -> Result<(), StoreError> {
            self.0.flush_table(table)
        }
        fn create_batch_writer(
            &self,
            table: &str,
            config: &BatchWriterConfig,
        ) -> Result<Arc<dyn StoreBatchWriter>, StoreError> {
            self.0.create_batch_writer(table, config)
        }
        fn scan(
            &self,
            table: &str,
            auths: &Authorizations,
            spec: ScanSpec,
        ) -> Result<CellStream, StoreError> {
            self.0.scan(table, auths, spec)
        }
    }

    #[test]
    fn operations_before_init_report_unavailable() {
        let session = ColumnStoreSession::new(Arc::new(EmbeddedStore::new("test")));
        let user = ModelUserContext::labels([""]).expect("ctx");
        let err = session.table_list(&user).expect_err("not initialized");
        assert_eq!(err.code_str(), "unavailable");
    }

    #[test]
    fn init_reports_missing_properties_before_connecting() {
        let mut session = ColumnStoreSession::new(Arc::new(EmbeddedStore::new("test")));
        let err = session.init(&HashMap::new()).expect_err("missing");
        assert_eq!(err.code_str(), "invalid_config");
    }

    #[test]
    fn unrestricted_context_cannot_scan() {
        let store = EmbeddedStore::new("test");
        store.add_user("root", "pw", crate::visibility::Authorizations::empty());
        let mut props = HashMap::new();
        props.insert("bigtable.accumulo.instanceName".to_string(), "test".to_string());
        props.insert("bigtable.accumulo.username".to_string(), "root".to_string());
        props.insert("bigtable.accumulo.password".to_string(), "pw".to_string());
        props.insert("bigtable.accumulo.zookeeperServerNames".to_string(), "zk".to_string());
        let mut session = ColumnStoreSession::new(Arc::new(store.clone()) as Arc<dyn StoreConnector>);
        session.init(&props).expect("init");

        let labels = session.create_user_context(&[""]).expect("ctx");
        session.initialize_table("t", &labels).expect("table");
        let err = session
            .find_all("t", &ModelUserContext::Unrestricted)
            .err()
            .expect("denied");
        assert_eq!(err.code_str(), "permission_denied");
    }

    #[test]
    fn save_without_changes_still_resolves_the_table() {
        let store = EmbeddedStore::new("test");
        store.add_user("root", "pw", crate::visibility::Authorizations::empty());
        let settings = crate::config::ConnectionSettings {
            instance_name: "test".into(),
            zookeeper_servers: vec!["zk".into()],
            username: "root".into(),
            password: zeroize::Zeroizing::new("pw".into()),
        };
        let client = store.connect(&settings).expect("connect");
        let session = ColumnStoreSession::with_client(client, true, BatchWriterConfig::default());
        let row = Row::new("missing", "k").expect("row");
        let err = session.save(&row, FlushPolicy::Default).expect_err("no table");
        assert!(err.is_table_not_found());
    }

    #[test]
    fn filter_attached_between_listing_and_attach_is_accepted() {
        let store = EmbeddedStore::new("test");
        let client = connected(&store);
        client.create_table("t").expect("table");
        client
            .attach_filter("t", FilterSetting::row_deleting())
            .expect("attached elsewhere");

        let session = ColumnStoreSession::with_client(
            Arc::new(StaleFilterListing(client)),
            true,
            BatchWriterConfig::default(),
        );
        let user = session.create_user_context(&[""]).expect("ctx");
        let mut row = Row::new("t", "k").expect("row");
        row.family_mut("f").set("q", 1i64);
        session.save(&row, FlushPolicy::Flush).expect("save");
        assert!(session.find_by_row_key("t", "k", &user).expect("find").is_some());

        session.delete_row("t", row.row_key(), &user).expect("delete");
        assert!(session.find_by_row_key("t", "k", &user).expect("find").is_none());
    }

    #[test]
    fn close_reaches_every_writer_when_one_fails() {
        let store = EmbeddedStore::new("test");
        let client = connected(&store);
        client.create_table("gone").expect("table");
        client.create_table("kept").expect("table");
        let config = BatchWriterConfig {
            max_latency: Duration::from_secs(600),
            ..BatchWriterConfig::default()
        };
        let session = ColumnStoreSession::with_client(client.clone(), false, config);
        for table in ["gone", "kept"] {
            let mut row = Row::new(table, "k").expect("row");
            row.family_mut("f").set("q", 1i64);
            session.save(&row, FlushPolicy::NoFlush).expect("buffered");
        }
        client.delete_table("gone").expect("dropped behind the session");

        let err = session.close().expect_err("dropped table");
        assert_eq!(err.code_str(), "mutations_rejected");

        let reader = ColumnStoreSession::with_client(client, true, BatchWriterConfig::default());
        let user = reader.create_user_context(&[""]).expect("ctx");
        assert!(reader.find_by_row_key("kept", "k", &user).expect("find").is_some());
        assert!(session.close().is_ok());
    }
}
