//! In-process implementation of the store client contract.
//!
//! Each table is a `BTreeMap` of versioned cells ordered by
//! `(row, family, qualifier, visibility, timestamp desc)`. Timestamps come
//! from a store-wide logical clock when a writer flushes, one tick per cell,
//! so later submissions always shadow earlier ones. Scans resolve the newest
//! version of every cell, apply tombstones and row-deleting markers, evaluate
//! visibility against the scan's authorizations and only then hand cells out.

use crate::config::{BatchWriterConfig, ConnectionSettings};
use crate::mutation::{CellOp, DELETE_ROW_VALUE, RowMutation};
use crate::scan::{Cell, KeyRange};
use crate::store::{
    CellStream, FetchColumn, FilterSetting, ScanSpec, ServerFilter, StoreBatchWriter, StoreClient,
    StoreConnector, StoreError,
};
use crate::visibility::{Authorizations, ColumnVisibility};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// Rows resolved per read-lock acquisition while scanning.
const SCAN_BATCH_ROWS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CellKey {
    row: Vec<u8>,
    family: String,
    qualifier: String,
    visibility: String,
    timestamp: Reverse<u64>,
}

impl CellKey {
    /// Smallest possible key of `row`.
    fn row_start(row: Vec<u8>) -> Self {
        Self {
            row,
            family: String::new(),
            qualifier: String::new(),
            visibility: String::new(),
            timestamp: Reverse(u64::MAX),
        }
    }

    fn same_column(&self, other: &CellKey) -> bool {
        self.row == other.row
            && self.family == other.family
            && self.qualifier == other.qualifier
            && self.visibility == other.visibility
    }

    fn is_marker_column(&self) -> bool {
        self.family.is_empty() && self.qualifier.is_empty() && self.visibility.is_empty()
    }
}

#[derive(Debug, Clone)]
struct CellEntry {
    value: Vec<u8>,
    deleted: bool,
}

struct Table {
    name: String,
    cells: RwLock<BTreeMap<CellKey, CellEntry>>,
    filters: RwLock<Vec<FilterSetting>>,
    dropped: AtomicBool,
}

impl Table {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cells: RwLock::new(BTreeMap::new()),
            filters: RwLock::new(Vec::new()),
            dropped: AtomicBool::new(false),
        }
    }

    fn has_row_deleting_filter(&self) -> bool {
        self.filters
            .read()
            .iter()
            .any(|f| f.filter == ServerFilter::RowDeleting)
    }

    /// Rewrites the table keeping only the cells a scan could still return.
    fn compact(&self) {
        let row_deleting = self.has_row_deleting_filter();
        let mut cells = self.cells.write();
        let before = cells.len();
        let mut entries = std::mem::take(&mut *cells).into_iter().peekable();
        while let Some(first) = entries.next() {
            let mut group = vec![first];
            while let Some(next) = entries.next_if(|(k, _)| k.row == group[0].0.row) {
                group.push(next);
            }
            let refs: Vec<(&CellKey, &CellEntry)> = group.iter().map(|(k, e)| (k, e)).collect();
            let mut keep = vec![false; group.len()];
            for idx in resolve_row(&refs, row_deleting) {
                keep[idx] = true;
            }
            for ((key, entry), keep) in group.into_iter().zip(keep) {
                if keep {
                    cells.insert(key, entry);
                }
            }
        }
        debug!(table = %self.name, before, after = cells.len(), "compacted table");
    }
}

/// Indices of the entries (one row, key order) a reader may see: the newest
/// live version of each column that is not suppressed by a row-deleting marker.
fn resolve_row(entries: &[(&CellKey, &CellEntry)], row_deleting: bool) -> Vec<usize> {
    let marker_ts = if row_deleting {
        entries
            .first()
            .filter(|(k, e)| k.is_marker_column() && !e.deleted && e.value == DELETE_ROW_VALUE)
            .map(|(k, _)| k.timestamp.0)
    } else {
        None
    };

    let mut visible = Vec::new();
    let mut idx = 0;
    while idx < entries.len() {
        let (key, entry) = entries[idx];
        if !entry.deleted && marker_ts.is_none_or(|marker| key.timestamp.0 > marker) {
            visible.push(idx);
        }
        idx += 1;
        while idx < entries.len() && entries[idx].0.same_column(key) {
            idx += 1;
        }
    }
    visible
}

struct UserGrant {
    password: Zeroizing<String>,
    authorizations: Authorizations,
}

struct StoreInner {
    instance_name: String,
    users: RwLock<HashMap<String, UserGrant>>,
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
    clock: AtomicU64,
    writers_created: AtomicUsize,
    mutations_applied: AtomicUsize,
}

impl StoreInner {
    fn table(&self, name: &str) -> Result<Arc<Table>, StoreError> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    fn apply(&self, table: &Table, batch: Vec<RowMutation>) -> Result<(), StoreError> {
        if table.dropped.load(Ordering::Acquire) {
            return Err(StoreError::MutationsRejected {
                table: table.name.clone(),
                message: format!("{} mutations target a deleted table", batch.len()),
            });
        }
        let mut cells = table.cells.write();
        for mutation in batch {
            let row = mutation.row_key().as_bytes().to_vec();
            for op in mutation.into_ops() {
                let timestamp = Reverse(self.clock.fetch_add(1, Ordering::SeqCst) + 1);
                let (key, entry) = match op {
                    CellOp::Put {
                        family,
                        qualifier,
                        visibility,
                        value,
                    } => (
                        CellKey {
                            row: row.clone(),
                            family,
                            qualifier,
                            visibility,
                            timestamp,
                        },
                        CellEntry {
                            value,
                            deleted: false,
                        },
                    ),
                    CellOp::Delete {
                        family,
                        qualifier,
                        visibility,
                    } => (
                        CellKey {
                            row: row.clone(),
                            family,
                            qualifier,
                            visibility,
                            timestamp,
                        },
                        CellEntry {
                            value: Vec::new(),
                            deleted: true,
                        },
                    ),
                };
                cells.insert(key, entry);
            }
            self.mutations_applied.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// A self-contained store instance. Cloning shares the same data.
#[derive(Clone)]
pub struct EmbeddedStore {
    inner: Arc<StoreInner>,
}

impl EmbeddedStore {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                instance_name: instance_name.into(),
                users: RwLock::new(HashMap::new()),
                tables: RwLock::new(BTreeMap::new()),
                clock: AtomicU64::new(0),
                writers_created: AtomicUsize::new(0),
                mutations_applied: AtomicUsize::new(0),
            }),
        }
    }

    /// Registers (or replaces) a user and the labels it may scan with.
    pub fn add_user(&self, username: &str, password: &str, authorizations: Authorizations) {
        self.inner.users.write().insert(
            username.to_string(),
            UserGrant {
                password: Zeroizing::new(password.to_string()),
                authorizations,
            },
        );
    }

    pub fn instance_name(&self) -> &str {
        &self.inner.instance_name
    }

    /// Batch writers handed out so far, across all clients.
    pub fn writers_created(&self) -> usize {
        self.inner.writers_created.load(Ordering::Relaxed)
    }

    /// Row mutations persisted so far.
    pub fn mutations_applied(&self) -> usize {
        self.inner.mutations_applied.load(Ordering::Relaxed)
    }

    /// Physical entries held for `table`, every version and tombstone included.
    pub fn stored_entries(&self, table: &str) -> Result<usize, StoreError> {
        Ok(self.inner.table(table)?.cells.read().len())
    }
}

impl StoreConnector for EmbeddedStore {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn StoreClient>, StoreError> {
        if settings.instance_name != self.inner.instance_name {
            return Err(StoreError::Unavailable(format!(
                "no instance named {}",
                settings.instance_name
            )));
        }
        if settings.zookeeper_servers.is_empty() {
            return Err(StoreError::Unavailable(
                "no coordination servers configured".into(),
            ));
        }
        let users = self.inner.users.read();
        let grant = users
            .get(&settings.username)
            .filter(|grant| grant.password.as_str() == settings.password.as_str())
            .ok_or_else(|| {
                StoreError::Security(format!("bad credentials for user {}", settings.username))
            })?;
        debug!(
            instance = %self.inner.instance_name,
            user = %settings.username,
            "connected to embedded store"
        );
        Ok(Arc::new(EmbeddedClient {
            inner: Arc::clone(&self.inner),
            user: settings.username.clone(),
            granted: grant.authorizations.clone(),
        }))
    }
}

struct EmbeddedClient {
    inner: Arc<StoreInner>,
    user: String,
    granted: Authorizations,
}

impl StoreClient for EmbeddedClient {
    fn create_table(&self, table: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.tables.write();
        if tables.contains_key(table) {
            return Err(StoreError::TableExists(table.to_string()));
        }
        tables.insert(table.to_string(), Arc::new(Table::new(table)));
        debug!(table, "created table");
        Ok(())
    }

    fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        let removed = self
            .inner
            .tables
            .write()
            .remove(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        removed.dropped.store(true, Ordering::Release);
        debug!(table, "deleted table");
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.inner.tables.read().contains_key(table))
    }

    fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.tables.read().keys().cloned().collect())
    }

    fn list_filters(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let table = self.inner.table(table)?;
        let names = table.filters.read().iter().map(|f| f.name.clone()).collect();
        Ok(names)
    }

    fn attach_filter(&self, table: &str, setting: FilterSetting) -> Result<(), StoreError> {
        let table = self.inner.table(table)?;
        FilterChain::compile([&setting.filter])?;
        let mut filters = table.filters.write();
        if filters.iter().any(|f| f.name == setting.name) {
            return Err(StoreError::FilterExists {
                table: table.name.clone(),
                filter: setting.name,
            });
        }
        debug!(table = %table.name, filter = %setting.name, priority = setting.priority, "attached filter");
        filters.push(setting);
        filters.sort_by_key(|f| f.priority);
        Ok(())
    }

    fn flush_table(&self, table: &str) -> Result<(), StoreError> {
        self.inner.table(table)?.compact();
        Ok(())
    }

    fn create_batch_writer(
        &self,
        table: &str,
        config: &BatchWriterConfig,
    ) -> Result<Arc<dyn StoreBatchWriter>, StoreError> {
        let table = self.inner.table(table)?;
        self.inner.writers_created.fetch_add(1, Ordering::Relaxed);
        trace!(table = %table.name, user = %self.user, "created batch writer");
        Ok(Arc::new(EmbeddedWriter {
            inner: Arc::clone(&self.inner),
            table,
            config: *config,
            state: Mutex::new(WriterState::default()),
        }))
    }

    fn scan(
        &self,
        table: &str,
        auths: &Authorizations,
        spec: ScanSpec,
    ) -> Result<CellStream, StoreError> {
        if !auths.is_subset(&self.granted) {
            return Err(StoreError::Security(format!(
                "user {} is not granted authorizations [{auths}]",
                self.user
            )));
        }
        let table = self.inner.table(table)?;
        let attached: Vec<ServerFilter> =
            table.filters.read().iter().map(|f| f.filter.clone()).collect();
        let chain = FilterChain::compile(attached.iter().chain(spec.filters.iter()))?;
        let cursor = match &spec.range.start {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(start) => Bound::Included(CellKey::row_start(start.clone())),
            Bound::Excluded(start) => {
                let mut next = start.clone();
                next.push(0);
                Bound::Included(CellKey::row_start(next))
            }
        };
        Ok(Box::new(EmbeddedScan {
            table,
            auths: auths.clone(),
            range: spec.range,
            fetch: spec.fetch,
            chain,
            cursor,
            buffer: VecDeque::new(),
            exhausted: false,
            visibility: HashMap::new(),
        }))
    }
}

#[derive(Default)]
struct FilterChain {
    row_deleting: bool,
    row_patterns: Vec<Regex>,
    family_patterns: Vec<Regex>,
}

impl FilterChain {
    fn compile<'a>(filters: impl IntoIterator<Item = &'a ServerFilter>) -> Result<Self, StoreError> {
        let mut chain = FilterChain::default();
        for filter in filters {
            match filter {
                ServerFilter::RowDeleting => chain.row_deleting = true,
                ServerFilter::RowRegex(pattern) => chain.row_patterns.push(full_match(pattern)?),
                ServerFilter::FamilyRegex(pattern) => {
                    chain.family_patterns.push(full_match(pattern)?)
                }
            }
        }
        Ok(chain)
    }
}

fn full_match(pattern: &str) -> Result<Regex, StoreError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| StoreError::InvalidFilter {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

struct EmbeddedScan {
    table: Arc<Table>,
    auths: Authorizations,
    range: KeyRange,
    fetch: Vec<FetchColumn>,
    chain: FilterChain,
    cursor: Bound<CellKey>,
    buffer: VecDeque<Cell>,
    exhausted: bool,
    visibility: HashMap<String, bool>,
}

impl EmbeddedScan {
    /// Resolves up to [`SCAN_BATCH_ROWS`] rows past the cursor under one read lock.
    fn fill(&mut self) {
        let table = Arc::clone(&self.table);
        let cells = table.cells.read();
        let mut entries = cells
            .range((self.cursor.clone(), Bound::Unbounded))
            .peekable();
        let mut group: Vec<(&CellKey, &CellEntry)> = Vec::new();
        let mut rows = 0;
        loop {
            let row = match entries.peek() {
                Some((key, _)) if !self.range.is_past_end(&key.row) => key.row.clone(),
                _ => {
                    self.exhausted = true;
                    return;
                }
            };
            group.clear();
            while let Some(entry) = entries.next_if(|(key, _)| key.row == row) {
                group.push(entry);
            }
            self.emit_row(&row, &group);

            let mut next = row;
            next.push(0);
            self.cursor = Bound::Included(CellKey::row_start(next));
            rows += 1;
            if rows >= SCAN_BATCH_ROWS {
                return;
            }
        }
    }

    fn emit_row(&mut self, row: &[u8], group: &[(&CellKey, &CellEntry)]) {
        let row_text = String::from_utf8_lossy(row).into_owned();
        if !self.chain.row_patterns.iter().all(|p| p.is_match(&row_text)) {
            return;
        }
        for idx in resolve_row(group, self.chain.row_deleting) {
            let (key, entry) = group[idx];
            if !self.chain.family_patterns.iter().all(|p| p.is_match(&key.family)) {
                continue;
            }
            if !self.fetch.is_empty() && !self.fetch.iter().any(|f| f.matches(&key.family, &key.qualifier)) {
                continue;
            }
            if !is_visible(&mut self.visibility, &self.auths, &key.visibility) {
                continue;
            }
            self.buffer.push_back(Cell {
                row: row_text.clone(),
                family: key.family.clone(),
                qualifier: key.qualifier.clone(),
                visibility: key.visibility.clone(),
                timestamp: key.timestamp.0,
                value: entry.value.clone(),
            });
        }
    }
}

fn is_visible(cache: &mut HashMap<String, bool>, auths: &Authorizations, expression: &str) -> bool {
    if let Some(visible) = cache.get(expression) {
        return *visible;
    }
    // Labels are validated on write; anything unparseable stays hidden.
    let visible = ColumnVisibility::parse(expression)
        .map(|v| v.is_visible_to(auths))
        .unwrap_or(false);
    cache.insert(expression.to_string(), visible);
    visible
}

impl Iterator for EmbeddedScan {
    type Item = Result<Cell, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cell) = self.buffer.pop_front() {
                return Some(Ok(cell));
            }
            if self.exhausted {
                return None;
            }
            if self.table.dropped.load(Ordering::Acquire) {
                self.exhausted = true;
                return Some(Err(StoreError::TableNotFound(self.table.name.clone())));
            }
            self.fill();
        }
    }
}

#[derive(Default)]
struct WriterState {
    pending: Vec<RowMutation>,
    pending_bytes: usize,
    oldest: Option<Instant>,
    closed: bool,
}

struct EmbeddedWriter {
    inner: Arc<StoreInner>,
    table: Arc<Table>,
    config: BatchWriterConfig,
    state: Mutex<WriterState>,
}

impl EmbeddedWriter {
    fn drain(&self, state: &mut WriterState) -> Result<(), StoreError> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut state.pending);
        state.pending_bytes = 0;
        state.oldest = None;
        trace!(table = %self.table.name, mutations = batch.len(), "flushing batch writer");
        self.inner.apply(&self.table, batch)
    }
}

impl StoreBatchWriter for EmbeddedWriter {
    fn add_mutation(&self, mutation: RowMutation) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StoreError::MutationsRejected {
                table: self.table.name.clone(),
                message: "batch writer is closed".into(),
            });
        }
        if mutation.is_empty() {
            return Err(StoreError::InvalidMutation(format!(
                "mutation for row {} has no cells",
                mutation.row_key()
            )));
        }
        state.pending_bytes += mutation.estimated_size();
        state.pending.push(mutation);
        let oldest = *state.oldest.get_or_insert_with(Instant::now);
        if state.pending_bytes >= self.config.max_memory
            || oldest.elapsed() >= self.config.max_latency
        {
            self.drain(&mut state)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.drain(&mut state)
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        self.drain(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::EmbeddedStore;
    use crate::config::{BatchWriterConfig, ConnectionSettings};
    use crate::model::RowKey;
    use crate::mutation::RowMutation;
    use crate::scan::{Cell, KeyRange};
    use crate::store::{
        FilterSetting, ScanSpec, ServerFilter, StoreClient, StoreConnector, StoreError,
    };
    use crate::visibility::Authorizations;
    use std::sync::Arc;
    use zeroize::Zeroizing;

    fn client(store: &EmbeddedStore) -> Arc<dyn StoreClient> {
        store.add_user("root", "pw", Authorizations::new(["A", "B"]).expect("auths"));
        store
            .connect(&ConnectionSettings {
                instance_name: "test".into(),
                zookeeper_servers: vec!["localhost".into()],
                username: "root".into(),
                password: Zeroizing::new("pw".into()),
            })
            .expect("connect")
    }

    fn put(row: &str, family: &str, qualifier: &str, vis: &str, value: &str) -> RowMutation {
        let mut m = RowMutation::new(RowKey::from(row));
        m.put(family, qualifier, vis, value.as_bytes().to_vec())
            .expect("put");
        m
    }

    fn scan_all(client: &Arc<dyn StoreClient>, auths: &Authorizations) -> Vec<Cell> {
        client
            .scan("t", auths, ScanSpec::default())
            .expect("scan")
            .collect::<Result<_, _>>()
            .expect("cells")
    }

    #[test]
    fn connect_rejects_bad_credentials_and_unknown_instance() {
        let store = EmbeddedStore::new("test");
        store.add_user("root", "pw", Authorizations::empty());
        let mut settings = ConnectionSettings {
            instance_name: "test".into(),
            zookeeper_servers: vec!["zk".into()],
            username: "root".into(),
            password: Zeroizing::new("wrong".into()),
        };
        assert!(store.connect(&settings).is_err());
        settings.password = Zeroizing::new("pw".into());
        settings.instance_name = "other".into();
        assert!(store.connect(&settings).is_err());
    }

    #[test]
    fn newest_version_wins_and_tombstones_hide_cells() {
        let store = EmbeddedStore::new("test");
        let client = client(&store);
        client.create_table("t").expect("create");
        let writer = client
            .create_batch_writer("t", &BatchWriterConfig::default())
            .expect("writer");
        writer.add_mutation(put("r1", "f", "a", "", "old")).expect("add");
        writer.add_mutation(put("r1", "f", "a", "", "new")).expect("add");
        writer.add_mutation(put("r1", "f", "b", "", "gone")).expect("add");
        let mut delete = RowMutation::new(RowKey::from("r1"));
        delete.delete("f", "b", "").expect("delete");
        writer.add_mutation(delete).expect("add");
        writer.flush().expect("flush");

        let cells = scan_all(&client, &Authorizations::empty());
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].value, b"new");
    }

    #[test]
    fn visibility_is_enforced_inside_the_scan() {
        let store = EmbeddedStore::new("test");
        let client = client(&store);
        client.create_table("t").expect("create");
        let writer = client
            .create_batch_writer("t", &BatchWriterConfig::default())
            .expect("writer");
        writer.add_mutation(put("r1", "f", "a", "", "1")).expect("add");
        writer.add_mutation(put("r1", "f", "b", "A|B", "2")).expect("add");
        writer.add_mutation(put("r1", "f", "c", "A", "3")).expect("add");
        writer.close().expect("close");

        let b = Authorizations::new(["B"]).expect("auths");
        assert_eq!(scan_all(&client, &b).len(), 2);
        let ab = Authorizations::new(["A", "B"]).expect("auths");
        assert_eq!(scan_all(&client, &ab).len(), 3);

        let c = Authorizations::new(["C"]).expect("auths");
        let err = client.scan("t", &c, ScanSpec::default()).err().expect("denied");
        assert!(err.to_string().contains("not granted"));
    }

    #[test]
    fn row_deleting_marker_hides_earlier_cells_and_compaction_drops_them() {
        let store = EmbeddedStore::new("test");
        let client = client(&store);
        client.create_table("t").expect("create");
        client
            .attach_filter("t", FilterSetting::row_deleting())
            .expect("attach");
        let again = client
            .attach_filter("t", FilterSetting::row_deleting())
            .expect_err("attached twice");
        assert!(matches!(again, StoreError::FilterExists { .. }));
        let writer = client
            .create_batch_writer("t", &BatchWriterConfig::default())
            .expect("writer");
        writer.add_mutation(put("r1", "f", "a", "", "1")).expect("add");
        writer.add_mutation(put("r2", "f", "a", "", "2")).expect("add");
        writer
            .add_mutation(RowMutation::delete_row_marker(RowKey::from("r1")))
            .expect("marker");
        writer.flush().expect("flush");

        let rows: Vec<String> = scan_all(&client, &Authorizations::empty())
            .into_iter()
            .map(|c| c.row)
            .collect();
        assert_eq!(rows, ["r2"]);

        writer.add_mutation(put("r1", "f", "a", "", "again")).expect("add");
        writer.flush().expect("flush");
        assert_eq!(scan_all(&client, &Authorizations::empty()).len(), 2);

        assert_eq!(store.stored_entries("t").expect("entries"), 4);
        client.flush_table("t").expect("compact");
        assert_eq!(store.stored_entries("t").expect("entries"), 2);
    }

    #[test]
    fn scans_respect_ranges_and_regex_filters() {
        let store = EmbeddedStore::new("test");
        let client = client(&store);
        client.create_table("t").expect("create");
        let writer = client
            .create_batch_writer("t", &BatchWriterConfig::default())
            .expect("writer");
        for key in ["a1", "a2", "b1", "b2"] {
            writer.add_mutation(put(key, "f", "q", "", key)).expect("add");
        }
        writer.flush().expect("flush");

        let auths = Authorizations::empty();
        let rows = |spec: ScanSpec| -> Vec<String> {
            client
                .scan("t", &auths, spec)
                .expect("scan")
                .map(|c| c.expect("cell").row)
                .collect()
        };
        assert_eq!(rows(ScanSpec::new(KeyRange::half_open("a2", "b2"))), ["a2", "b1"]);
        assert_eq!(
            rows(ScanSpec::default().with_filter(ServerFilter::RowRegex(".*1".into()))),
            ["a1", "b1"]
        );
        assert!(rows(ScanSpec::default().with_filter(ServerFilter::RowRegex("1".into()))).is_empty());
        assert!(
            client
                .scan("t", &auths, ScanSpec::default().with_filter(ServerFilter::RowRegex("(".into())))
                .is_err()
        );
    }

    #[test]
    fn closed_writer_and_deleted_table_reject_mutations() {
        let store = EmbeddedStore::new("test");
        let client = client(&store);
        client.create_table("t").expect("create");
        let writer = client
            .create_batch_writer("t", &BatchWriterConfig::default())
            .expect("writer");
        writer.close().expect("close");
        assert!(writer.add_mutation(put("r", "f", "q", "", "v")).is_err());

        let writer = client
            .create_batch_writer("t", &BatchWriterConfig::default())
            .expect("writer");
        writer.add_mutation(put("r", "f", "q", "", "v")).expect("buffered");
        client.delete_table("t").expect("delete");
        let err = writer.flush().expect_err("rejected");
        assert!(err.to_string().contains("rejected"));
        assert_eq!(store.writers_created(), 2);
    }

    #[test]
    fn writer_flushes_itself_past_its_memory_limit() {
        let store = EmbeddedStore::new("test");
        let client = client(&store);
        client.create_table("t").expect("create");
        let config = BatchWriterConfig {
            max_memory: 1,
            ..BatchWriterConfig::default()
        };
        let writer = client.create_batch_writer("t", &config).expect("writer");
        writer.add_mutation(put("r", "f", "q", "", "v")).expect("add");
        assert_eq!(store.mutations_applied(), 1);
    }
}
