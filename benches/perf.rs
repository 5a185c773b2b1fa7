use bigtable_model::config::{INSTANCE_NAME, PASSWORD, USERNAME, ZOOKEEPER_SERVER_NAMES};
use bigtable_model::scan::Cell;
use bigtable_model::{
    Authorizations, ColumnStoreSession, DirtyBits, EmbeddedStore, FlushPolicy, ModelError,
    ModelSession, Row, RowGrouper, RowMutation,
};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use std::collections::HashMap;
use std::sync::Arc;

const TABLE: &str = "users";
const SEEDED_ROWS: usize = 10_000;
const COLUMNS_PER_ROW: usize = 8;

fn wide_row(key: &str) -> Row {
    let mut row = Row::new(TABLE, key).expect("row");
    let family = row.family_mut("profile");
    for i in 0..COLUMNS_PER_ROW {
        family.set(&format!("col{i}"), i as i64);
    }
    row
}

fn cells(rows: usize) -> Vec<Cell> {
    (0..rows)
        .flat_map(|r| {
            (0..COLUMNS_PER_ROW).map(move |c| Cell {
                row: format!("user:{r:08}"),
                family: "profile".into(),
                qualifier: format!("col{c}"),
                visibility: String::new(),
                timestamp: (r * COLUMNS_PER_ROW + c) as u64,
                value: (c as i64).to_be_bytes().to_vec(),
            })
        })
        .collect()
}

fn seeded_session() -> (EmbeddedStore, ColumnStoreSession) {
    let store = EmbeddedStore::new("bench");
    store.add_user("root", "password", Authorizations::new(["A"]).expect("auths"));
    let props: HashMap<String, String> = [
        (INSTANCE_NAME, "bench"),
        (USERNAME, "root"),
        (PASSWORD, "password"),
        (ZOOKEEPER_SERVER_NAMES, "localhost"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let mut session = ColumnStoreSession::new(Arc::new(store.clone()));
    session.init(&props).expect("init");
    let user = session.create_user_context(&[""]).expect("ctx");
    session.initialize_table(TABLE, &user).expect("table");
    let rows: Vec<Row> = (0..SEEDED_ROWS)
        .map(|i| wide_row(&format!("user:{i:08}")))
        .collect();
    session
        .save_many(TABLE, &rows, FlushPolicy::Flush)
        .expect("seed");
    (store, session)
}

fn bench_mutation_synthesis(c: &mut Criterion) {
    let dirty = wide_row("user:00000001");
    c.bench_function("mutation_from_dirty_row", |b| {
        b.iter(|| RowMutation::from_row(black_box(&dirty)).expect("mutation"))
    });

    let mut clean = dirty.clone();
    clean.set_dirty_bits(false);
    c.bench_function("mutation_from_clean_row", |b| {
        b.iter(|| RowMutation::from_row(black_box(&clean)).expect("mutation"))
    });
}

fn bench_row_grouping(c: &mut Criterion) {
    let source = cells(1_000);
    c.bench_function("group_1k_rows", |b| {
        b.iter_batched(
            || source.clone(),
            |cells| {
                RowGrouper::new(TABLE, cells.into_iter().map(Ok::<_, ModelError>))
                    .filter(Result::is_ok)
                    .count()
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_session_reads(c: &mut Criterion) {
    let (_store, session) = seeded_session();
    let user = session.create_user_context(&[""]).expect("ctx");

    c.bench_function("point_lookup_seeded_10k", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 7919) % SEEDED_ROWS;
            let key = format!("user:{i:08}");
            black_box(
                session
                    .find_by_row_key(TABLE, &key, &user)
                    .expect("find")
                    .is_some(),
            )
        })
    });

    c.bench_function("prefix_scan_first_100", |b| {
        b.iter(|| {
            session
                .find_by_row_starts_with(TABLE, "user:0000", &user)
                .expect("scan")
                .take(100)
                .count()
        })
    });
}

fn bench_session_writes(c: &mut Criterion) {
    let (_store, session) = seeded_session();
    let batch: Vec<Row> = (0..64)
        .map(|i| wide_row(&format!("batch:{i:04}")))
        .collect();
    c.bench_function("save_many_64_flushed", |b| {
        b.iter(|| {
            session
                .save_many(TABLE, black_box(&batch), FlushPolicy::Flush)
                .expect("save")
        })
    });
}

criterion_group!(
    benches,
    bench_mutation_synthesis,
    bench_row_grouping,
    bench_session_reads,
    bench_session_writes
);
criterion_main!(benches);
