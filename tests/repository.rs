use bigtable_model::repository::{long_in, text_in};
use bigtable_model::{
    DirtyBits, FlushPolicy, MemorySession, ModelSession, ModelUserContext, Repository,
    RepositoryError, Row, RowDecodeError, RowKey, RowMapper, WriteOutcome,
};
use proptest::prelude::*;
use std::sync::Arc;

const TABLE: &str = "users";
const PROFILE: &str = "profile";

#[derive(Debug, Clone, PartialEq)]
struct UserRecord {
    row: Row,
}

impl UserRecord {
    fn new(id: &str, name: &str, age: i64) -> Self {
        let mut row = Row::new(TABLE, id).expect("row");
        row.family_mut(PROFILE).set("name", name).set("age", age);
        Self { row }
    }

    fn id(&self) -> &str {
        self.row.row_key().as_str()
    }

    fn name(&self) -> String {
        text_in(&self.row, PROFILE, "name").expect("name")
    }

    fn age(&self) -> i64 {
        long_in(&self.row, PROFILE, "age").expect("age")
    }

    fn set_age(&mut self, age: i64) {
        self.row.family_mut(PROFILE).set("age", age);
    }
}

impl DirtyBits for UserRecord {
    fn set_dirty_bits(&mut self, dirty: bool) {
        self.row.set_dirty_bits(dirty);
    }
}

struct UserMapper;

impl RowMapper for UserMapper {
    type Entity = UserRecord;

    fn table_name(&self) -> &str {
        TABLE
    }

    fn from_row(&self, row: Row) -> Result<UserRecord, RowDecodeError> {
        text_in(&row, PROFILE, "name")?;
        long_in(&row, PROFILE, "age")?;
        Ok(UserRecord { row })
    }

    fn to_row(&self, entity: &UserRecord) -> Result<Row, RepositoryError> {
        Ok(entity.row.clone())
    }
}

fn repository() -> Repository<UserMapper> {
    let session = MemorySession::new();
    session
        .initialize_table(TABLE, &ModelUserContext::Unrestricted)
        .expect("table");
    Repository::new(Arc::new(session), UserMapper)
}

#[test]
fn entities_read_back_clean_and_resave_writes_nothing() {
    let repo = repository();
    let user = ModelUserContext::Unrestricted;
    assert_eq!(
        repo.save(&UserRecord::new("u1", "ada", 36), FlushPolicy::Flush)
            .expect("save"),
        WriteOutcome::Submitted
    );

    let mut found = repo.find_by_row_key("u1", &user).expect("find").expect("present");
    assert_eq!((found.name(), found.age()), ("ada".to_string(), 36));
    assert!(!found.row.has_pending_writes());
    assert_eq!(
        repo.save(&found, FlushPolicy::Flush).expect("save"),
        WriteOutcome::NothingToWrite
    );

    found.set_age(37);
    repo.save(&found, FlushPolicy::Flush).expect("save");
    let updated = repo.find_by_row_key("u1", &user).expect("find").expect("present");
    assert_eq!(updated.age(), 37);
}

#[test]
fn scans_decode_lazily_in_key_order() {
    let repo = repository();
    let user = ModelUserContext::Unrestricted;
    let records = vec![
        UserRecord::new("user:b", "bob", 40),
        UserRecord::new("user:a", "ada", 36),
        UserRecord::new("admin:c", "cy", 50),
    ];
    assert_eq!(repo.save_many(&records, FlushPolicy::Flush).expect("save"), 3);

    let ids: Vec<String> = repo
        .find_by_row_starts_with("user:", &user)
        .expect("scan")
        .map(|r| r.expect("decode").id().to_string())
        .collect();
    assert_eq!(ids, ["user:a", "user:b"]);

    let all: Vec<UserRecord> = repo
        .find_all(&user)
        .expect("scan")
        .collect::<Result<_, _>>()
        .expect("decode");
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|r| !r.row.has_pending_writes()));
}

#[test]
fn delete_and_decode_errors() {
    let repo = repository();
    let user = ModelUserContext::Unrestricted;
    repo.save(&UserRecord::new("u1", "ada", 36), FlushPolicy::Flush)
        .expect("save");
    repo.delete(&RowKey::from("u1"), &user).expect("delete");
    assert!(repo.find_by_row_key("u1", &user).expect("find").is_none());

    let mut broken = Row::new(TABLE, "u2").expect("row");
    broken.family_mut(PROFILE).set("name", "no age");
    repo.session().save(&broken, FlushPolicy::Flush).expect("save");
    let err = repo.find_by_row_key("u2", &user).expect_err("decode");
    assert!(matches!(
        err,
        RepositoryError::Decode(RowDecodeError::MissingColumn { .. })
    ));

    let missing = Repository::new(Arc::new(MemorySession::new()), UserMapper);
    let err = missing.find_by_row_key("u1", &user).expect_err("no table");
    assert!(matches!(err, RepositoryError::Model(ref e) if e.is_table_not_found()));
}

proptest! {
    #[test]
    fn mapping_round_trip_clears_intents_and_keeps_values(
        id in "[a-z]{1,12}",
        name in "\\PC{0,24}",
        age in any::<i64>(),
    ) {
        let record = UserRecord::new(&id, &name, age);
        let row = UserMapper.to_row(&record).expect("to row");
        let mut back = UserMapper.from_row(row).expect("from row");
        back.set_dirty_bits(false);

        prop_assert!(!back.row.has_pending_writes());
        prop_assert_eq!(back.id(), id.as_str());
        prop_assert_eq!(back.name(), name);
        prop_assert_eq!(back.age(), age);
    }
}
