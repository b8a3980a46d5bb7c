//! Integration tests for the polysql-sqlite crate against real databases.

use std::sync::{Arc, Barrier};
use std::thread;

use polysql_core::{DefaultValue, FieldInitial, FieldSpec, FieldType, NewKeys, SizeClass, TableSpec, Value};
use polysql_db::{Args, Connection, ConnectionConfig, DbError, ErrorKind, SqliteExtension};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn users() -> TableSpec {
    TableSpec::new("users")
        .with_field(FieldSpec::serial("uid"))
        .with_field(FieldSpec::varchar("name", 60).not_null().default(""))
        .with_field(FieldSpec::int("status").size(SizeClass::Tiny).not_null().default(0))
        .with_primary_key(["uid"])
        .with_unique_key("name", ["name"])
}

fn notes() -> TableSpec {
    TableSpec::new("notes")
        .with_field(FieldSpec::serial("id"))
        .with_field(FieldSpec::varchar("body", 32))
        .with_primary_key(["id"])
        .with_index("body", ["body"])
}

fn kv() -> TableSpec {
    TableSpec::new("kv")
        .with_field(FieldSpec::varchar("name", 64).not_null().default(""))
        .with_field(FieldSpec::varchar("value", 255))
        .with_primary_key(["name"])
}

fn open_with(tables: &[TableSpec]) -> Connection {
    let mut conn = polysql_sqlite::open_in_memory("app_").unwrap();
    for table in tables {
        conn.schema().create_table(table).unwrap();
    }
    conn
}

fn insert_note(conn: &mut Connection, body: Option<&str>) {
    let body = body.map_or(Value::Null, Value::from);
    conn.execute("INSERT INTO {notes} (body) VALUES (:body)", Args::new().bind("body", body))
        .unwrap();
}

fn note_rows(conn: &mut Connection) -> Vec<(Value, Value)> {
    conn.query("SELECT id, body FROM {notes} ORDER BY id", ())
        .unwrap()
        .fetch_all()
        .into_iter()
        .map(|row| (row.get("id").cloned().unwrap(), row.get("body").cloned().unwrap()))
        .collect()
}

fn count(conn: &mut Connection, table: &str) -> i64 {
    let mut result = conn.query(&format!("SELECT COUNT(*) AS n FROM {{{table}}}"), ()).unwrap();
    result.fetch_field(0).and_then(|v| v.as_i64()).unwrap()
}

// ---------------------------------------------------------------------------
// Connection and configuration
// ---------------------------------------------------------------------------

#[test]
fn test_connect_from_yaml_config() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("site.db");
    let config_path = dir.path().join("connection.yaml");
    ConnectionConfig::new("sqlite3", db_path.to_string_lossy())
        .with_prefix("app_")
        .with_init_command("PRAGMA cache_size = -2000")
        .save(&config_path)
        .unwrap();

    let mut conn = polysql_sqlite::connect(ConnectionConfig::load(&config_path).unwrap()).unwrap();
    conn.schema().create_table(&users()).unwrap();
    drop(conn);

    let mut conn = polysql_sqlite::connect(ConnectionConfig::load(&config_path).unwrap()).unwrap();
    assert_eq!(conn.find_tables("%").unwrap(), vec!["users".to_string()]);
    let mut result = conn
        .query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'app_users'", ())
        .unwrap();
    assert_eq!(result.fetch_field(0), Some(Value::from("app_users")));
}

#[test]
fn test_prefix_isolates_table_sets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.db");
    let mut first = polysql_sqlite::open(&path, "one_").unwrap();
    first.schema().create_table(&users()).unwrap();
    drop(first);

    let mut second = polysql_sqlite::open(&path, "two_").unwrap();
    assert!(!second.schema().table_exists("users").unwrap());
    second.schema().create_table(&users()).unwrap();
    assert!(second.schema().table_exists("users").unwrap());
    assert_eq!(second.find_tables("u%").unwrap(), vec!["users".to_string()]);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[test]
fn test_insert_and_last_insert_id() {
    let mut conn = open_with(&[users()]);
    conn.execute("INSERT INTO {users} (name) VALUES (:name)", Args::new().bind("name", "admin"))
        .unwrap();
    conn.execute("INSERT INTO {users} (name) VALUES (:name)", Args::new().bind("name", "editor"))
        .unwrap();
    assert_eq!(conn.last_insert_id(Some("users"), Some("uid")).unwrap(), Some(2));

    let mut result = conn
        .query("SELECT uid, status FROM {users} WHERE name = :name", Args::new().bind("name", "admin"))
        .unwrap();
    let row = result.fetch().unwrap();
    assert_eq!(row.get("uid"), Some(&Value::Integer(1)));
    assert_eq!(row.get("status"), Some(&Value::Integer(0)));
}

#[test]
fn test_duplicate_key_is_integrity_violation() {
    let mut conn = open_with(&[users()]);
    let insert = "INSERT INTO {users} (name) VALUES (:name)";
    conn.execute(insert, Args::new().bind("name", "admin")).unwrap();
    let err = conn.execute(insert, Args::new().bind("name", "admin")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityViolation);
    assert!(err.to_string().contains("app_users"));
}

#[test]
fn test_query_range_and_like_operator() {
    let mut conn = open_with(&[notes()]);
    for body in ["a_1", "a%2", "b_3", "a_4"] {
        insert_note(&mut conn, Some(body));
    }
    let mut page = conn
        .query_range("SELECT body FROM {notes} ORDER BY id", (), 1, 2)
        .unwrap();
    assert_eq!(page.fetch_col(0), vec![Value::from("a%2"), Value::from("b_3")]);

    let like = conn.condition_operator("LIKE");
    let pattern = format!("{}%", conn.escape_like("a_"));
    let sql = format!(
        "SELECT body FROM {{notes}} WHERE body {} :pattern{} ORDER BY id",
        like.operator,
        like.postfix.unwrap_or_default()
    );
    let mut result = conn.query(&sql, Args::new().bind("pattern", pattern)).unwrap();
    assert_eq!(result.fetch_col(0), vec![Value::from("a_1"), Value::from("a_4")]);
}

#[test]
fn test_placeholder_after_escape_clause_is_bound() {
    let mut conn = open_with(&[users()]);
    for name in ["alice", "alina"] {
        conn.execute("INSERT INTO {users} (name) VALUES (:name)", Args::new().bind("name", name))
            .unwrap();
    }
    let like = conn.condition_operator("LIKE");
    let sql = format!(
        "SELECT uid FROM {{users}} WHERE name {} :name{} AND uid = :uid",
        like.operator,
        like.postfix.unwrap_or_default()
    );
    assert!(sql.contains("ESCAPE"), "{sql}");
    let mut result = conn
        .query(&sql, Args::new().bind("name", "ali%").bind("uid", 2))
        .unwrap();
    assert_eq!(result.fetch_col(0), vec![Value::Integer(2)]);
}

#[test]
fn test_query_temporary_table() {
    let mut conn = open_with(&[notes()]);
    insert_note(&mut conn, Some("x"));
    insert_note(&mut conn, Some("y"));
    let table = conn
        .query_temporary("SELECT body FROM {notes} WHERE body = 'y'", ())
        .unwrap();
    assert_eq!(table, "db_temporary_0");
    let mut result = conn.query(&format!("SELECT COUNT(*) FROM {table}"), ()).unwrap();
    assert_eq!(result.fetch_field(0), Some(Value::Integer(1)));
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn test_savepoint_rollback_keeps_outer_work() {
    let mut conn = open_with(&[notes()]);
    let root = conn.push_transaction(None).unwrap();
    insert_note(&mut conn, Some("kept"));
    let inner = conn.push_transaction(Some("import")).unwrap();
    insert_note(&mut conn, Some("discarded"));
    conn.rollback_transaction(&inner).unwrap();
    conn.pop_transaction(&root).unwrap();

    assert!(!conn.in_transaction());
    let bodies: Vec<Value> = note_rows(&mut conn).into_iter().map(|(_, body)| body).collect();
    assert_eq!(bodies, vec![Value::from("kept")]);
}

#[test]
fn test_dropped_guard_rolls_back() {
    let mut conn = open_with(&[notes()]);
    {
        let mut txn = conn.start_transaction(None).unwrap();
        txn.execute("INSERT INTO {notes} (body) VALUES ('lost')", ()).unwrap();
    }
    assert!(!conn.in_transaction());
    assert_eq!(count(&mut conn, "notes"), 0);

    let mut txn = conn.start_transaction(Some("batch")).unwrap();
    txn.execute("INSERT INTO {notes} (body) VALUES ('saved')", ()).unwrap();
    txn.commit().unwrap();
    assert_eq!(count(&mut conn, "notes"), 1);
}

// ---------------------------------------------------------------------------
// Schema introspection and migration
// ---------------------------------------------------------------------------

#[test]
fn test_introspection_matches_created_table() {
    let mut conn = open_with(&[users()]);
    conn.invalidate_snapshot();
    let table = conn.schema().table("users").unwrap().unwrap();
    assert_eq!(table.field("uid").unwrap().field_type, FieldType::Serial);
    assert_eq!(table.field("name").unwrap().length, Some(60));
    assert_eq!(table.field("name").unwrap().default, Some(DefaultValue::Text(String::new())));
    assert!(conn.schema().index_exists("users", "PRIMARY").unwrap());
    assert!(conn.schema().index_exists("users", "name").unwrap());
    assert!(conn.schema().plan(&users()).unwrap().is_empty());
}

#[test]
fn test_change_field_rebuilds_table() {
    let mut conn = open_with(&[notes()]);
    insert_note(&mut conn, Some("first"));
    insert_note(&mut conn, None);
    insert_note(&mut conn, Some("third"));

    conn.schema()
        .change_field(
            "notes",
            "body",
            FieldSpec::varchar("body", 64).not_null().default(""),
            NewKeys::default(),
        )
        .unwrap();

    assert_eq!(
        note_rows(&mut conn),
        vec![
            (Value::Integer(1), Value::from("first")),
            (Value::Integer(2), Value::from("")),
            (Value::Integer(3), Value::from("third")),
        ]
    );
    conn.invalidate_snapshot();
    let body = conn.schema().table("notes").unwrap().unwrap().field("body").cloned().unwrap();
    assert_eq!(body.length, Some(64));
    assert!(body.not_null);
    assert!(conn.schema().index_exists("notes", "body").unwrap());
    assert_eq!(conn.find_tables("notes%").unwrap(), vec!["notes".to_string()]);

    // the serial keeps counting after the copy
    insert_note(&mut conn, Some("fourth"));
    assert_eq!(conn.last_insert_id(None, None).unwrap(), Some(4));
}

#[test]
fn test_rolled_back_rebuild_is_forgotten() {
    let mut conn = open_with(&[notes()]);
    let root = conn.push_transaction(None).unwrap();
    conn.schema()
        .change_field(
            "notes",
            "body",
            FieldSpec::varchar("body", 64).not_null().default(""),
            NewKeys::default(),
        )
        .unwrap();
    assert_eq!(conn.schema().table("notes").unwrap().unwrap().field("body").unwrap().length, Some(64));
    conn.rollback_transaction(&root).unwrap();

    let table = conn.schema().table("notes").unwrap().unwrap();
    let body = table.field("body").unwrap();
    assert_eq!(body.length, Some(32));
    assert!(!body.not_null);
    assert_eq!(body.default, None);
    assert!(conn.schema().plan(&notes()).unwrap().is_empty());
}

#[test]
fn test_failed_rebuild_keeps_original_table() {
    let mut conn = open_with(&[notes()]);
    insert_note(&mut conn, Some("first"));
    insert_note(&mut conn, None);

    let err = conn
        .schema()
        .change_field("notes", "body", FieldSpec::varchar("body", 64).not_null(), NewKeys::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityViolation);
    assert!(!conn.in_transaction());

    assert_eq!(conn.find_tables("notes%").unwrap(), vec!["notes".to_string()]);
    assert_eq!(count(&mut conn, "notes"), 2);
    let body = conn.schema().table("notes").unwrap().unwrap().field("body").cloned().unwrap();
    assert_eq!(body.length, Some(32));
    assert!(!body.not_null);
}

#[test]
fn test_rename_field_copies_data() {
    let mut conn = open_with(&[notes()]);
    insert_note(&mut conn, Some("hello"));
    conn.schema().drop_index("notes", "body").unwrap();
    conn.schema()
        .change_field("notes", "body", FieldSpec::varchar("content", 64), NewKeys::default())
        .unwrap();
    assert!(conn.schema().field_exists("notes", "content").unwrap());
    assert!(!conn.schema().field_exists("notes", "body").unwrap());
    let mut result = conn.query("SELECT content FROM {notes}", ()).unwrap();
    assert_eq!(result.fetch_field(0), Some(Value::from("hello")));
}

#[test]
fn test_add_field_with_initial_value() {
    let mut conn = open_with(&[notes()]);
    insert_note(&mut conn, Some("a"));
    insert_note(&mut conn, Some("b"));
    conn.schema()
        .add_field_with_initial(
            "notes",
            FieldSpec::int("score").not_null(),
            NewKeys::default(),
            FieldInitial::Value(DefaultValue::Integer(5)),
        )
        .unwrap();
    let mut result = conn.query("SELECT DISTINCT score FROM {notes}", ()).unwrap();
    assert_eq!(result.fetch_col(0), vec![Value::Integer(5)]);

    conn.schema()
        .add_field_with_initial(
            "notes",
            FieldSpec::varchar("title", 32).not_null(),
            NewKeys::default().index("title", ["title"]),
            FieldInitial::FromField("body".to_string()),
        )
        .unwrap();
    let mut result = conn.query("SELECT title FROM {notes} ORDER BY id", ()).unwrap();
    assert_eq!(result.fetch_col(0), vec![Value::from("a"), Value::from("b")]);
    assert!(conn.schema().index_exists("notes", "title").unwrap());
}

#[test]
fn test_drop_field_and_table() {
    let mut conn = open_with(&[users(), notes()]);
    conn.execute("INSERT INTO {users} (name, status) VALUES ('a', 1)", ()).unwrap();
    assert!(conn.schema().drop_field("users", "status").unwrap());
    assert!(!conn.schema().drop_field("users", "status").unwrap());
    assert_eq!(count(&mut conn, "users"), 1);

    assert!(conn.schema().drop_table("notes").unwrap());
    assert!(!conn.schema().drop_table("notes").unwrap());
    assert_eq!(conn.find_tables("%").unwrap(), vec!["users".to_string()]);
}

#[test]
fn test_rename_table_moves_indexes() {
    let mut conn = open_with(&[users()]);
    conn.execute("INSERT INTO {users} (name) VALUES ('a')", ()).unwrap();
    conn.schema().rename_table("users", "members").unwrap();
    assert!(!conn.schema().table_exists("users").unwrap());
    assert!(conn.schema().table_exists("members").unwrap());
    conn.invalidate_snapshot();
    assert!(conn.schema().index_exists("members", "name").unwrap());
    assert_eq!(count(&mut conn, "members"), 1);
}

#[test]
fn test_sync_creates_then_migrates() {
    let mut conn = polysql_sqlite::open_in_memory("").unwrap();
    let applied = conn.schema().sync(&notes()).unwrap();
    assert_eq!(applied.len(), 1);
    insert_note(&mut conn, Some("x"));

    let desired = notes().with_field(FieldSpec::text("extra"));
    assert_eq!(conn.schema().sync(&desired).unwrap().len(), 1);
    assert!(conn.schema().sync(&desired).unwrap().is_empty());
    assert_eq!(count(&mut conn, "notes"), 1);
}

#[test]
fn test_comments_are_unsupported() {
    let mut conn = open_with(&[notes()]);
    let err = conn.schema().set_table_comment("notes", Some("Notes")).unwrap_err();
    assert!(matches!(err, DbError::Unsupported(_)));
}

// ---------------------------------------------------------------------------
// Sequences and upsert
// ---------------------------------------------------------------------------

#[test]
fn test_next_id_is_monotonic() {
    let mut conn = polysql_sqlite::open_in_memory("app_").unwrap();
    assert_eq!(conn.next_id(0).unwrap(), 1);
    assert_eq!(conn.next_id(0).unwrap(), 2);
    assert_eq!(conn.next_id(100).unwrap(), 101);
    assert_eq!(conn.next_id(5).unwrap(), 102);
    assert!(conn.schema().table_exists("sequences").unwrap());
    assert_eq!(count(&mut conn, "sequences"), 1);
}

#[test]
fn test_native_upsert() {
    let mut conn = open_with(&[kv()]);
    assert!(conn.extension().native_upsert_support());
    for value in ["1", "2"] {
        let rows = conn
            .upsert("kv")
            .key("name")
            .fields(["name", "value"])
            .values(["site_name", value])
            .execute()
            .unwrap();
        assert_eq!(rows, 1);
    }
    let mut result = conn.query("SELECT value FROM {kv}", ()).unwrap();
    assert_eq!(result.fetch_col(0), vec![Value::from("2")]);
}

#[test]
fn test_emulated_upsert_second_writer_wins() {
    let mut conn = polysql_sqlite::connect_with_extension(
        ConnectionConfig::new("sqlite", ":memory:").with_prefix("app_"),
        Arc::new(SqliteExtension::without_native_upsert()),
    )
    .unwrap();
    conn.schema().create_table(&kv()).unwrap();
    assert!(!conn.extension().native_upsert_support());

    conn.upsert("kv")
        .key("name")
        .fields(["name", "value"])
        .values(["site_name", "first"])
        .values(["site_mail", "a@example.com"])
        .execute()
        .unwrap();
    let rows = conn
        .upsert("kv")
        .key("name")
        .fields(["name", "value"])
        .values(["site_name", "second"])
        .execute()
        .unwrap();
    assert_eq!(rows, 1);
    assert!(!conn.in_transaction());

    let mut result = conn
        .query("SELECT value FROM {kv} WHERE name = :name", Args::new().bind("name", "site_name"))
        .unwrap();
    assert_eq!(result.fetch_col(0), vec![Value::from("second")]);
    assert_eq!(count(&mut conn, "kv"), 2);
}

#[test]
fn test_concurrent_emulated_upserts_leave_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.db");
    let config = ConnectionConfig::new("sqlite", path.to_string_lossy()).with_prefix("app_");
    let connect = |config: ConnectionConfig| {
        polysql_sqlite::connect_with_extension(config, Arc::new(SqliteExtension::without_native_upsert()))
            .unwrap()
    };
    connect(config.clone()).schema().create_table(&kv()).unwrap();

    let barrier = Barrier::new(2);
    thread::scope(|scope| {
        for value in ["first", "second"] {
            let barrier = &barrier;
            let config = config.clone();
            scope.spawn(move || {
                let mut conn = connect(config);
                barrier.wait();
                let rows = conn
                    .upsert("kv")
                    .key("name")
                    .fields(["name", "value"])
                    .values(["site_name", value])
                    .execute()
                    .unwrap();
                assert_eq!(rows, 1);
            });
        }
    });

    let mut conn = connect(config);
    assert_eq!(count(&mut conn, "kv"), 1);
    let mut result = conn.query("SELECT value FROM {kv}", ()).unwrap();
    let value = result.fetch_field(0).unwrap();
    assert!(value == Value::from("first") || value == Value::from("second"), "{value:?}");
}
