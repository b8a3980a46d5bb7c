use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const SPEC: &str = r#"- name: users
  fields:
    - name: uid
      type: serial
    - name: name
      type: varchar
      length: 60
      not_null: true
      default: ""
  primary_key: [uid]
  unique_keys:
    name: [name]
"#;

const SPEC_WITH_MAIL: &str = r#"- name: users
  fields:
    - name: uid
      type: serial
    - name: name
      type: varchar
      length: 60
      not_null: true
      default: ""
    - name: mail
      type: varchar
      length: 254
  primary_key: [uid]
  unique_keys:
    name: [name]
  indexes:
    mail: [mail]
"#;

fn polysql(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_polysql"))
        .args(args)
        .output()
        .expect("failed to run polysql")
}

fn write_spec(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("failed to write spec");
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ---------------------------------------------------------------------------
// apply / plan
// ---------------------------------------------------------------------------

#[test]
fn apply_creates_tables_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("site.db");
    let db = db.to_str().unwrap();
    let spec = write_spec(dir.path(), "tables.yaml", SPEC);
    let spec = spec.to_str().unwrap();

    let out = polysql(&["apply", "--db", db, "--prefix", "app_", spec]);
    assert!(out.status.success(), "apply failed: {}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("op: create_table"), "stdout: {}", stdout(&out));

    let out = polysql(&["plan", "--db", db, "--prefix", "app_", "--format", "json", spec]);
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(report[0]["table"], "users");
    assert_eq!(report[0]["changes"].as_array().map(Vec::len), Some(0));

    let out = polysql(&["tables", "--db", db, "--prefix", "app_"]);
    assert_eq!(stdout(&out).trim(), "- users");
}

#[test]
fn plan_lists_changes_without_applying() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("site.db");
    let db = db.to_str().unwrap();
    let spec = write_spec(dir.path(), "tables.yaml", SPEC);
    let wider = write_spec(dir.path(), "wider.yaml", SPEC_WITH_MAIL);

    let out = polysql(&["apply", "--db", db, spec.to_str().unwrap()]);
    assert!(out.status.success());

    let out = polysql(&["plan", "--db", db, "--format", "json", wider.to_str().unwrap()]);
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let ops: Vec<&str> = report[0]["changes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|change| change["op"].as_str())
        .collect();
    assert!(ops.contains(&"add_field"), "ops: {ops:?}");

    let out = polysql(&["describe", "--db", db, "users"]);
    assert!(out.status.success());
    assert!(!stdout(&out).contains("mail"));

    let out = polysql(&["apply", "--db", db, wider.to_str().unwrap()]);
    assert!(out.status.success());
    let out = polysql(&["describe", "--db", db, "--format", "json", "users"]);
    let table: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(table["fields"][2]["name"], "mail");
    assert_eq!(table["indexes"]["mail"][0], "mail");
}

#[test]
fn invalid_spec_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("site.db");
    let spec = write_spec(
        dir.path(),
        "bad.yaml",
        "- name: users\n  fields:\n    - name: uid\n      type: int\n  indexes:\n    mail: [mail]\n",
    );
    let out = polysql(&["apply", "--db", db.to_str().unwrap(), spec.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Invalid spec file"));
}

// ---------------------------------------------------------------------------
// describe / next-id / config
// ---------------------------------------------------------------------------

#[test]
fn describe_missing_table_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("site.db");
    let out = polysql(&["describe", "--db", db.to_str().unwrap(), "nothing"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("does not exist"));
}

#[test]
fn next_id_uses_config_file_and_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("site.db");
    let config = dir.path().join("connection.yaml");
    fs::write(
        &config,
        format!("driver: sqlite\ndatabase: {}\nprefix: app_\n", db.display()),
    )
    .unwrap();
    let config = config.to_str().unwrap();

    let out = polysql(&["next-id", "--config", config]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out).trim(), "1");

    let out = polysql(&["next-id", "--config", config, "--watermark", "41"]);
    assert_eq!(stdout(&out).trim(), "42");

    let out = polysql(&["tables", "--config", config]);
    assert_eq!(stdout(&out).trim(), "- sequences");
}

#[test]
fn missing_connection_source_fails() {
    let out = polysql(&["tables"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--db or --config"));
}
