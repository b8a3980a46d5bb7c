use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use polysql_core::{SchemaChange, TableSpec, validate_table};
use polysql_db::{Connection, ConnectionConfig};
use serde::Serialize;

/// CLI-specific output format enum with clap argument parsing support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliOutputFormat {
    Yaml,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "polysql")]
#[command(about = "Inspect and migrate polysql databases", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tables that carry the prefix.
    Tables(TablesArgs),
    /// Print the specification of one table as the database has it.
    Describe(DescribeArgs),
    /// Show the changes that would bring the database in line with a spec file.
    Plan(SpecArgs),
    /// Create or migrate the tables of a spec file.
    Apply(SpecArgs),
    /// Hand out the next id of the connection-wide sequence.
    NextId(NextIdArgs),
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    /// SQLite database file path.
    #[arg(long)]
    db: Option<PathBuf>,
    /// YAML connection configuration file.
    #[arg(long, conflicts_with = "db")]
    config: Option<PathBuf>,
    /// Table prefix (overrides the configuration file).
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Debug, Args)]
struct TablesArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// LIKE pattern on the unprefixed table name.
    #[arg(long, default_value = "%")]
    pattern: String,
    /// Output format.
    #[arg(long, value_enum, default_value = "yaml")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct DescribeArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// Unprefixed table name.
    table: String,
    /// Output format.
    #[arg(long, value_enum, default_value = "yaml")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct SpecArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// YAML or JSON file holding a list of table specifications.
    spec: PathBuf,
    /// Output format.
    #[arg(long, value_enum, default_value = "yaml")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct NextIdArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// The id returned is greater than this value.
    #[arg(long, default_value_t = 0)]
    watermark: i64,
}

/// Changes for one table of a spec file.
#[derive(Debug, Serialize)]
struct TableReport {
    table: String,
    changes: Vec<SchemaChange>,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Tables(args) => run_tables(args),
        Command::Describe(args) => run_describe(args),
        Command::Plan(args) => run_plan(args),
        Command::Apply(args) => run_apply(args),
        Command::NextId(args) => run_next_id(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run_tables(args: TablesArgs) -> Result<(), String> {
    let mut conn = open_connection(&args.connection)?;
    let tables = conn
        .find_tables(&args.pattern)
        .map_err(|e| format!("Failed to list tables: {e}"))?;
    println!("{}", render(&tables, args.format)?);
    Ok(())
}

fn run_describe(args: DescribeArgs) -> Result<(), String> {
    let mut conn = open_connection(&args.connection)?;
    let table = conn
        .schema()
        .table(&args.table)
        .map_err(|e| format!("Failed to read table '{}': {e}", args.table))?
        .ok_or_else(|| format!("Table '{}' does not exist", args.table))?;
    println!("{}", render(&table, args.format)?);
    Ok(())
}

fn run_plan(args: SpecArgs) -> Result<(), String> {
    let specs = load_specs(&args.spec)?;
    let mut conn = open_connection(&args.connection)?;
    let mut reports = Vec::with_capacity(specs.len());
    for spec in &specs {
        let changes = conn
            .schema()
            .plan(spec)
            .map_err(|e| format!("Failed to plan table '{}': {e}", spec.name))?;
        reports.push(TableReport {
            table: spec.name.clone(),
            changes,
        });
    }
    println!("{}", render(&reports, args.format)?);
    Ok(())
}

fn run_apply(args: SpecArgs) -> Result<(), String> {
    let specs = load_specs(&args.spec)?;
    let mut conn = open_connection(&args.connection)?;
    let mut reports = Vec::with_capacity(specs.len());
    for spec in &specs {
        let changes = conn
            .schema()
            .sync(spec)
            .map_err(|e| format!("Failed to apply table '{}': {e}", spec.name))?;
        reports.push(TableReport {
            table: spec.name.clone(),
            changes,
        });
    }
    println!("{}", render(&reports, args.format)?);
    Ok(())
}

fn run_next_id(args: NextIdArgs) -> Result<(), String> {
    let mut conn = open_connection(&args.connection)?;
    let id = conn
        .next_id(args.watermark)
        .map_err(|e| format!("Failed to advance sequence: {e}"))?;
    println!("{id}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Builds the connection settings from `--config`, or `--db` when no file
/// is given.
fn connection_config(args: &ConnectionArgs) -> Result<ConnectionConfig, String> {
    let mut config = match (&args.config, &args.db) {
        (Some(path), _) => ConnectionConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        (None, Some(db)) => ConnectionConfig::new("sqlite", db.to_string_lossy()),
        (None, None) => return Err("either --db or --config is required".to_string()),
    };
    if let Some(prefix) = &args.prefix {
        config.prefix = prefix.clone();
    }
    Ok(config)
}

fn open_connection(args: &ConnectionArgs) -> Result<Connection, String> {
    let config = connection_config(args)?;
    let database = config.database.clone();
    polysql_sqlite::connect(config)
        .map_err(|e| format!("Failed to open database '{database}': {e}"))
}

/// Reads and validates a list of table specifications.
fn load_specs(path: &Path) -> Result<Vec<TableSpec>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read spec file '{}': {e}", path.display()))?;
    let specs: Vec<TableSpec> = serde_yaml::from_str(&content)
        .map_err(|e| format!("Failed to parse spec file '{}': {e}", path.display()))?;
    let mut problems = Vec::new();
    for spec in &specs {
        problems.extend(
            validate_table(spec)
                .into_iter()
                .map(|err| format!("{}: {err}", spec.name)),
        );
    }
    if !problems.is_empty() {
        return Err(format!("Invalid spec file '{}':\n  {}", path.display(), problems.join("\n  ")));
    }
    Ok(specs)
}

fn render<T: Serialize>(value: &T, format: CliOutputFormat) -> Result<String, String> {
    match format {
        CliOutputFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| format!("JSON serialization failed: {e}")),
        CliOutputFormat::Yaml => serde_yaml::to_string(value)
            .map(|yaml| yaml.trim_end().to_string())
            .map_err(|e| format!("YAML serialization failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_args(db: Option<&str>, config: Option<&Path>, prefix: Option<&str>) -> ConnectionArgs {
        ConnectionArgs {
            db: db.map(PathBuf::from),
            config: config.map(Path::to_path_buf),
            prefix: prefix.map(str::to_string),
        }
    }

    #[test]
    fn test_connection_config_from_db_flag() {
        let config = connection_config(&connection_args(Some("site.db"), None, Some("app_"))).unwrap();
        assert_eq!(config.driver, "sqlite");
        assert_eq!(config.database, "site.db");
        assert_eq!(config.prefix, "app_");
    }

    #[test]
    fn test_connection_config_prefix_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.yaml");
        ConnectionConfig::new("sqlite", "site.db")
            .with_prefix("file_")
            .save(&path)
            .unwrap();
        let config = connection_config(&connection_args(None, Some(&path), None)).unwrap();
        assert_eq!(config.prefix, "file_");
        let config = connection_config(&connection_args(None, Some(&path), Some("cli_"))).unwrap();
        assert_eq!(config.prefix, "cli_");
    }

    #[test]
    fn test_connection_config_requires_a_source() {
        assert!(connection_config(&connection_args(None, None, None)).is_err());
    }

    #[test]
    fn test_load_specs_reports_invalid_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.yaml");
        fs::write(
            &path,
            "- name: users\n  fields:\n    - name: uid\n      type: int\n  indexes:\n    mail: [mail]\n",
        )
        .unwrap();
        let err = load_specs(&path).unwrap_err();
        assert!(err.contains("users"), "unexpected error: {err}");
    }

    #[test]
    fn test_render_formats() {
        let tables = vec!["users".to_string()];
        assert_eq!(render(&tables, CliOutputFormat::Yaml).unwrap(), "- users");
        assert_eq!(render(&tables, CliOutputFormat::Json).unwrap(), "[\n  \"users\"\n]");
    }
}
