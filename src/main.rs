// Spark Audit - Command line
//
// Schema setup, CSV import, and the two reporting operations (search and
// statistics) run directly against the SQLite store.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use log::info;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use spark_audit::config::{self, DatabaseConfig, DEFAULT_MAX_BUCKETS};
use spark_audit::db::{
    insert_falcon_messages, insert_fields, insert_responses, insert_solicitations,
    insert_status_types, load_falcon_messages_csv, load_fields_csv, load_responses_csv,
    load_solicitations_csv, load_status_types_csv,
};
use spark_audit::statistics::{self, AggregateRow, Granularity};
use spark_audit::{
    insert_audits, insert_statistics, load_audits_csv, load_statistics_csv, search, setup_database,
    verify_count, FalconDirection, SearchCriteria, SearchRequest,
};

#[derive(Debug, Parser)]
#[command(name = "spark-audit", version, about = "Spark audit reporting backend")]
struct Cli {
    #[command(flatten)]
    database: DatabaseConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the schema (idempotent)
    Init,

    /// Import audit rows from a CSV file
    ImportAudits { csv: PathBuf },

    /// Import statistics samples from a CSV file
    ImportStatistics { csv: PathBuf },

    /// Import messages sent to Falcon
    ImportFalconIn { csv: PathBuf },

    /// Import messages received from Falcon
    ImportFalconOut { csv: PathBuf },

    /// Import decoded Falcon responses
    ImportResponses { csv: PathBuf },

    /// Import inbound solicitations
    ImportSolicitations { csv: PathBuf },

    /// Import status descriptions
    ImportStatusTypes { csv: PathBuf },

    /// Import message field layouts
    ImportFields { csv: PathBuf },

    /// Run an audit search; the argument is a JSON search request
    Search { request: String },

    /// Print bucketed statistics, one line per bucket and server
    Statistics {
        #[arg(long, default_value = "minutes")]
        interval: String,

        #[arg(long)]
        from: Option<NaiveDateTime>,

        #[arg(long)]
        to: Option<NaiveDateTime>,

        /// Largest bucket plan to build
        #[arg(long, env = "SPARK_AUDIT_MAX_BUCKETS", default_value_t = DEFAULT_MAX_BUCKETS)]
        max_buckets: u64,
    },
}

/// Load a CSV, insert it, and print what landed in `table`.
fn import<T>(
    conn: &Connection,
    table: &str,
    csv: &Path,
    load: fn(&Path) -> Result<Vec<T>>,
    insert: impl FnOnce(&Connection, &[T]) -> Result<usize>,
) -> Result<()> {
    setup_database(conn)?;
    let rows = load(csv)?;
    println!("✓ Loaded {} rows from {}", rows.len(), csv.display());

    let inserted = insert(conn, &rows)?;
    let count = verify_count(conn, table)?;
    println!("✓ Inserted {inserted}, {table} contains {count} rows");
    Ok(())
}

fn main() -> Result<()> {
    config::load_dotenv();
    spark_audit::logging::init();

    let cli = Cli::parse();
    let db_path = &cli.database.db;

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("database opened: {}", db_path.display());

    match cli.command {
        Command::Init => {
            setup_database(&conn)?;
            println!("✓ Database initialized with WAL mode");
        }
        Command::ImportAudits { csv } => {
            import(&conn, "spk_audit", &csv, load_audits_csv, insert_audits)?;
        }
        Command::ImportStatistics { csv } => {
            import(&conn, "spk_statistics", &csv, load_statistics_csv, insert_statistics)?;
        }
        Command::ImportFalconIn { csv } => {
            let direction = FalconDirection::In;
            import(&conn, direction.table(), &csv, load_falcon_messages_csv, |conn, rows| {
                insert_falcon_messages(conn, direction, rows)
            })?;
        }
        Command::ImportFalconOut { csv } => {
            let direction = FalconDirection::Out;
            import(&conn, direction.table(), &csv, load_falcon_messages_csv, |conn, rows| {
                insert_falcon_messages(conn, direction, rows)
            })?;
        }
        Command::ImportResponses { csv } => {
            import(&conn, "spk_audit_response", &csv, load_responses_csv, insert_responses)?;
        }
        Command::ImportSolicitations { csv } => {
            import(
                &conn,
                "spk_audit_solicitation",
                &csv,
                load_solicitations_csv,
                insert_solicitations,
            )?;
        }
        Command::ImportStatusTypes { csv } => {
            import(&conn, "spk_status_type", &csv, load_status_types_csv, insert_status_types)?;
        }
        Command::ImportFields { csv } => {
            import(&conn, "spk_fields", &csv, load_fields_csv, insert_fields)?;
        }
        Command::Search { request } => {
            let request: SearchRequest =
                serde_json::from_str(&request).context("Invalid search request")?;
            let page = search(&conn, &SearchCriteria::from(request))?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Statistics {
            interval,
            from,
            to,
            max_buckets,
        } => {
            let granularity = Granularity::parse(&interval);
            let Some((from, to)) = statistics::resolve_window(&conn, from, to)? else {
                println!("No statistics recorded yet");
                return Ok(());
            };

            statistics::check_bucket_limit(from, to, granularity, max_buckets)?;
            info!("statistics {interval} from {from} to {to}");
            for row in statistics::aggregate(&conn, from, to, granularity)? {
                println!("{}", AggregateRow::to_line(&row));
            }
        }
    }

    Ok(())
}
