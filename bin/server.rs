// Spark Audit - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rusqlite::Connection;
use spark_audit::api::{router, AppState};
use spark_audit::config::{self, ServerConfig};
use spark_audit::setup_database;

#[derive(Debug, Parser)]
#[command(name = "spark-audit-server", version, about = "Spark audit REST API")]
struct Cli {
    #[command(flatten)]
    server: ServerConfig,
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    spark_audit::logging::init();

    let cli = Cli::parse();
    let db_path = &cli.server.database.db;

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    setup_database(&conn)?;
    info!("database opened: {}", db_path.display());

    let app = router(AppState::new(conn, cli.server.max_buckets));

    let listener = tokio::net::TcpListener::bind(&cli.server.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", cli.server.addr))?;

    info!("server running on http://{}", cli.server.addr);
    info!("statistics requests limited to {} buckets", cli.server.max_buckets);

    axum::serve(listener, app)
        .await
        .context("Server terminated")?;

    Ok(())
}
