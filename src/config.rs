// Runtime configuration shared by the CLI and the API server
//
// Every option can come from the command line or the environment; a `.env`
// file in the working directory is loaded first.

use clap::Args;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "spark_audit.db";
pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_BUCKETS: u64 = 200_000;

#[derive(Debug, Clone, Args)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[arg(long, env = "SPARK_AUDIT_DB", default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    #[command(flatten)]
    pub database: DatabaseConfig,

    /// Address the HTTP server binds to
    #[arg(long, env = "SPARK_AUDIT_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Largest bucket plan a statistics request may ask for
    #[arg(long, env = "SPARK_AUDIT_MAX_BUCKETS", default_value_t = DEFAULT_MAX_BUCKETS)]
    pub max_buckets: u64,
}

/// Load `.env` if present. A missing file is not an error.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => log::debug!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("ignoring unreadable .env: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        server: ServerConfig,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::try_parse_from(["spark-audit-server"]).unwrap();
        // env may override in CI; only assert when unset
        if std::env::var_os("SPARK_AUDIT_MAX_BUCKETS").is_none() {
            assert_eq!(cli.server.max_buckets, DEFAULT_MAX_BUCKETS);
        }
        if std::env::var_os("SPARK_AUDIT_ADDR").is_none() {
            assert_eq!(cli.server.addr, DEFAULT_ADDR);
        }
    }

    #[test]
    fn test_flags_override() {
        let cli = TestCli::try_parse_from([
            "spark-audit-server",
            "--db",
            "/tmp/audit.db",
            "--addr",
            "127.0.0.1:8080",
            "--max-buckets",
            "50",
        ])
        .unwrap();

        assert_eq!(cli.server.database.db, PathBuf::from("/tmp/audit.db"));
        assert_eq!(cli.server.addr, "127.0.0.1:8080");
        assert_eq!(cli.server.max_buckets, 50);
    }
}
