// Spark Audit - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod logging;
pub mod search;
pub mod statistics;
pub mod store;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use db::{
    get_audit, insert_audits, insert_statistics, load_audits_csv, load_statistics_csv,
    setup_database, verify_count,
};
pub use entities::{
    Audit, AuditDetails, FalconDirection, FalconMessage, Field, Response, Solicitation, SparkId,
    StatisticSample, StatusType,
};
pub use error::{AuditError, Result};
pub use search::{
    load_last_day, resolve, search, FilterFlags, PanFilter, QueryShape, ResolvedSearch,
    SearchCriteria, SearchRequest, SortDirection,
};
pub use statistics::{aggregate, plan_buckets, AggregateRow, Granularity, TimeBucket};
pub use store::{AuditStore, Page, StatisticsStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
