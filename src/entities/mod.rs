// Entity Models - rows of the Spark audit schema
//
// Every per-transaction table shares the SparkId composite key
// (transaction datetime + system + token).

pub mod audit;
pub mod messages;
pub mod reference;
pub mod statistic;

pub use audit::{parse_key_timestamp, Audit, AuditDetails, SparkId};
pub use messages::{FalconDirection, FalconMessage, Response, Solicitation};
pub use reference::{Field, StatusType};
pub use statistic::StatisticSample;
