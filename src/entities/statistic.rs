// 📈 Statistic Sample - Per-server throughput snapshot
//
// Each Spark agent periodically writes how many messages it sent and
// received plus CPU figures. The aggregator buckets these by time.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Row of `spk_statistics`, keyed by (date, server, agent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticSample {
    pub date: NaiveDateTime,
    pub server: String,
    pub agent: i64,

    #[serde(default)]
    pub sent: Option<i64>,

    #[serde(default)]
    pub received: Option<i64>,

    #[serde(default)]
    pub cpu_total: Option<i64>,

    #[serde(default)]
    pub cpu_eclage: Option<i64>,

    #[serde(default)]
    pub cpu_spark: Option<i64>,

    #[serde(default)]
    pub cpu_ecoage: Option<i64>,
}

impl StatisticSample {
    pub fn new(date: NaiveDateTime, server: &str, agent: i64, sent: Option<i64>) -> Self {
        StatisticSample {
            date,
            server: server.to_string(),
            agent,
            sent,
            received: None,
            cpu_total: None,
            cpu_eclage: None,
            cpu_spark: None,
            cpu_ecoage: None,
        }
    }
}
