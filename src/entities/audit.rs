// 🧾 Audit Entity - One row of the transaction audit trail
//
// Identity is the composite SparkId (datetime + system + token), shared by
// every per-transaction table (Falcon in/out, response, solicitation).

use crate::error::{AuditError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Accepted string forms of a key timestamp, most precise first.
const KEY_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

// ============================================================================
// SPARK ID (composite key)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SparkId {
    pub transaction_datetime: NaiveDateTime,
    pub system: String,
    pub token: String,
}

impl SparkId {
    pub fn new(transaction_datetime: NaiveDateTime, system: &str, token: &str) -> Self {
        SparkId {
            transaction_datetime,
            system: system.to_string(),
            token: token.to_string(),
        }
    }

    /// Build a key from its request form, e.g. `2024-03-01T10:15:42.123456`.
    pub fn parse(datetime: &str, system: &str, token: &str) -> Result<Self> {
        let transaction_datetime = parse_key_timestamp(datetime)?;
        Ok(SparkId::new(transaction_datetime, system, token))
    }
}

pub fn parse_key_timestamp(value: &str) -> Result<NaiveDateTime> {
    KEY_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| AuditError::InvalidTimestamp(value.to_string()))
}

// ============================================================================
// AUDIT
// ============================================================================

/// Audit trail row (table `spk_audit`)
///
/// `clock1`..`clock10` are the checkpoints stamped as the transaction moves
/// through Spark, Falcon and LSDB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub transaction_datetime: NaiveDateTime,
    pub system: String,
    pub token: String,

    #[serde(default)]
    pub pid: Option<String>,

    #[serde(default, rename = "type")]
    pub audit_type: Option<i32>,

    #[serde(default)]
    pub score: Option<String>,

    #[serde(default)]
    pub pan: Option<String>,

    #[serde(default)]
    pub status: Option<i32>,

    #[serde(default)]
    pub trip: Option<i32>,

    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default)]
    pub clock1: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock2: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock3: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock4: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock5: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock6: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock7: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock8: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock9: Option<NaiveDateTime>,
    #[serde(default)]
    pub clock10: Option<NaiveDateTime>,
}

impl Audit {
    /// Minimal audit with only the key and the filterable columns set
    pub fn new(
        transaction_datetime: NaiveDateTime,
        system: &str,
        token: &str,
        status: Option<i32>,
        pan: Option<&str>,
    ) -> Self {
        Audit {
            transaction_datetime,
            system: system.to_string(),
            token: token.to_string(),
            pid: None,
            audit_type: None,
            score: None,
            pan: pan.map(str::to_string),
            status,
            trip: None,
            timezone: None,
            clock1: None,
            clock2: None,
            clock3: None,
            clock4: None,
            clock5: None,
            clock6: None,
            clock7: None,
            clock8: None,
            clock9: None,
            clock10: None,
        }
    }

    pub fn id(&self) -> SparkId {
        SparkId::new(self.transaction_datetime, &self.system, &self.token)
    }
}

// ============================================================================
// AUDIT DETAILS (audit + stage durations)
// ============================================================================

const FALCON_STATUSES: [i32; 4] = [41, 42, 43, 44];
const LSDB_STATUSES: [i32; 5] = [2, 3, 422, 23, 24];

/// Audit plus the time spent in each processing stage, in milliseconds.
///
/// Falcon, score and reason durations only exist for Falcon statuses
/// (41-44); the LSDB duration only for LSDB statuses (2, 3, 422, 23, 24).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditDetails {
    #[serde(flatten)]
    pub audit: Audit,
    pub total_duration_ms: Option<i64>,
    pub spark_duration_ms: Option<i64>,
    pub falcon_duration_ms: Option<i64>,
    pub lsdb_duration_ms: Option<i64>,
    pub scores_duration_ms: Option<i64>,
    pub reasons_duration_ms: Option<i64>,
}

impl From<Audit> for AuditDetails {
    fn from(audit: Audit) -> Self {
        let status = audit.status.unwrap_or(-1);
        let falcon_stage = FALCON_STATUSES.contains(&status);
        let lsdb_stage = LSDB_STATUSES.contains(&status);

        let total = between(audit.clock1, audit.clock10);
        let spark = between(audit.clock1, audit.clock2)
            .zip(between(audit.clock3, audit.clock10))
            .map(|(before_falcon, after_falcon)| before_falcon + after_falcon);

        AuditDetails {
            total_duration_ms: total,
            spark_duration_ms: spark,
            falcon_duration_ms: falcon_stage
                .then(|| between(audit.clock2, audit.clock3))
                .flatten(),
            lsdb_duration_ms: lsdb_stage
                .then(|| between(audit.clock3, audit.clock4))
                .flatten(),
            scores_duration_ms: falcon_stage
                .then(|| between(audit.clock3, audit.clock4))
                .flatten(),
            reasons_duration_ms: falcon_stage
                .then(|| between(audit.clock4, audit.clock5))
                .flatten(),
            audit,
        }
    }
}

fn between(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Option<i64> {
    Some((to? - from?).num_milliseconds())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    fn clocked_audit(status: i32) -> Audit {
        let mut audit = Audit::new(at(10, 0, 0, 0), "SYS1", "TOKEN001", Some(status), None);
        audit.clock1 = Some(at(10, 0, 0, 0));
        audit.clock2 = Some(at(10, 0, 0, 10));
        audit.clock3 = Some(at(10, 0, 0, 60));
        audit.clock4 = Some(at(10, 0, 0, 90));
        audit.clock5 = Some(at(10, 0, 0, 95));
        audit.clock10 = Some(at(10, 0, 0, 120));
        audit
    }

    #[test]
    fn test_parse_key_timestamp_precisions() {
        let five = parse_key_timestamp("2024-03-01T10:15:42.12345").unwrap();
        let six = parse_key_timestamp("2024-03-01T10:15:42.123450").unwrap();
        assert_eq!(five, six);

        let plain = parse_key_timestamp("2024-03-01 10:15:42").unwrap();
        assert_eq!(plain, at(10, 15, 42, 0));

        assert!(matches!(
            parse_key_timestamp("01/03/2024"),
            Err(AuditError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_falcon_status_durations() {
        let details = AuditDetails::from(clocked_audit(42));

        assert_eq!(details.total_duration_ms, Some(120));
        assert_eq!(details.spark_duration_ms, Some(10 + 60));
        assert_eq!(details.falcon_duration_ms, Some(50));
        assert_eq!(details.scores_duration_ms, Some(30));
        assert_eq!(details.reasons_duration_ms, Some(5));
        assert_eq!(details.lsdb_duration_ms, None);
    }

    #[test]
    fn test_lsdb_status_durations() {
        let details = AuditDetails::from(clocked_audit(422));

        assert_eq!(details.lsdb_duration_ms, Some(30));
        assert_eq!(details.falcon_duration_ms, None);
        assert_eq!(details.scores_duration_ms, None);
        assert_eq!(details.reasons_duration_ms, None);
    }

    #[test]
    fn test_missing_clock_leaves_duration_empty() {
        let mut audit = clocked_audit(41);
        audit.clock10 = None;

        let details = AuditDetails::from(audit);
        assert_eq!(details.total_duration_ms, None);
        assert_eq!(details.spark_duration_ms, None);
        assert_eq!(details.falcon_duration_ms, Some(50));
    }
}
