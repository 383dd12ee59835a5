// 📊 Interval Bucketing Aggregator
//
// Splits a time range into buckets and reports, for every bucket and every
// server seen in the range, how many messages were sent and the highest
// agent id. Pairs with no samples are still reported (zero-filled).
//
// Bucket policy per granularity:
// - seconds / hours / days / minutes: fixed width of one day divided by
//   86400 / 24 / 1 / 1440, anchored at `start`, end exclusive
// - months: `start + k months`, end inclusive
// - years: Jan 1 of `year(start) + k`, end inclusive
//
// Buckets are generated while their start is before `end`, so the last
// calendar bucket may reach past `end`.

use crate::entities::StatisticSample;
use crate::error::{AuditError, Result};
use crate::store::StatisticsStore;
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const SECONDS_PER_DAY: i64 = 86_400;
const DEFAULT_WINDOW_MINUTES: i64 = 10;

pub const DATETIME_LABEL: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_LABEL: &str = "%Y-%m-%d";

// ============================================================================
// GRANULARITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Seconds,
    Hours,
    Days,
    /// Fallback for any unrecognized interval name
    Minutes,
    Months,
    Years,
}

impl Granularity {
    /// Parse an interval name. Unknown names fall back to minutes.
    pub fn parse(interval: &str) -> Granularity {
        match interval {
            "seconds" => Granularity::Seconds,
            "hours" => Granularity::Hours,
            "days" => Granularity::Days,
            "months" => Granularity::Months,
            "years" => Granularity::Years,
            _ => Granularity::Minutes,
        }
    }

    /// Buckets per day for the fixed-width granularities
    pub fn divisor(&self) -> Option<i64> {
        match self {
            Granularity::Seconds => Some(86_400),
            Granularity::Hours => Some(24),
            Granularity::Days => Some(1),
            Granularity::Minutes => Some(1_440),
            Granularity::Months | Granularity::Years => None,
        }
    }

    pub fn label_format(&self) -> &'static str {
        match self {
            Granularity::Months => DATE_LABEL,
            _ => DATETIME_LABEL,
        }
    }

    /// Calendar buckets include their upper edge, fixed-width ones do not.
    pub fn end_inclusive(&self) -> bool {
        self.divisor().is_none()
    }
}

// ============================================================================
// TIME BUCKETS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub end_inclusive: bool,
}

impl TimeBucket {
    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        instant >= self.start
            && if self.end_inclusive {
                instant <= self.end
            } else {
                instant < self.end
            }
    }
}

/// Bucket boundaries for `[start, end)` at `granularity`, oldest first.
///
/// `end <= start` yields no buckets.
pub fn plan_buckets(
    start: NaiveDateTime,
    end: NaiveDateTime,
    granularity: Granularity,
) -> Vec<TimeBucket> {
    let end_inclusive = granularity.end_inclusive();
    let edge = |k: u32| -> Option<NaiveDateTime> {
        match granularity {
            Granularity::Months => add_months(start, k),
            Granularity::Years => year_start(start.year().checked_add(i32::try_from(k).ok()?)?),
            _ => {
                let divisor = granularity.divisor()?;
                let width_ms = SECONDS_PER_DAY * 1_000 / divisor;
                start.checked_add_signed(Duration::milliseconds(width_ms.checked_mul(i64::from(k))?))
            }
        }
    };

    let mut buckets = Vec::new();
    let mut k = 0u32;
    while let Some(bucket_start) = edge(k) {
        if bucket_start >= end {
            break;
        }
        let Some(bucket_end) = edge(k + 1) else {
            break;
        };
        buckets.push(TimeBucket {
            start: bucket_start,
            end: bucket_end,
            end_inclusive,
        });
        k += 1;
    }

    buckets
}

/// Number of buckets `plan_buckets` would produce, without building them
pub fn bucket_count(start: NaiveDateTime, end: NaiveDateTime, granularity: Granularity) -> u64 {
    if end <= start {
        return 0;
    }
    match granularity.divisor() {
        Some(divisor) => {
            let width_ms = SECONDS_PER_DAY * 1_000 / divisor;
            let span_ms = (end - start).num_milliseconds();
            u64::try_from((span_ms + width_ms - 1) / width_ms).unwrap_or(u64::MAX)
        }
        None => plan_buckets(start, end, granularity).len() as u64,
    }
}

/// Calendar month addition. A date on the last day of its month maps to
/// the last day of the target month; other days are clamped to the target
/// month's length.
pub fn add_months(instant: NaiveDateTime, months: u32) -> Option<NaiveDateTime> {
    let shifted = instant.checked_add_months(Months::new(months))?;
    if is_last_day_of_month(instant.date()) {
        let last = last_day_of_month(shifted.year(), shifted.month())?;
        Some(last.and_time(instant.time()))
    } else {
        Some(shifted)
    }
}

fn year_start(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

fn is_last_day_of_month(date: NaiveDate) -> bool {
    date.succ_opt().map_or(true, |next| next.month() != date.month())
}

// ============================================================================
// AGGREGATE ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateRow {
    pub bucket_label: String,
    pub server_name: Option<String>,
    pub sent_count: i64,
    pub distinct_server_count: i64,
    pub max_agent_id: i64,
}

impl AggregateRow {
    /// `server,label,sent,distinct_servers,max_agent`
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.server_name.as_deref().unwrap_or(""),
            self.bucket_label,
            self.sent_count,
            self.distinct_server_count,
            self.max_agent_id
        )
    }
}

/// Join buckets × servers against `samples` (sorted by date).
///
/// Only samples from servers in `servers` are counted. With no servers at
/// all every bucket still yields one row, with no server name.
pub fn aggregate_samples(
    buckets: &[TimeBucket],
    samples: &[StatisticSample],
    servers: &BTreeSet<String>,
    label_format: &str,
) -> Vec<AggregateRow> {
    let mut rows = Vec::with_capacity(buckets.len() * servers.len().max(1));

    for bucket in buckets {
        let label = bucket.start.format(label_format).to_string();

        let lo = samples.partition_point(|s| s.date < bucket.start);
        let hi = if bucket.end_inclusive {
            samples.partition_point(|s| s.date <= bucket.end)
        } else {
            samples.partition_point(|s| s.date < bucket.end)
        };

        // server -> (sent, max agent)
        let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for sample in samples.get(lo..hi).unwrap_or_default() {
            if !servers.contains(&sample.server) {
                continue;
            }
            let entry = totals.entry(sample.server.as_str()).or_insert((0, 0));
            entry.0 += sample.sent.unwrap_or(0);
            entry.1 = entry.1.max(sample.agent);
        }

        if servers.is_empty() {
            rows.push(AggregateRow {
                bucket_label: label,
                server_name: None,
                sent_count: 0,
                distinct_server_count: 0,
                max_agent_id: 0,
            });
            continue;
        }

        for server in servers {
            let (sent, agent) = totals.get(server.as_str()).copied().unwrap_or((0, 0));
            rows.push(AggregateRow {
                bucket_label: label.clone(),
                server_name: Some(server.clone()),
                sent_count: sent,
                distinct_server_count: 1,
                max_agent_id: agent,
            });
        }
    }

    rows
}

/// Bucket statistics for `[start, end)` at `granularity` with one store fetch.
pub fn aggregate<S: StatisticsStore + ?Sized>(
    store: &S,
    start: NaiveDateTime,
    end: NaiveDateTime,
    granularity: Granularity,
) -> Result<Vec<AggregateRow>> {
    let buckets = plan_buckets(start, end, granularity);
    let (Some(first), Some(last)) = (buckets.first(), buckets.last()) else {
        debug!("no buckets for {start} .. {end} ({granularity:?})");
        return Ok(Vec::new());
    };

    let fetch_from = first.start.min(start);
    let fetch_to = last.end.max(end);
    let mut samples = store.statistics_between(fetch_from, fetch_to)?;
    samples.sort_by(|a, b| a.date.cmp(&b.date));

    // calendar granularities take servers from the closed range
    let servers: BTreeSet<String> = samples
        .iter()
        .filter(|s| {
            s.date >= start
                && if granularity.end_inclusive() {
                    s.date <= end
                } else {
                    s.date < end
                }
        })
        .map(|s| s.server.clone())
        .collect();

    debug!(
        "aggregate {granularity:?}: {} buckets, {} servers, {} samples",
        buckets.len(),
        servers.len(),
        samples.len()
    );

    Ok(aggregate_samples(
        &buckets,
        &samples,
        &servers,
        granularity.label_format(),
    ))
}

// ============================================================================
// DEFAULT WINDOW
// ============================================================================

/// Fill in a missing range: `to` defaults to the newest sample, `from` to
/// ten minutes before `to`. `None` when there is nothing to anchor on.
///
/// A `to` too close to the start of the calendar to step back from is an
/// `InvalidRange`.
pub fn resolve_window<S: StatisticsStore + ?Sized>(
    store: &S,
    from: Option<NaiveDateTime>,
    to: Option<NaiveDateTime>,
) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
    let to = match to {
        Some(to) => to,
        None => match store.latest_statistic_time()? {
            Some(latest) => latest,
            None => return Ok(None),
        },
    };
    let from = match from {
        Some(from) => from,
        None => to
            .checked_sub_signed(Duration::minutes(DEFAULT_WINDOW_MINUTES))
            .ok_or_else(|| {
                AuditError::InvalidRange(format!(
                    "no {DEFAULT_WINDOW_MINUTES} minute window fits before {to}"
                ))
            })?,
    };
    Ok(Some((from, to)))
}

/// Reject plans with more than `max_buckets` buckets before building them.
pub fn check_bucket_limit(
    start: NaiveDateTime,
    end: NaiveDateTime,
    granularity: Granularity,
    max_buckets: u64,
) -> Result<()> {
    let buckets = bucket_count(start, end, granularity);
    if buckets > max_buckets {
        return Err(AuditError::InvalidRange(format!(
            "{buckets} {granularity:?} buckets requested, limit is {max_buckets}"
        )));
    }
    Ok(())
}
