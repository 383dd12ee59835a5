// 🗄️ Store boundary - the only collaborator of the reporting core
//
// The resolver hands over a `ResolvedSearch`; the aggregator asks for the
// raw statistics of one time window. Both are implemented here for a
// SQLite connection. Each (shape, direction) pair renders to one prepared
// statement with positional parameters in shape order.

use crate::db::{self, audit_from_row, statistic_from_row, AUDIT_COLUMNS, STATISTIC_COLUMNS};
use crate::entities::{Audit, StatisticSample};
use crate::error::Result;
use crate::search::{PanMatch, QueryArg, QueryShape, ResolvedSearch, SortDirection, PARTIAL_PAN_LEN};
use chrono::NaiveDateTime;
use rusqlite::types::ToSqlOutput;
use rusqlite::{params, Connection, ToSql};
use serde::Serialize;

// ============================================================================
// PAGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, page: u32, size: u32, total_elements: u64) -> Self {
        let total_pages = if size == 0 {
            0
        } else {
            total_elements.div_ceil(u64::from(size))
        };

        Page {
            content,
            page,
            size,
            total_elements,
            total_pages,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
        }
    }
}

// ============================================================================
// STORE TRAITS
// ============================================================================

pub trait AuditStore {
    fn find_audits(&self, search: &ResolvedSearch) -> Result<Page<Audit>>;

    fn latest_audit_time(&self) -> Result<Option<NaiveDateTime>>;
}

pub trait StatisticsStore {
    /// Samples with `from <= date <= to`, oldest first
    fn statistics_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<StatisticSample>>;

    fn latest_statistic_time(&self) -> Result<Option<NaiveDateTime>>;
}

// ============================================================================
// SQL RENDERING
// ============================================================================

/// WHERE clause for a shape, placeholders numbered in argument order
pub fn predicate_sql(shape: QueryShape, direction: SortDirection) -> String {
    let mut clauses = vec![match direction {
        SortDirection::Ascending => "transaction_datetime > ?1".to_string(),
        SortDirection::Descending => "transaction_datetime < ?1".to_string(),
    }];
    let mut position = 2;

    if shape.has_system() {
        clauses.push(format!("system = ?{position}"));
        position += 1;
    }
    if shape.has_status() {
        clauses.push(format!("status = ?{position}"));
        position += 1;
    }
    match shape.pan_match() {
        Some(PanMatch::Prefix) => {
            clauses.push(format!("substr(pan, 1, {PARTIAL_PAN_LEN}) = ?{position}"))
        }
        Some(PanMatch::Exact) => clauses.push(format!("pan = ?{position}")),
        None => {}
    }

    clauses.join(" AND ")
}

fn order_sql(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    }
}

impl ToSql for QueryArg {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            QueryArg::Timestamp(ts) => ts.to_sql(),
            QueryArg::System(system) => system.to_sql(),
            QueryArg::Status(status) => status.to_sql(),
            QueryArg::Pan(pan) => pan.to_sql(),
        }
    }
}

// ============================================================================
// SQLITE IMPLEMENTATION
// ============================================================================

impl AuditStore for Connection {
    fn find_audits(&self, search: &ResolvedSearch) -> Result<Page<Audit>> {
        let predicate = predicate_sql(search.shape, search.direction);
        let arity = search.args.len();

        let count_sql = format!("SELECT COUNT(*) FROM spk_audit WHERE {predicate}");
        let total: i64 = self
            .prepare_cached(&count_sql)?
            .query_row(rusqlite::params_from_iter(search.args.iter()), |row| row.get(0))?;

        let page_sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM spk_audit WHERE {predicate}
             ORDER BY transaction_datetime {order}
             LIMIT ?{limit} OFFSET ?{offset}",
            order = order_sql(search.direction),
            limit = arity + 1,
            offset = arity + 2,
        );

        let limit = i64::from(search.page.size);
        let offset = i64::try_from(search.page.offset()).unwrap_or(i64::MAX);
        let mut bound: Vec<&dyn ToSql> = search.args.iter().map(|arg| arg as &dyn ToSql).collect();
        bound.push(&limit);
        bound.push(&offset);

        let mut stmt = self.prepare_cached(&page_sql)?;
        let content = stmt
            .query_map(bound.as_slice(), audit_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page::new(
            content,
            search.page.page,
            search.page.size,
            u64::try_from(total).unwrap_or(0),
        ))
    }

    fn latest_audit_time(&self) -> Result<Option<NaiveDateTime>> {
        db::latest_audit_time(self)
    }
}

impl StatisticsStore for Connection {
    fn statistics_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<StatisticSample>> {
        let sql = format!(
            "SELECT {STATISTIC_COLUMNS} FROM spk_statistics
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date ASC"
        );
        let mut stmt = self.prepare_cached(&sql)?;
        let samples = stmt
            .query_map(params![from, to], statistic_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(samples)
    }

    fn latest_statistic_time(&self) -> Result<Option<NaiveDateTime>> {
        let latest = self.query_row("SELECT MAX(date) FROM spk_statistics", [], |row| {
            row.get::<_, Option<NaiveDateTime>>(0)
        })?;
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_audits, setup_database};
    use crate::search::{resolve, SearchCriteria};
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let audits = vec![
            Audit::new(at(1, 8), "SYS1", "T0000001", Some(41), Some("1234567890123456789")),
            Audit::new(at(1, 9), "SYS2", "T0000002", Some(2), Some("1234560000000000000")),
            Audit::new(at(1, 10), "SYS1", "T0000003", Some(2), Some("9999990000000000000")),
            Audit::new(at(2, 8), "SYS1", "T0000004", Some(41), Some("1234561111111111111")),
            Audit::new(at(2, 9), "SYS2", "T0000005", Some(41), None),
        ];
        insert_audits(&conn, &audits).unwrap();
        conn
    }

    fn tokens(page: &Page<Audit>) -> Vec<&str> {
        page.content.iter().map(|a| a.token.as_str()).collect()
    }

    #[test]
    fn test_predicate_placeholders_follow_argument_order() {
        assert_eq!(
            predicate_sql(QueryShape::SystemStatusPanExact, SortDirection::Ascending),
            "transaction_datetime > ?1 AND system = ?2 AND status = ?3 AND pan = ?4"
        );
        assert_eq!(
            predicate_sql(QueryShape::StatusPanPrefix, SortDirection::Descending),
            "transaction_datetime < ?1 AND status = ?2 AND substr(pan, 1, 6) = ?3"
        );
        assert_eq!(
            predicate_sql(QueryShape::Timestamp, SortDirection::Descending),
            "transaction_datetime < ?1"
        );
    }

    #[test]
    fn test_ascending_after_reference() {
        let conn = seeded();
        let criteria = SearchCriteria::new(at(1, 8)).ascending(true);

        let page = conn.find_audits(&resolve(&criteria).unwrap()).unwrap();

        // strictly after the reference instant
        assert_eq!(tokens(&page), vec!["T0000002", "T0000003", "T0000004", "T0000005"]);
        assert_eq!(page.total_elements, 4);
    }

    #[test]
    fn test_descending_before_reference_with_system() {
        let conn = seeded();
        let criteria = SearchCriteria::new(at(3, 0)).with_system("SYS1");

        let page = conn.find_audits(&resolve(&criteria).unwrap()).unwrap();
        assert_eq!(tokens(&page), vec!["T0000004", "T0000003", "T0000001"]);
    }

    #[test]
    fn test_partial_and_full_pan_matching() {
        let conn = seeded();

        let prefix = SearchCriteria::new(at(1, 0)).ascending(true).with_pan("123456");
        let page = conn.find_audits(&resolve(&prefix).unwrap()).unwrap();
        assert_eq!(tokens(&page), vec!["T0000001", "T0000002", "T0000004"]);

        let exact = SearchCriteria::new(at(1, 0))
            .ascending(true)
            .with_status(41)
            .with_pan("1234567890123456789");
        let page = conn.find_audits(&resolve(&exact).unwrap()).unwrap();
        assert_eq!(tokens(&page), vec!["T0000001"]);
    }

    #[test]
    fn test_pagination_window_and_totals() {
        let conn = seeded();
        let criteria = SearchCriteria::new(at(1, 0)).ascending(true).with_page(1, 2);

        let page = conn.find_audits(&resolve(&criteria).unwrap()).unwrap();
        assert_eq!(tokens(&page), vec!["T0000003", "T0000004"]);
        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 1);
        assert_eq!(page.size, 2);
    }

    #[test]
    fn test_load_last_day_starts_at_midnight() {
        let conn = seeded();

        let page = crate::search::load_last_day(&conn, 20).unwrap();
        assert_eq!(tokens(&page), vec!["T0000004", "T0000005"]);
        assert_eq!(page.size, 20);

        let empty = Connection::open_in_memory().unwrap();
        setup_database(&empty).unwrap();
        let page = crate::search::load_last_day(&empty, 20).unwrap();
        assert!(page.content.is_empty());
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn test_store_failure_surfaces() {
        // no schema: the store rejects the query
        let conn = Connection::open_in_memory().unwrap();
        let criteria = SearchCriteria::new(at(1, 0));

        let err = conn.find_audits(&resolve(&criteria).unwrap()).unwrap_err();
        assert!(matches!(err, crate::error::AuditError::QueryExecution(_)));
    }
}
