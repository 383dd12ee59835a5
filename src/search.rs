// 🔎 Filter Combination Resolver
//
// A search names a reference timestamp plus any subset of
// {system, status, PAN}. Each populated filter contributes a weight to a
// discriminant, and the discriminant selects one of a closed family of
// query shapes with a fixed, ordered argument tuple:
//
//   system +1, status +2, partial PAN (6 chars) +7, full PAN (19 chars) +11
//
// Partial and full PAN are mutually exclusive, so the reachable sums are
// {0, 1, 2, 3, 7, 8, 9, 10, 11, 12, 13, 14}. The sort direction then picks
// the "after / ascending" or "before / descending" form of the shape.

use crate::entities::Audit;
use crate::error::{AuditError, Result};
use crate::store::{AuditStore, Page};
use chrono::{NaiveDateTime, NaiveTime};
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_AUTOLOAD_SIZE: u32 = 20;
pub const PARTIAL_PAN_LEN: usize = 6;
pub const FULL_PAN_LEN: usize = 19;

const SYSTEM_WEIGHT: u8 = 1;
const STATUS_WEIGHT: u8 = 2;
const PARTIAL_PAN_WEIGHT: u8 = 7;
const FULL_PAN_WEIGHT: u8 = 11;

// ============================================================================
// SEARCH REQUEST (wire form) → SEARCH CRITERIA (normalized)
// ============================================================================

/// Search body as received. Accepts the descriptive field names and the
/// short legacy ones (`size`, `date`, `sortAsc`, `system`, `status`).
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub page: Option<i64>,

    #[serde(default, alias = "size", alias = "pageSize")]
    pub page_size: Option<i64>,

    #[serde(alias = "date", alias = "referenceTimestamp")]
    pub reference_timestamp: NaiveDateTime,

    #[serde(default, alias = "sortAsc", alias = "sortAscending")]
    pub sort_ascending: Option<bool>,

    #[serde(default, alias = "system", alias = "sourceSystem")]
    pub source_system: Option<String>,

    #[serde(default, alias = "status", alias = "statusCode")]
    pub status_code: Option<i32>,

    #[serde(default, alias = "panValue")]
    pub pan: Option<String>,
}

/// PAN filter after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PanFilter {
    /// First six digits (BIN), matched against the start of the PAN
    Prefix(String),
    /// Whole 19-character PAN
    Exact(String),
}

impl PanFilter {
    /// Only 6 or 19 characters are searchable; anything else is no filter.
    pub fn normalize(pan: &str) -> Option<PanFilter> {
        match pan.chars().count() {
            PARTIAL_PAN_LEN => Some(PanFilter::Prefix(pan.to_string())),
            FULL_PAN_LEN => Some(PanFilter::Exact(pan.to_string())),
            _ => None,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            PanFilter::Prefix(pan) | PanFilter::Exact(pan) => pan,
        }
    }
}

/// Normalized search criteria
///
/// Out-of-range paging is corrected rather than rejected: a negative page
/// becomes 0 and a non-positive size becomes 10.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchCriteria {
    pub page: u32,
    pub page_size: u32,
    pub reference_timestamp: NaiveDateTime,
    pub sort_ascending: bool,
    pub source_system: Option<String>,
    pub status_code: Option<i32>,
    pub pan: Option<PanFilter>,
}

impl SearchCriteria {
    pub fn new(reference_timestamp: NaiveDateTime) -> Self {
        SearchCriteria {
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            reference_timestamp,
            sort_ascending: false,
            source_system: None,
            status_code: None,
            pan: None,
        }
    }

    pub fn with_page(mut self, page: i64, page_size: i64) -> Self {
        self.page = normalize_page(Some(page));
        self.page_size = normalize_page_size(Some(page_size));
        self
    }

    pub fn ascending(mut self, ascending: bool) -> Self {
        self.sort_ascending = ascending;
        self
    }

    pub fn with_system(mut self, system: &str) -> Self {
        self.source_system = normalize_system(Some(system.to_string()));
        self
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status_code = normalize_status(Some(status));
        self
    }

    pub fn with_pan(mut self, pan: &str) -> Self {
        self.pan = PanFilter::normalize(pan);
        self
    }

    /// Active filters for this request
    pub fn flags(&self) -> FilterFlags {
        FilterFlags {
            system: self.source_system.is_some(),
            status: self.status_code.is_some(),
            partial_pan: matches!(self.pan, Some(PanFilter::Prefix(_))),
            full_pan: matches!(self.pan, Some(PanFilter::Exact(_))),
        }
    }

    pub fn direction(&self) -> SortDirection {
        if self.sort_ascending {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        }
    }
}

impl From<SearchRequest> for SearchCriteria {
    fn from(request: SearchRequest) -> Self {
        SearchCriteria {
            page: normalize_page(request.page),
            page_size: normalize_page_size(request.page_size),
            reference_timestamp: request.reference_timestamp,
            sort_ascending: request.sort_ascending.unwrap_or(false),
            source_system: normalize_system(request.source_system),
            status_code: normalize_status(request.status_code),
            pan: request.pan.as_deref().and_then(PanFilter::normalize),
        }
    }
}

fn normalize_page(page: Option<i64>) -> u32 {
    page.filter(|p| *p >= 0)
        .map(|p| u32::try_from(p).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

fn normalize_page_size(size: Option<i64>) -> u32 {
    size.filter(|s| *s > 0)
        .map(|s| u32::try_from(s).unwrap_or(u32::MAX))
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

fn normalize_system(system: Option<String>) -> Option<String> {
    system.filter(|s| !s.is_empty())
}

fn normalize_status(status: Option<i32>) -> Option<i32> {
    status.filter(|s| *s >= 0)
}

// ============================================================================
// FILTER FLAGS & DISCRIMINANT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterFlags {
    pub system: bool,
    pub status: bool,
    pub partial_pan: bool,
    pub full_pan: bool,
}

impl FilterFlags {
    pub fn discriminant(&self) -> u8 {
        let mut sum = 0;
        if self.system {
            sum += SYSTEM_WEIGHT;
        }
        if self.status {
            sum += STATUS_WEIGHT;
        }
        if self.partial_pan {
            sum += PARTIAL_PAN_WEIGHT;
        }
        if self.full_pan {
            sum += FULL_PAN_WEIGHT;
        }
        sum
    }
}

// ============================================================================
// QUERY SHAPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueryShape {
    Timestamp,
    System,
    Status,
    SystemStatus,
    PanPrefix,
    PanExact,
    SystemPanPrefix,
    SystemPanExact,
    StatusPanPrefix,
    StatusPanExact,
    SystemStatusPanPrefix,
    SystemStatusPanExact,
}

impl QueryShape {
    pub const ALL: [QueryShape; 12] = [
        QueryShape::Timestamp,
        QueryShape::System,
        QueryShape::Status,
        QueryShape::SystemStatus,
        QueryShape::PanPrefix,
        QueryShape::PanExact,
        QueryShape::SystemPanPrefix,
        QueryShape::SystemPanExact,
        QueryShape::StatusPanPrefix,
        QueryShape::StatusPanExact,
        QueryShape::SystemStatusPanPrefix,
        QueryShape::SystemStatusPanExact,
    ];

    pub fn from_discriminant(discriminant: u8) -> Result<QueryShape> {
        let shape = match discriminant {
            0 => QueryShape::Timestamp,
            1 => QueryShape::System,
            2 => QueryShape::Status,
            3 => QueryShape::SystemStatus,
            7 => QueryShape::PanPrefix,
            8 => QueryShape::SystemPanPrefix,
            9 => QueryShape::StatusPanPrefix,
            10 => QueryShape::SystemStatusPanPrefix,
            11 => QueryShape::PanExact,
            12 => QueryShape::SystemPanExact,
            13 => QueryShape::StatusPanExact,
            14 => QueryShape::SystemStatusPanExact,
            other => return Err(AuditError::UnsupportedFilterCombination(other)),
        };
        Ok(shape)
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueryShape::Timestamp => "timestamp",
            QueryShape::System => "system",
            QueryShape::Status => "status",
            QueryShape::SystemStatus => "system+status",
            QueryShape::PanPrefix => "partial-pan",
            QueryShape::PanExact => "full-pan",
            QueryShape::SystemPanPrefix => "system+partial-pan",
            QueryShape::SystemPanExact => "system+full-pan",
            QueryShape::StatusPanPrefix => "status+partial-pan",
            QueryShape::StatusPanExact => "status+full-pan",
            QueryShape::SystemStatusPanPrefix => "system+status+partial-pan",
            QueryShape::SystemStatusPanExact => "system+status+full-pan",
        }
    }

    pub fn has_system(&self) -> bool {
        matches!(
            self,
            QueryShape::System
                | QueryShape::SystemStatus
                | QueryShape::SystemPanPrefix
                | QueryShape::SystemPanExact
                | QueryShape::SystemStatusPanPrefix
                | QueryShape::SystemStatusPanExact
        )
    }

    pub fn has_status(&self) -> bool {
        matches!(
            self,
            QueryShape::Status
                | QueryShape::SystemStatus
                | QueryShape::StatusPanPrefix
                | QueryShape::StatusPanExact
                | QueryShape::SystemStatusPanPrefix
                | QueryShape::SystemStatusPanExact
        )
    }

    pub fn pan_match(&self) -> Option<PanMatch> {
        match self {
            QueryShape::PanPrefix
            | QueryShape::SystemPanPrefix
            | QueryShape::StatusPanPrefix
            | QueryShape::SystemStatusPanPrefix => Some(PanMatch::Prefix),
            QueryShape::PanExact
            | QueryShape::SystemPanExact
            | QueryShape::StatusPanExact
            | QueryShape::SystemStatusPanExact => Some(PanMatch::Exact),
            _ => None,
        }
    }

    /// Number of positional arguments, the reference timestamp included
    pub fn arity(&self) -> usize {
        1 + usize::from(self.has_system())
            + usize::from(self.has_status())
            + usize::from(self.pan_match().is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanMatch {
    Prefix,
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    /// Rows after the reference timestamp, oldest first
    Ascending,
    /// Rows before the reference timestamp, newest first
    Descending,
}

/// Positional query argument, in shape order
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArg {
    Timestamp(NaiveDateTime),
    System(String),
    Status(i32),
    Pan(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

/// A fully parameterized query ready for the store
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSearch {
    pub shape: QueryShape,
    pub direction: SortDirection,
    pub args: Vec<QueryArg>,
    pub page: PageRequest,
}

// ============================================================================
// RESOLUTION & DISPATCH
// ============================================================================

/// Pick the query shape for `criteria` and lay out its arguments.
pub fn resolve(criteria: &SearchCriteria) -> Result<ResolvedSearch> {
    resolve_flags(criteria, criteria.flags())
}

fn resolve_flags(criteria: &SearchCriteria, flags: FilterFlags) -> Result<ResolvedSearch> {
    let shape = QueryShape::from_discriminant(flags.discriminant())?;

    let mut args = vec![QueryArg::Timestamp(criteria.reference_timestamp)];
    if shape.has_system() {
        args.extend(criteria.source_system.clone().map(QueryArg::System));
    }
    if shape.has_status() {
        args.extend(criteria.status_code.map(QueryArg::Status));
    }
    if shape.pan_match().is_some() {
        args.extend(
            criteria
                .pan
                .as_ref()
                .map(|pan| QueryArg::Pan(pan.value().to_string())),
        );
    }

    if args.len() != shape.arity() {
        return Err(AuditError::UnsupportedFilterCombination(flags.discriminant()));
    }

    Ok(ResolvedSearch {
        shape,
        direction: criteria.direction(),
        args,
        page: PageRequest {
            page: criteria.page,
            size: criteria.page_size,
        },
    })
}

/// Resolve `criteria` and run it against `store`.
pub fn search<S: AuditStore + ?Sized>(store: &S, criteria: &SearchCriteria) -> Result<Page<Audit>> {
    let resolved = resolve(criteria)?;
    debug!(
        "search shape={} direction={:?} page={} size={}",
        resolved.shape.name(),
        resolved.direction,
        resolved.page.page,
        resolved.page.size
    );
    store.find_audits(&resolved)
}

/// First page of the newest day: every audit after midnight of the day
/// holding the latest audit, oldest first. Empty when there are no audits.
pub fn load_last_day<S: AuditStore + ?Sized>(store: &S, size: u32) -> Result<Page<Audit>> {
    let Some(latest) = store.latest_audit_time()? else {
        return Ok(Page::new(Vec::new(), 0, size, 0));
    };

    let midnight = latest.date().and_time(NaiveTime::MIN);
    let criteria = SearchCriteria::new(midnight)
        .ascending(true)
        .with_page(0, i64::from(size));
    search(store, &criteria)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const FULL_PAN: &str = "1234567890123456789";

    fn reference() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn request(json: serde_json::Value) -> SearchCriteria {
        serde_json::from_value::<SearchRequest>(json).unwrap().into()
    }

    #[test]
    fn test_system_with_partial_pan() {
        let criteria = SearchCriteria::new(reference())
            .with_system("SYS1")
            .with_pan("123456");

        assert_eq!(criteria.flags().discriminant(), 8);

        let resolved = resolve(&criteria).unwrap();
        assert_eq!(resolved.shape.name(), "system+partial-pan");
        assert_eq!(
            resolved.args,
            vec![
                QueryArg::Timestamp(reference()),
                QueryArg::System("SYS1".to_string()),
                QueryArg::Pan("123456".to_string()),
            ]
        );
    }

    #[test]
    fn test_status_with_full_pan() {
        let criteria = SearchCriteria::new(reference())
            .with_status(3)
            .with_pan(FULL_PAN);

        assert_eq!(criteria.flags().discriminant(), 13);

        let resolved = resolve(&criteria).unwrap();
        assert_eq!(resolved.shape.name(), "status+full-pan");
        assert_eq!(
            resolved.args,
            vec![
                QueryArg::Timestamp(reference()),
                QueryArg::Status(3),
                QueryArg::Pan(FULL_PAN.to_string()),
            ]
        );
    }

    #[test]
    fn test_every_filter_subset_resolves_to_one_shape() {
        let pans = [None, Some("654321"), Some(FULL_PAN)];
        let mut seen = std::collections::HashSet::new();

        for system in [None, Some("SYS1")] {
            for status in [None, Some(41)] {
                for pan in pans {
                    let mut criteria = SearchCriteria::new(reference());
                    if let Some(system) = system {
                        criteria = criteria.with_system(system);
                    }
                    if let Some(status) = status {
                        criteria = criteria.with_status(status);
                    }
                    if let Some(pan) = pan {
                        criteria = criteria.with_pan(pan);
                    }

                    let resolved = resolve(&criteria).unwrap();
                    assert_eq!(resolved.args.len(), resolved.shape.arity());
                    assert!(matches!(resolved.args[0], QueryArg::Timestamp(_)));
                    seen.insert(resolved.shape);
                }
            }
        }

        assert_eq!(seen.len(), QueryShape::ALL.len());
    }

    #[test]
    fn test_unreachable_discriminants_are_rejected() {
        for discriminant in [4, 5, 6, 15, 18, 21] {
            assert!(matches!(
                QueryShape::from_discriminant(discriminant),
                Err(AuditError::UnsupportedFilterCombination(d)) if d == discriminant
            ));
        }

        // Both PAN kinds at once cannot come from SearchCriteria, but the
        // flag algebra must still refuse it.
        let criteria = SearchCriteria::new(reference());
        let flags = FilterFlags {
            partial_pan: true,
            full_pan: true,
            ..FilterFlags::default()
        };
        assert!(matches!(
            resolve_flags(&criteria, flags),
            Err(AuditError::UnsupportedFilterCombination(18))
        ));
    }

    #[test]
    fn test_pan_length_normalization() {
        assert_eq!(PanFilter::normalize("12345"), None);
        assert_eq!(PanFilter::normalize("1234567"), None);
        assert_eq!(PanFilter::normalize(""), None);
        assert_eq!(
            PanFilter::normalize("123456"),
            Some(PanFilter::Prefix("123456".to_string()))
        );
        assert_eq!(
            PanFilter::normalize(FULL_PAN),
            Some(PanFilter::Exact(FULL_PAN.to_string()))
        );

        let criteria = SearchCriteria::new(reference()).with_pan("1234567");
        assert_eq!(resolve(&criteria).unwrap().shape, QueryShape::Timestamp);
    }

    #[test]
    fn test_paging_is_corrected_not_rejected() {
        let criteria = request(serde_json::json!({
            "page": -3,
            "size": 0,
            "date": "2024-03-01T00:00:00",
        }));
        assert_eq!(criteria.page, 0);
        assert_eq!(criteria.page_size, DEFAULT_PAGE_SIZE);

        let criteria = request(serde_json::json!({
            "page": 2,
            "page_size": -1,
            "reference_timestamp": "2024-03-01T00:00:00",
        }));
        assert_eq!(criteria.page, 2);
        assert_eq!(criteria.page_size, DEFAULT_PAGE_SIZE);

        let criteria = SearchCriteria::new(reference()).with_page(4, 25);
        assert_eq!(resolve(&criteria).unwrap().page.offset(), 100);
    }

    #[test]
    fn test_empty_system_and_negative_status_are_absent() {
        let criteria = request(serde_json::json!({
            "date": "2024-03-01T00:00:00",
            "sortAsc": true,
            "system": "",
            "status": -1,
            "pan": "123",
        }));

        assert_eq!(criteria.flags(), FilterFlags::default());
        let resolved = resolve(&criteria).unwrap();
        assert_eq!(resolved.shape, QueryShape::Timestamp);
        assert_eq!(resolved.direction, SortDirection::Ascending);
        assert_eq!(resolved.args.len(), 1);
    }
}
