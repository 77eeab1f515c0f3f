//! Read-only views over a [`SampleStore`] used by the HTTP handlers and CLI.
//!
//! Everything here is synchronous and stateless; parameter validation happens
//! before the store is touched.

mod csv;

pub use self::csv::render_csv;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::{IntoParams, ToSchema};

use crate::sample::{DayBucket, Sample};
use crate::store::{PageRequest, SampleStore, SortOrder, StoreError};

pub const DEFAULT_RECENT_LIMIT: usize = 100;
pub const MAX_RECENT_LIMIT: usize = 5_000;
pub const DEFAULT_LAST_DAYS: usize = 3;
pub const MAX_LAST_DAYS: usize = 366;
pub const DEFAULT_PER_PAGE: usize = 1_000;
pub const MAX_PER_PAGE: usize = 1_000;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),
    #[error("no {0} found")]
    NotFound(&'static str),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode CSV: {0}")]
    Encode(String),
}

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RecordsQuery {
    /// Day bucket `YYYY-MM-DD`; the newest day present when omitted.
    pub day: Option<String>,
    /// 1-based page number.
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecordsPage {
    pub records: Vec<Sample>,
    /// Samples in the selected day across all pages.
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub day: Option<DayBucket>,
    pub available_days: Vec<DayBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSelection {
    All,
    Day(DayBucket),
}

impl ExportSelection {
    /// `all` wins when truthy (`1` or `true`); otherwise a `day` is required.
    pub fn from_params(day: Option<&str>, all: Option<&str>) -> QueryResult<Self> {
        if all.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true")) {
            return Ok(ExportSelection::All);
        }
        match day.map(str::trim).filter(|d| !d.is_empty()) {
            Some(day) => parse_day(day).map(ExportSelection::Day),
            None => Err(QueryError::NotFound("samples")),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DayStats {
    pub day: DayBucket,
    /// `Day N`, counting from the first day the store ever recorded.
    /// Eviction does not renumber it.
    #[schema(example = "Day 1")]
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Stats {
    pub total: usize,
    pub first: Option<Sample>,
    pub last: Option<Sample>,
    pub days: Vec<DayStats>,
}

pub fn latest(store: &dyn SampleStore) -> QueryResult<Sample> {
    store.latest()?.ok_or(QueryError::NotFound("samples"))
}

pub fn recent(store: &dyn SampleStore, limit: Option<usize>) -> QueryResult<Vec<Sample>> {
    let limit = bounded("limit", limit, DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT)?;
    Ok(store.list_recent(limit)?)
}

/// Samples from the newest `days` day buckets that hold data.
pub fn last_days(store: &dyn SampleStore, days: Option<usize>) -> QueryResult<Vec<Sample>> {
    let days = bounded("days", days, DEFAULT_LAST_DAYS, MAX_LAST_DAYS)?;
    let present = store.distinct_days()?;

    match present.get(present.len().saturating_sub(days)) {
        Some(&from) => Ok(store.list_from(Some(from))?),
        None => Ok(Vec::new()),
    }
}

pub fn list_records(store: &dyn SampleStore, query: &RecordsQuery) -> QueryResult<RecordsPage> {
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(QueryError::Validation("page must be at least 1".into()));
    }
    let per_page = bounded("per_page", query.per_page, DEFAULT_PER_PAGE, MAX_PER_PAGE)?;
    let order = query.order.unwrap_or_default();
    let available_days = store.distinct_days()?;

    let day = match query.day.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => {
            let day = parse_day(raw)?;
            if !available_days.contains(&day) {
                return Err(QueryError::Validation(format!("no samples for day {day}")));
            }
            Some(day)
        }
        None => available_days.last().copied(),
    };

    let Some(selected) = day else {
        return Ok(RecordsPage {
            records: Vec::new(),
            total: 0,
            page,
            per_page,
            day: None,
            available_days,
        });
    };

    let request = PageRequest {
        limit: per_page,
        offset: (page - 1).saturating_mul(per_page),
    };
    let listed = store.list_by_day(selected, request, order)?;

    Ok(RecordsPage {
        records: listed.samples,
        total: listed.total,
        page,
        per_page,
        day: Some(selected),
        available_days,
    })
}

pub fn export(store: &dyn SampleStore, selection: ExportSelection) -> QueryResult<Vec<Sample>> {
    let samples = match selection {
        ExportSelection::All => store.list_from(None)?,
        ExportSelection::Day(day) => {
            let everything = PageRequest {
                limit: usize::MAX,
                offset: 0,
            };
            store.list_by_day(day, everything, SortOrder::Asc)?.samples
        }
    };

    if samples.is_empty() {
        return Err(QueryError::NotFound("samples"));
    }
    Ok(samples)
}

/// Day buckets present, ascending, with labels and counts.
pub fn days(store: &dyn SampleStore) -> QueryResult<Vec<DayStats>> {
    let counts = store.day_counts()?;
    let origin = store.origin_day()?.or(counts.first().map(|c| c.day));

    Ok(counts
        .into_iter()
        .map(|c| DayStats {
            label: day_label(c.day, origin.unwrap_or(c.day)),
            day: c.day,
            count: c.count,
        })
        .collect())
}

pub fn stats(store: &dyn SampleStore) -> QueryResult<Stats> {
    Ok(Stats {
        total: store.count()?,
        first: store.earliest()?,
        last: store.latest()?,
        days: days(store)?,
    })
}

pub fn day_label(day: DayBucket, first: DayBucket) -> String {
    format!("Day {}", day.days_since(first) + 1)
}

fn parse_day(raw: &str) -> QueryResult<DayBucket> {
    raw.parse()
        .map_err(|_| QueryError::Validation(format!("invalid day '{raw}', expected YYYY-MM-DD")))
}

fn bounded(name: &str, value: Option<usize>, default: usize, max: usize) -> QueryResult<usize> {
    match value.unwrap_or(default) {
        v if (1..=max).contains(&v) => Ok(v),
        v => Err(QueryError::Validation(format!(
            "{name} must be between 1 and {max}, got {v}"
        ))),
    }
}
