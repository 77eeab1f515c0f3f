mod jsonl;
mod memory;
pub mod seed;
mod sqlite;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

use crate::sample::{DayBucket, Sample};
use crate::web::config::{StorageBackend, StorageConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub samples: Vec<Sample>,
    /// Samples in the whole day, not just this page.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DayCount {
    pub day: DayBucket,
    pub count: usize,
}

/// Append-only persistence of samples, grouped by day bucket.
///
/// Ordering everywhere is by `captured_at_unix`, then by insertion order, so
/// duplicates and out-of-order arrivals are kept and listed deterministically.
/// An `append` is visible to every read as soon as it returns.
pub trait SampleStore: Send + Sync {
    fn append(&self, sample: &Sample) -> StoreResult<()>;

    /// Greatest timestamp; the last inserted wins a tie.
    fn latest(&self) -> StoreResult<Option<Sample>>;

    /// Smallest timestamp; the first inserted wins a tie.
    fn earliest(&self) -> StoreResult<Option<Sample>>;

    fn list_by_day(&self, day: DayBucket, page: PageRequest, order: SortOrder)
        -> StoreResult<Page>;

    /// The `limit` most recent samples, oldest first.
    fn list_recent(&self, limit: usize) -> StoreResult<Vec<Sample>>;

    /// Every sample on or after `from` (or all of them), oldest first.
    fn list_from(&self, from: Option<DayBucket>) -> StoreResult<Vec<Sample>>;

    fn distinct_days(&self) -> StoreResult<Vec<DayBucket>>;

    fn day_counts(&self) -> StoreResult<Vec<DayCount>>;

    fn count_day(&self, day: DayBucket) -> StoreResult<usize>;

    fn count(&self) -> StoreResult<usize>;

    /// Delete every sample whose day is strictly before `cutoff`.
    fn evict_older_than(&self, cutoff: DayBucket) -> StoreResult<usize>;

    /// Earliest day ever appended. Eviction does not move it.
    fn origin_day(&self) -> StoreResult<Option<DayBucket>>;
}

pub fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn SampleStore>> {
    let store: Arc<dyn SampleStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::with_capacity(config.memory_capacity)),
        StorageBackend::Jsonl => Arc::new(JsonlStore::open(&config.path)?),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
    };

    log::info!(
        "Opened {} sample store at {} ({} samples)",
        config.backend,
        config.path.display(),
        store.count()?
    );

    Ok(store)
}

/// Sort key shared by the in-process backends: timestamp, then insertion.
fn chronological<'a>(samples: impl Iterator<Item = &'a Sample>) -> Vec<Sample> {
    let mut sorted: Vec<Sample> = samples.cloned().collect();
    // Stable sort keeps insertion order between equal timestamps.
    sorted.sort_by_key(|s| s.captured_at_unix);
    sorted
}

fn paginate(mut samples: Vec<Sample>, page: PageRequest, order: SortOrder) -> Page {
    let total = samples.len();
    if order == SortOrder::Desc {
        samples.reverse();
    }
    let samples = samples
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .collect();
    Page { samples, total }
}

fn count_by_day<'a>(samples: impl Iterator<Item = &'a Sample>) -> Vec<DayCount> {
    let mut counts = std::collections::BTreeMap::<DayBucket, usize>::new();
    for sample in samples {
        *counts.entry(sample.day).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(day, count)| DayCount { day, count })
        .collect()
}
