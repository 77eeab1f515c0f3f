use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    chronological, count_by_day, paginate, DayCount, Page, PageRequest, SampleStore, SortOrder,
    StoreError, StoreResult,
};
use crate::sample::{DayBucket, Sample};

/// Bounded in-process ring buffer. Nothing survives a restart.
pub struct MemoryStore {
    samples: RwLock<VecDeque<Sample>>,
    origin: RwLock<Option<DayBucket>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            origin: RwLock::new(None),
            capacity,
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, VecDeque<Sample>>> {
        self.samples.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, VecDeque<Sample>>> {
        self.samples.write().map_err(|_| StoreError::Poisoned)
    }
}

impl SampleStore for MemoryStore {
    fn append(&self, sample: &Sample) -> StoreResult<()> {
        let mut samples = self.write()?;
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample.clone());

        let mut origin = self.origin.write().map_err(|_| StoreError::Poisoned)?;
        if origin.is_none_or(|day| sample.day < day) {
            *origin = Some(sample.day);
        }
        Ok(())
    }

    fn latest(&self) -> StoreResult<Option<Sample>> {
        let samples = self.read()?;
        // max_by_key returns the last maximum, which is the latest insert.
        Ok(samples.iter().max_by_key(|s| s.captured_at_unix).cloned())
    }

    fn earliest(&self) -> StoreResult<Option<Sample>> {
        let samples = self.read()?;
        Ok(samples.iter().min_by_key(|s| s.captured_at_unix).cloned())
    }

    fn list_by_day(
        &self,
        day: DayBucket,
        page: PageRequest,
        order: SortOrder,
    ) -> StoreResult<Page> {
        let samples = self.read()?;
        let in_day = chronological(samples.iter().filter(|s| s.day == day));
        Ok(paginate(in_day, page, order))
    }

    fn list_recent(&self, limit: usize) -> StoreResult<Vec<Sample>> {
        let samples = self.read()?;
        let mut sorted = chronological(samples.iter());
        let skip = sorted.len().saturating_sub(limit);
        Ok(sorted.split_off(skip))
    }

    fn list_from(&self, from: Option<DayBucket>) -> StoreResult<Vec<Sample>> {
        let samples = self.read()?;
        Ok(chronological(
            samples.iter().filter(|s| from.is_none_or(|d| s.day >= d)),
        ))
    }

    fn distinct_days(&self) -> StoreResult<Vec<DayBucket>> {
        Ok(self.day_counts()?.into_iter().map(|c| c.day).collect())
    }

    fn day_counts(&self) -> StoreResult<Vec<DayCount>> {
        let samples = self.read()?;
        Ok(count_by_day(samples.iter()))
    }

    fn count_day(&self, day: DayBucket) -> StoreResult<usize> {
        let samples = self.read()?;
        Ok(samples.iter().filter(|s| s.day == day).count())
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.read()?.len())
    }

    fn evict_older_than(&self, cutoff: DayBucket) -> StoreResult<usize> {
        let mut samples = self.write()?;
        let before = samples.len();
        samples.retain(|s| s.day >= cutoff);
        Ok(before - samples.len())
    }

    fn origin_day(&self) -> StoreResult<Option<DayBucket>> {
        Ok(*self.origin.read().map_err(|_| StoreError::Poisoned)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract::{self, sample_at};

    #[test]
    fn satisfies_store_contract() {
        contract::run_all_fresh(|| Box::new(MemoryStore::with_capacity(1_000)));
    }

    #[test]
    fn drops_oldest_when_full() {
        let store = MemoryStore::with_capacity(3);
        for t in 0..5 {
            store.append(&sample_at(1_000 + t, t as f64)).unwrap();
        }

        assert_eq!(store.count().unwrap(), 3);
        let stamps: Vec<i64> = store
            .list_recent(10)
            .unwrap()
            .iter()
            .map(|s| s.captured_at_unix)
            .collect();
        assert_eq!(stamps, vec![1_002, 1_003, 1_004]);
    }
}
