use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::warn;

use super::{
    chronological, count_by_day, paginate, DayCount, Page, PageRequest, SampleStore, SortOrder,
    StoreError, StoreResult,
};
use crate::sample::{DayBucket, Sample};

/// Flat JSON Lines file, one sample per line.
///
/// A flat file has no concurrency control of its own, so a single mutex
/// serializes every read and write. The file is mirrored in memory; appends
/// add one line, eviction rewrites the file through a temporary sibling.
/// The origin day lives in a `.origin` sibling so eviction cannot lose it.
pub struct JsonlStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    samples: Vec<Sample>,
    file: File,
    origin: Option<DayBucket>,
    /// A failed append may have left a fragment that could not be cut off.
    tail_dirty: bool,
}

/// Append target that can be cut back after a short write.
trait LineSink: Write {
    fn end(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LineSink for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write one whole line or nothing: a failed write is truncated away.
fn append_line<S: LineSink>(sink: &mut S, line: &[u8]) -> io::Result<()> {
    let start = sink.end()?;
    if let Err(e) = sink.write_all(line).and_then(|_| sink.flush()) {
        if let Err(cut) = sink.truncate_to(start) {
            warn!("Could not remove partial line after failed append: {}", cut);
        }
        return Err(e);
    }
    Ok(())
}

impl JsonlStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let samples = if path.exists() {
            load(path)?
        } else {
            Vec::new()
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if needs_trailing_newline(path)? {
            file.write_all(b"\n")?;
        }

        let origin_path = origin_path(path);
        let origin = match read_origin(&origin_path)? {
            Some(day) => Some(day),
            None => {
                let earliest = samples.iter().map(|s| s.day).min();
                if let Some(day) = earliest {
                    fs::write(&origin_path, day.to_string())?;
                }
                earliest
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                samples,
                file,
                origin,
                tail_dirty: false,
            }),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    fn rewrite(&self, samples: &[Sample]) -> StoreResult<File> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for sample in samples {
                serde_json::to_writer(&mut writer, sample)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        Ok(OpenOptions::new().append(true).open(&self.path)?)
    }
}

fn load(path: &Path) -> StoreResult<Vec<Sample>> {
    let reader = BufReader::new(File::open(path)?);
    let mut samples = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Sample>(&line) {
            Ok(sample) => samples.push(sample),
            // A crash mid-append leaves a partial last line behind.
            Err(e) => warn!(
                "Skipping unreadable line {} in {}: {}",
                index + 1,
                path.display(),
                e
            ),
        }
    }

    Ok(samples)
}

fn origin_path(path: &Path) -> PathBuf {
    path.with_extension("origin")
}

fn read_origin(path: &Path) -> StoreResult<Option<DayBucket>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    match text.trim().parse::<DayBucket>() {
        Ok(day) => Ok(Some(day)),
        Err(e) => {
            warn!("Ignoring unreadable origin day in {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

fn needs_trailing_newline(path: &Path) -> StoreResult<bool> {
    let content = fs::read(path)?;
    Ok(content.last().is_some_and(|b| *b != b'\n'))
}

impl SampleStore for JsonlStore {
    fn append(&self, sample: &Sample) -> StoreResult<()> {
        let mut inner = self.lock()?;

        let mut line = Vec::new();
        if inner.tail_dirty && needs_trailing_newline(&self.path)? {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, sample)?;
        line.push(b'\n');

        if let Err(e) = append_line(&mut inner.file, &line) {
            inner.tail_dirty = true;
            return Err(e.into());
        }
        inner.tail_dirty = false;
        inner.samples.push(sample.clone());

        if inner.origin.is_none_or(|day| sample.day < day) {
            fs::write(origin_path(&self.path), sample.day.to_string())?;
            inner.origin = Some(sample.day);
        }
        Ok(())
    }

    fn latest(&self) -> StoreResult<Option<Sample>> {
        let inner = self.lock()?;
        Ok(inner
            .samples
            .iter()
            .max_by_key(|s| s.captured_at_unix)
            .cloned())
    }

    fn earliest(&self) -> StoreResult<Option<Sample>> {
        let inner = self.lock()?;
        Ok(inner
            .samples
            .iter()
            .min_by_key(|s| s.captured_at_unix)
            .cloned())
    }

    fn list_by_day(
        &self,
        day: DayBucket,
        page: PageRequest,
        order: SortOrder,
    ) -> StoreResult<Page> {
        let inner = self.lock()?;
        let in_day = chronological(inner.samples.iter().filter(|s| s.day == day));
        Ok(paginate(in_day, page, order))
    }

    fn list_recent(&self, limit: usize) -> StoreResult<Vec<Sample>> {
        let inner = self.lock()?;
        let mut sorted = chronological(inner.samples.iter());
        let skip = sorted.len().saturating_sub(limit);
        Ok(sorted.split_off(skip))
    }

    fn list_from(&self, from: Option<DayBucket>) -> StoreResult<Vec<Sample>> {
        let inner = self.lock()?;
        Ok(chronological(
            inner
                .samples
                .iter()
                .filter(|s| from.is_none_or(|d| s.day >= d)),
        ))
    }

    fn distinct_days(&self) -> StoreResult<Vec<DayBucket>> {
        Ok(self.day_counts()?.into_iter().map(|c| c.day).collect())
    }

    fn day_counts(&self) -> StoreResult<Vec<DayCount>> {
        let inner = self.lock()?;
        Ok(count_by_day(inner.samples.iter()))
    }

    fn count_day(&self, day: DayBucket) -> StoreResult<usize> {
        let inner = self.lock()?;
        Ok(inner.samples.iter().filter(|s| s.day == day).count())
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.samples.len())
    }

    fn evict_older_than(&self, cutoff: DayBucket) -> StoreResult<usize> {
        let mut inner = self.lock()?;
        let kept: Vec<Sample> = inner
            .samples
            .iter()
            .filter(|s| s.day >= cutoff)
            .cloned()
            .collect();
        let evicted = inner.samples.len() - kept.len();
        if evicted == 0 {
            return Ok(0);
        }

        inner.file = self.rewrite(&kept)?;
        inner.samples = kept;
        inner.tail_dirty = false;
        Ok(evicted)
    }

    fn origin_day(&self) -> StoreResult<Option<DayBucket>> {
        Ok(self.lock()?.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract::{self, day, sample_at};
    use tempfile::TempDir;

    #[test]
    fn satisfies_store_contract() {
        let dir = TempDir::new().unwrap();
        let counter = std::cell::Cell::new(0);
        contract::run_all_fresh(|| {
            counter.set(counter.get() + 1);
            let path = dir.path().join(format!("samples-{}.jsonl", counter.get()));
            Box::new(JsonlStore::open(&path).unwrap())
        });
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("iss.jsonl");

        {
            let store = JsonlStore::open(&path).unwrap();
            store.append(&sample_at(1_000, 1.0)).unwrap();
            store.append(&sample_at(90_000, 2.0)).unwrap();
        }

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.latest().unwrap().unwrap().latitude, 2.0);
    }

    #[test]
    fn eviction_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iss.jsonl");

        {
            let store = JsonlStore::open(&path).unwrap();
            store.append(&sample_at(1_000, 1.0)).unwrap();
            store.append(&sample_at(90_000, 2.0)).unwrap();
            assert_eq!(store.evict_older_than(day("1970-01-02")).unwrap(), 1);
            store.append(&sample_at(90_001, 3.0)).unwrap();
        }

        let store = JsonlStore::open(&path).unwrap();
        let lats: Vec<f64> = store
            .list_from(None)
            .unwrap()
            .iter()
            .map(|s| s.latitude)
            .collect();
        assert_eq!(lats, vec![2.0, 3.0]);
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    /// Accepts `budget` bytes, then fails like a full disk.
    struct ShortWrite {
        file: File,
        budget: usize,
    }

    impl Write for ShortWrite {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.file.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl LineSink for ShortWrite {
        fn end(&self) -> io::Result<u64> {
            self.file.end()
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.file.truncate_to(len)
        }
    }

    #[test]
    fn failed_append_leaves_no_fragment_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iss.jsonl");

        {
            let store = JsonlStore::open(&path).unwrap();
            store.append(&sample_at(1_000, 1.0)).unwrap();
        }
        let len_before = fs::metadata(&path).unwrap().len();

        let mut sink = ShortWrite {
            file: OpenOptions::new().append(true).open(&path).unwrap(),
            budget: 17,
        };
        let mut line = serde_json::to_vec(&sample_at(1_001, 2.0)).unwrap();
        line.push(b'\n');
        assert!(append_line(&mut sink, &line).is_err());
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before);

        {
            let store = JsonlStore::open(&path).unwrap();
            store.append(&sample_at(1_002, 3.0)).unwrap();
        }

        let store = JsonlStore::open(&path).unwrap();
        let lats: Vec<f64> = store
            .list_from(None)
            .unwrap()
            .iter()
            .map(|s| s.latitude)
            .collect();
        assert_eq!(lats, vec![1.0, 3.0]);
    }

    #[test]
    fn append_after_a_leftover_fragment_starts_a_new_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iss.jsonl");
        let store = JsonlStore::open(&path).unwrap();
        store.append(&sample_at(1_000, 1.0)).unwrap();

        // A fragment that a failed append could not cut off.
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{\"captured_at_unix\":17")
            .unwrap();
        store.lock().unwrap().tail_dirty = true;
        store.append(&sample_at(1_001, 2.0)).unwrap();
        drop(store);

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.latest().unwrap().unwrap().latitude, 2.0);
    }

    #[test]
    fn origin_day_survives_reopen_and_eviction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iss.jsonl");

        {
            let store = JsonlStore::open(&path).unwrap();
            store.append(&sample_at(1_000, 1.0)).unwrap();
            store.append(&sample_at(90_000, 2.0)).unwrap();
            store.evict_older_than(day("1970-01-02")).unwrap();
        }

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.distinct_days().unwrap(), vec![day("1970-01-02")]);
        assert_eq!(store.origin_day().unwrap(), Some(day("1970-01-01")));
    }

    #[test]
    fn skips_truncated_line_and_keeps_appending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iss.jsonl");
        let good = serde_json::to_string(&sample_at(1_000, 1.0)).unwrap();
        fs::write(&path, format!("{good}\n{{\"captured_at_unix\": 10")).unwrap();

        {
            let store = JsonlStore::open(&path).unwrap();
            assert_eq!(store.count().unwrap(), 1);
            store.append(&sample_at(1_001, 2.0)).unwrap();
        }

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }
}
