use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use super::{DayCount, Page, PageRequest, SampleStore, SortOrder, StoreError, StoreResult};
use crate::sample::{DayBucket, Sample};

const READ_POOL_SIZE: usize = 4;

const COLUMNS: &str =
    "captured_at_unix, captured_at, day, latitude, longitude, altitude, velocity";

/// SQLite-backed store in WAL mode.
///
/// Writes go through one connection; reads are spread over a small pool of
/// read-only connections so request handlers never queue behind the poller.
/// `id` is the insertion sequence and breaks timestamp ties. `day` holds
/// the day number since the common era so it sorts numerically for any year.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::configure_connection(&writer)?;
        Self::init_schema(&writer)?;

        let mut readers = Vec::with_capacity(READ_POOL_SIZE);
        for _ in 0..READ_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            readers.push(Mutex::new(conn));
        }

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    fn configure_connection(conn: &Connection) -> StoreResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                captured_at_unix INTEGER NOT NULL,
                captured_at TEXT NOT NULL,
                day INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                altitude REAL,
                velocity REAL
            );
            CREATE INDEX IF NOT EXISTS idx_samples_day ON samples (day, captured_at_unix, id);
            CREATE INDEX IF NOT EXISTS idx_samples_time ON samples (captured_at_unix, id);
            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );",
        )?;

        let legacy: Option<String> = conn
            .query_row(
                "SELECT typeof(day) FROM samples WHERE typeof(day) <> 'integer' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(kind) = legacy {
            return Err(StoreError::Corrupt(format!(
                "samples.day holds {kind} values; expected day numbers"
            )));
        }

        conn.execute(
            "INSERT OR IGNORE INTO store_meta (key, value)
             SELECT 'origin_day', day FROM samples ORDER BY day LIMIT 1",
            [],
        )?;
        Ok(())
    }

    fn writer(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| StoreError::Poisoned)
    }

    fn reader(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        for conn in &self.readers {
            if let Ok(guard) = conn.try_lock() {
                return Ok(guard);
            }
        }
        // Every reader is busy; wait on the next one in turn.
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[index].lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_samples(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Sample>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_sample)?;
        let samples = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }
}

fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<Sample> {
    let number: i32 = row.get(2)?;
    let day = DayBucket::from_day_number(number)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, i64::from(number)))?;

    Ok(Sample {
        captured_at_unix: row.get(0)?,
        captured_at: row.get(1)?,
        day,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        altitude: row.get(5)?,
        velocity: row.get(6)?,
    })
}

fn to_day(number: i32) -> StoreResult<DayBucket> {
    DayBucket::from_day_number(number)
        .ok_or_else(|| StoreError::Corrupt(format!("day number {number} out of range")))
}

fn to_count(value: i64) -> StoreResult<usize> {
    usize::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative count {value}")))
}

impl SampleStore for SqliteStore {
    fn append(&self, sample: &Sample) -> StoreResult<()> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!("INSERT INTO samples ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                sample.captured_at_unix,
                sample.captured_at,
                sample.day.day_number(),
                sample.latitude,
                sample.longitude,
                sample.altitude,
                sample.velocity,
            ],
        )?;
        tx.execute(
            "INSERT INTO store_meta (key, value) VALUES ('origin_day', ?1)
             ON CONFLICT (key) DO UPDATE SET value = MIN(value, excluded.value)",
            params![sample.day.day_number()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn latest(&self) -> StoreResult<Option<Sample>> {
        let conn = self.reader()?;
        let sample = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM samples ORDER BY captured_at_unix DESC, id DESC LIMIT 1"
                ),
                [],
                row_to_sample,
            )
            .optional()?;
        Ok(sample)
    }

    fn earliest(&self) -> StoreResult<Option<Sample>> {
        let conn = self.reader()?;
        let sample = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM samples ORDER BY captured_at_unix, id LIMIT 1"),
                [],
                row_to_sample,
            )
            .optional()?;
        Ok(sample)
    }

    fn list_by_day(
        &self,
        day: DayBucket,
        page: PageRequest,
        order: SortOrder,
    ) -> StoreResult<Page> {
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let number = day.day_number();
        let limit = i64::try_from(page.limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);

        // Page and total must come from the same snapshot.
        let mut conn = self.reader()?;
        let tx = conn.transaction()?;
        let samples = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {COLUMNS} FROM samples WHERE day = ?1
                 ORDER BY captured_at_unix {direction}, id {direction}
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(params![number, limit, offset], row_to_sample)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let total: i64 = tx.query_row(
            "SELECT COUNT(*) FROM samples WHERE day = ?1",
            params![number],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(Page {
            samples,
            total: to_count(total)?,
        })
    }

    fn list_recent(&self, limit: usize) -> StoreResult<Vec<Sample>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut samples = self.query_samples(
            &format!(
                "SELECT {COLUMNS} FROM samples
                 ORDER BY captured_at_unix DESC, id DESC LIMIT ?1"
            ),
            params![limit],
        )?;
        samples.reverse();
        Ok(samples)
    }

    fn list_from(&self, from: Option<DayBucket>) -> StoreResult<Vec<Sample>> {
        match from {
            Some(day) => self.query_samples(
                &format!(
                    "SELECT {COLUMNS} FROM samples WHERE day >= ?1
                     ORDER BY captured_at_unix, id"
                ),
                params![day.day_number()],
            ),
            None => self.query_samples(
                &format!("SELECT {COLUMNS} FROM samples ORDER BY captured_at_unix, id"),
                [],
            ),
        }
    }

    fn distinct_days(&self) -> StoreResult<Vec<DayBucket>> {
        Ok(self.day_counts()?.into_iter().map(|c| c.day).collect())
    }

    fn day_counts(&self) -> StoreResult<Vec<DayCount>> {
        let conn = self.reader()?;
        let mut stmt =
            conn.prepare("SELECT day, COUNT(*) FROM samples GROUP BY day ORDER BY day")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (day, count) = row?;
            counts.push(DayCount {
                day: to_day(day)?,
                count: to_count(count)?,
            });
        }
        Ok(counts)
    }

    fn count_day(&self, day: DayBucket) -> StoreResult<usize> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM samples WHERE day = ?1",
            params![day.day_number()],
            |row| row.get(0),
        )?;
        to_count(count)
    }

    fn count(&self) -> StoreResult<usize> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        to_count(count)
    }

    fn evict_older_than(&self, cutoff: DayBucket) -> StoreResult<usize> {
        let conn = self.writer()?;
        let deleted = conn.execute(
            "DELETE FROM samples WHERE day < ?1",
            params![cutoff.day_number()],
        )?;
        Ok(deleted)
    }

    fn origin_day(&self) -> StoreResult<Option<DayBucket>> {
        let conn = self.reader()?;
        let number: Option<i32> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'origin_day'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        number.map(to_day).transpose()
    }
}
