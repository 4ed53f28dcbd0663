//! SQLite sample log.
//!
//! # Storage layout
//!
//! A single table `sensor_logs` is created (if it does not already exist):
//!
//! | column      | type    | description                                   |
//! |-------------|---------|-----------------------------------------------|
//! | id          | INTEGER | insertion order, tie-breaker for equal times  |
//! | user_id     | TEXT    | device / user tag                             |
//! | timestamp   | TEXT    | fixed-width RFC-3339 UTC, microseconds        |
//! | acc_time    | REAL    | device accelerometer clock (nullable)         |
//! | acc_x … z   | REAL    | acceleration (nullable)                       |
//! | gyro_x … z  | REAL    | angular rate (nullable)                       |
//! | mag_x … z   | REAL    | magnetic field (nullable)                     |
//! | gps_lat/lon | REAL    | position (nullable)                           |
//!
//! Timestamps are written in one fixed-width format so that `ORDER BY
//! timestamp` is chronological.
//!
//! The connection sits behind a mutex and every call from async code is
//! moved onto Tokio's blocking pool.
//!
//! A caller that times out drops its future, but the blocking read it started
//! keeps running and keeps the connection locked until SQLite returns.  At
//! most one async read is allowed on the pool at a time: while one is still
//! running, [`SampleStore::find_latest`] fails at once with
//! [`StoreError::Busy`] rather than parking another thread behind the lock.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use sensordash_store::SqliteSampleStore;
//! use sensordash_types::Sample;
//!
//! let store = SqliteSampleStore::open_in_memory().unwrap();
//! store.insert_blocking(&Sample::new("alice", Utc::now())).unwrap();
//!
//! let latest = store.find_latest_blocking(10).unwrap();
//! assert_eq!(latest[0].user_id, "alice");
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use sensordash_types::{Sample, format_timestamp, parse_timestamp};
use tracing::{debug, info};

use crate::{SampleStore, StoreError};

const SELECT_COLUMNS: &str = "user_id, timestamp, acc_time,
     acc_x, acc_y, acc_z,
     gyro_x, gyro_y, gyro_z,
     mag_x, mag_y, mag_z,
     gps_lat, gps_lon";

/// SQLite-backed [`SampleStore`].
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct SqliteSampleStore {
    conn: Arc<Mutex<Connection>>,
    /// Set while an async read is running on the blocking pool.
    reading: Arc<AtomicBool>,
}

/// Clears the `reading` flag when the blocking read ends, whether or not
/// anyone is still awaiting it.
struct ReadSlot(Arc<AtomicBool>);

impl ReadSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for ReadSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SqliteSampleStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened sample store");
        Self::with_connection(conn)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            reading: Arc::new(AtomicBool::new(false)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Append `sample` on the calling thread.
    pub fn insert_blocking(&self, sample: &Sample) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sensor_logs
                 (user_id, timestamp, acc_time,
                  acc_x, acc_y, acc_z,
                  gyro_x, gyro_y, gyro_z,
                  mag_x, mag_y, mag_z,
                  gps_lat, gps_lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                sample.user_id,
                format_timestamp(&sample.timestamp),
                sample.acc_time,
                sample.acc_x,
                sample.acc_y,
                sample.acc_z,
                sample.gyro_x,
                sample.gyro_y,
                sample.gyro_z,
                sample.mag_x,
                sample.mag_y,
                sample.mag_z,
                sample.gps_lat,
                sample.gps_lon,
            ],
        )?;
        debug!(user = %sample.user_id, timestamp = %sample.timestamp, "sample stored");
        Ok(())
    }

    /// Newest-first read of up to `limit` samples on the calling thread.
    pub fn find_latest_blocking(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}
             FROM sensor_logs
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], read_row)?;

        let mut samples = Vec::new();
        for row in rows {
            let (ts_str, mut sample) = row?;
            sample.timestamp = parse_timestamp(&ts_str).map_err(|e| StoreError::Malformed {
                column: "timestamp",
                details: e.to_string(),
            })?;
            samples.push(sample);
        }
        Ok(samples)
    }

    /// Number of stored samples.
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM sensor_logs", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sensor_logs (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id   TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            acc_time  REAL,
            acc_x     REAL,
            acc_y     REAL,
            acc_z     REAL,
            gyro_x    REAL,
            gyro_y    REAL,
            gyro_z    REAL,
            mag_x     REAL,
            mag_y     REAL,
            mag_z     REAL,
            gps_lat   REAL,
            gps_lon   REAL
        );
        CREATE INDEX IF NOT EXISTS sensor_logs_timestamp ON sensor_logs (timestamp);",
    )?;
    Ok(())
}

/// Decode one row; the timestamp comes back raw and is parsed by the caller.
fn read_row(row: &Row<'_>) -> rusqlite::Result<(String, Sample)> {
    let user_id: String = row.get(0)?;
    let ts_str: String = row.get(1)?;
    let mut sample = Sample::new(user_id, DateTime::<Utc>::default());
    sample.acc_time = row.get(2)?;
    sample.acc_x = row.get(3)?;
    sample.acc_y = row.get(4)?;
    sample.acc_z = row.get(5)?;
    sample.gyro_x = row.get(6)?;
    sample.gyro_y = row.get(7)?;
    sample.gyro_z = row.get(8)?;
    sample.mag_x = row.get(9)?;
    sample.mag_y = row.get(10)?;
    sample.mag_z = row.get(11)?;
    sample.gps_lat = row.get(12)?;
    sample.gps_lon = row.get(13)?;
    Ok((ts_str, sample))
}

#[async_trait]
impl SampleStore for SqliteSampleStore {
    async fn insert(&self, sample: &Sample) -> Result<(), StoreError> {
        let store = self.clone();
        let sample = sample.clone();
        tokio::task::spawn_blocking(move || store.insert_blocking(&sample))
            .await
            .map_err(|e| StoreError::Blocking(e.to_string()))?
    }

    async fn find_latest(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let Some(slot) = ReadSlot::acquire(&self.reading) else {
            debug!("previous read still holds the connection; refusing to queue");
            return Err(StoreError::Busy);
        };
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            store.find_latest_blocking(limit)
        })
            .await
            .map_err(|e| StoreError::Blocking(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_564_800 + secs, 0).unwrap()
    }

    fn full_sample(user: &str, secs: i64) -> Sample {
        let mut s = Sample::new(user, at(secs))
            .with_acceleration([0.1, -0.2, 9.8])
            .with_gyroscope([0.01, 0.02, -0.03])
            .with_magnetic_field([22.0, -4.0, 41.5])
            .with_gps(48.8584, 2.2945);
        s.acc_time = Some(secs as f64 * 0.5);
        s
    }

    #[test]
    fn empty_store_returns_empty_vec() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        assert!(store.find_latest_blocking(100).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn insert_and_read_back_all_fields() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        let sample = full_sample("alice", 5);
        store.insert_blocking(&sample).unwrap();

        let latest = store.find_latest_blocking(10).unwrap();
        assert_eq!(latest, vec![sample]);
    }

    #[test]
    fn missing_fields_round_trip_as_none() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        let mut sample = Sample::new("bob", at(0));
        sample.acc_x = Some(1.0);
        store.insert_blocking(&sample).unwrap();

        let back = &store.find_latest_blocking(1).unwrap()[0];
        assert_eq!(back.acc_x, Some(1.0));
        assert_eq!(back.acc_y, None);
        assert_eq!(back.gps(), None);
    }

    #[test]
    fn find_latest_is_newest_first_regardless_of_insert_order() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        for secs in [3, 1, 4, 2] {
            store.insert_blocking(&full_sample("alice", secs)).unwrap();
        }
        let order: Vec<_> = store
            .find_latest_blocking(10)
            .unwrap()
            .into_iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(order, vec![at(4), at(3), at(2), at(1)]);
    }

    #[test]
    fn find_latest_honours_limit() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        for secs in 0..150 {
            store.insert_blocking(&full_sample("alice", secs)).unwrap();
        }
        let latest = store.find_latest_blocking(100).unwrap();
        assert_eq!(latest.len(), 100);
        assert_eq!(latest[0].timestamp, at(149));
        assert_eq!(latest[99].timestamp, at(50));
        assert_eq!(store.count().unwrap(), 150);
    }

    #[test]
    fn equal_timestamps_prefer_latest_insert() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        store.insert_blocking(&full_sample("first", 7)).unwrap();
        store.insert_blocking(&full_sample("second", 7)).unwrap();
        let latest = store.find_latest_blocking(1).unwrap();
        assert_eq!(latest[0].user_id, "second");
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("samples.db");
        {
            let store = SqliteSampleStore::open(&path).unwrap();
            store.insert_blocking(&full_sample("alice", 1)).unwrap();
        }
        let reopened = SqliteSampleStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn async_trait_methods_share_the_connection() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        let handle: Arc<dyn SampleStore> = Arc::new(store.clone());
        handle.insert(&full_sample("alice", 1)).await.unwrap();
        handle.insert(&full_sample("alice", 2)).await.unwrap();

        let latest = handle.find_latest(1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].timestamp, at(2));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn abandoned_read_makes_next_read_fail_fast() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        store.insert_blocking(&full_sample("alice", 1)).unwrap();

        // Hold the connection so the first read blocks on the pool.
        let held = store.conn.lock().unwrap();
        let first =
            tokio::time::timeout(Duration::from_millis(50), store.find_latest(10)).await;
        assert!(first.is_err(), "read should still be waiting for the lock");

        // The abandoned read is still parked; a second one must not queue.
        let started = std::time::Instant::now();
        assert!(matches!(store.find_latest(10).await, Err(StoreError::Busy)));
        assert!(started.elapsed() < Duration::from_millis(50));
        drop(held);

        // Once the parked read drains, reads succeed again.
        let mut latest = Err(StoreError::Busy);
        for _ in 0..200 {
            latest = store.find_latest(10).await;
            if !matches!(latest, Err(StoreError::Busy)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(latest.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sequential_async_reads_are_not_busy() {
        let store = SqliteSampleStore::open_in_memory().unwrap();
        for _ in 0..5 {
            assert!(store.find_latest(10).await.unwrap().is_empty());
        }
    }
}
