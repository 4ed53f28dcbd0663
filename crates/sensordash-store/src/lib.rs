//! `sensordash-store` – the sample log.
//!
//! Append-only persistence of inbound [`Sample`]s and newest-first reads of
//! the most recent ones.
//!
//! # Modules
//!
//! - [`sqlite`] – [`SqliteSampleStore`][sqlite::SqliteSampleStore]: the
//!   local SQLite implementation used by the `sensordash` binary.
//!
//! The [`SampleStore`] trait is the seam the refresh scheduler and the
//! ingestion endpoint share: one handle is built at process start and passed
//! to both as `Arc<dyn SampleStore>`.

use std::time::Duration;

use async_trait::async_trait;
use sensordash_types::Sample;
use thiserror::Error;

pub mod sqlite;

pub use sqlite::SqliteSampleStore;

/// Errors raised while reading or writing the sample log.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store query timed out after {0:?}")]
    Timeout(Duration),

    #[error("a previous read is still running on the store connection")]
    Busy,

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("blocking store task failed: {0}")]
    Blocking(String),

    #[error("malformed {column} in stored row: {details}")]
    Malformed { column: &'static str, details: String },
}

/// Storage backend for motion samples.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Append one sample.
    async fn insert(&self, sample: &Sample) -> Result<(), StoreError>;

    /// Return up to `limit` samples ordered newest first by timestamp.
    ///
    /// Implementations may answer [`StoreError::Busy`] instead of queueing
    /// behind an earlier read that its caller has already given up on.
    async fn find_latest(&self, limit: usize) -> Result<Vec<Sample>, StoreError>;
}
