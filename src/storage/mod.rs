//! Storage facade
//!
//! One contract, [`Storage`], over both backends. Callers get a backend from
//! [`open_storage`] and never learn which one they hold.
//!
//! The two backends differ deliberately in batch atomicity: the file backend
//! is best-effort (a failed flush drops what it could not write), SQLite
//! commits a batch in one transaction or not at all.

pub mod buffer;
pub mod file;

pub use buffer::{BufferedWriter, Sink, WriterStats};
pub use file::{FileStorage, ReadReport};

use crate::config::{BackendKind, StorageConfig};
use crate::db::SqliteStorage;
use crate::error::Result;
use crate::record::ResourceRecord;
use crate::stats::{self, ResourceStats, StatsOptions, StatsOrder};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Summary of what a backend holds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageInfo {
    pub backend: BackendKind,
    pub total_records: u64,
    pub total_size_bytes: u64,
    pub oldest_record: Option<NaiveDateTime>,
    pub newest_record: Option<NaiveDateTime>,

    /// Active log file or database file
    pub path: PathBuf,

    pub last_modified: Option<DateTime<Local>>,

    /// Files in the log family (1 for SQLite)
    pub file_count: usize,
}

/// Backend-independent storage contract.
///
/// Every method takes `&self`; implementations synchronize internally so one
/// writer and any number of readers can share a handle.
pub trait Storage: Send + Sync {
    /// Open files or the database. Must be called once before anything else.
    fn initialize(&self) -> Result<()>;

    /// Flush and release resources. Later writes fail with `Closed`.
    fn close(&self) -> Result<()>;

    fn save_record(&self, record: ResourceRecord) -> Result<()>;

    /// Store a batch. An empty batch is a no-op.
    fn save_records(&self, records: &[ResourceRecord]) -> Result<()>;

    /// Push anything buffered to disk
    fn flush(&self) -> Result<()>;

    /// Latest `limit` records (all when `None`), oldest first
    fn read_records(&self, limit: Option<usize>) -> Result<Vec<ResourceRecord>>;

    /// Records with `start <= timestamp <= end`, newest first
    fn read_records_by_time_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ResourceRecord>>;

    fn record_count(&self) -> Result<u64>;

    /// Remove data older than `now - keep_days`. Returns files deleted (file
    /// backend) or rows deleted (SQLite).
    fn clean_old_data(&self, keep_days: u32) -> Result<u64>;

    fn storage_info(&self) -> Result<StorageInfo>;

    /// Summaries over `records`, shared by every backend so results match
    fn calculate_stats(
        &self,
        records: &[ResourceRecord],
        opts: &StatsOptions,
        order: StatsOrder,
    ) -> Vec<ResourceStats> {
        stats::calculate_stats(records, opts, order)
    }
}

/// Build the backend the configuration selects. The configuration is
/// validated first; nothing is opened until `initialize`.
pub fn open_storage(config: &StorageConfig) -> Result<Box<dyn Storage>> {
    config.validate()?;
    let storage: Box<dyn Storage> = match config.backend() {
        BackendKind::Sqlite => Box::new(SqliteStorage::new(config.clone())),
        BackendKind::File => Box::new(FileStorage::new(config.clone())?),
    };
    info!("Using {} storage backend", config.backend());
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, StoreError};
    use tempfile::tempdir;

    #[test]
    fn test_factory_rejects_invalid_config() {
        let config = StorageConfig {
            max_files: 0,
            ..StorageConfig::default()
        };
        assert!(matches!(
            open_storage(&config),
            Err(StoreError::Config(ConfigError::InvalidMaxFiles { .. }))
        ));
    }

    #[test]
    fn test_factory_selects_backend() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_path: dir.path().join("res.log"),
            sqlite_path: Some(dir.path().join("res.db")),
            ..StorageConfig::default()
        };
        let storage = open_storage(&config).unwrap();
        storage.initialize().unwrap();
        assert_eq!(storage.storage_info().unwrap().backend, BackendKind::Sqlite);
        storage.close().unwrap();

        let config = StorageConfig {
            sqlite_path: None,
            ..config
        };
        let storage = open_storage(&config).unwrap();
        storage.initialize().unwrap();
        assert_eq!(storage.storage_info().unwrap().backend, BackendKind::File);
        storage.close().unwrap();
    }
}
