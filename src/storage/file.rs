//! Text-file backend
//!
//! Writes go through a [`BufferedWriter`] into either a rotating log family
//! or one plain append-only file. Reads scan every family member in index
//! order and decode each line with the record codec; lines that fail to
//! decode are skipped and counted, so a damaged file still yields every
//! record that survived.

use super::buffer::{BufferedWriter, Sink};
use super::{Storage, StorageInfo};
use crate::config::{BackendKind, StorageConfig};
use crate::error::{Result, StoreError};
use crate::record::{decode, ResourceRecord, SchemaVersion};
use crate::rotation::{for_each_line, retention_cutoff, FamilyPattern, FileInfo, RotatingLog};
use chrono::{DateTime, Local, NaiveDateTime};
use parking_lot::RwLock;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// What a full read saw
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadReport {
    /// Non-empty lines seen
    pub lines: u64,

    /// Lines decoded into records
    pub records: u64,

    /// Lines discarded for a structural problem
    pub skipped_lines: u64,

    /// Files that could not be opened or were cut short
    pub skipped_files: u64,

    /// Records decoded from a pre-current schema layout
    pub legacy_records: u64,
}

impl ReadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_lines == 0 && self.skipped_files == 0
    }
}

/// Storage over `<data_path>`, `<data_path>.N` and `<data_path>.N.gz`
pub struct FileStorage {
    config: StorageConfig,
    pattern: FamilyPattern,
    writer: RwLock<Option<BufferedWriter>>,
}

impl FileStorage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let pattern = FamilyPattern::new(&config.data_path)?;
        Ok(Self {
            config,
            pattern,
            writer: RwLock::new(None),
        })
    }

    fn with_writer<R>(&self, f: impl FnOnce(&BufferedWriter) -> Result<R>) -> Result<R> {
        let guard = self.writer.read();
        let writer = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        f(writer)
    }

    /// Family members this backend reads, oldest index first
    pub fn files(&self) -> Result<Vec<FileInfo>> {
        let mut files = self.pattern.scan()?;
        if !self.config.rotation_enabled {
            files.retain(|f| f.index == 0);
        }
        Ok(files)
    }

    /// Decode every stored line, in file order
    pub fn read_with_report(&self) -> Result<(Vec<ResourceRecord>, ReadReport)> {
        let files = self.files()?;
        let mut records = Vec::new();
        let mut report = ReadReport::default();

        let skipped_files = for_each_line(&files, |line| {
            report.lines += 1;
            match decode(line) {
                Ok((record, version)) => {
                    if version != SchemaVersion::CURRENT {
                        report.legacy_records += 1;
                    }
                    records.push(record);
                }
                Err(e) => {
                    debug!("Skipping line: {}", e);
                    report.skipped_lines += 1;
                }
            }
        });
        report.skipped_files = skipped_files as u64;
        report.records = records.len() as u64;

        if !report.is_clean() {
            warn!(
                "Read {} records; skipped {} lines and {} files",
                report.records, report.skipped_lines, report.skipped_files
            );
        }
        Ok((records, report))
    }

    fn read_sorted(&self) -> Result<Vec<ResourceRecord>> {
        let (mut records, _) = self.read_with_report()?;
        // Stable: equal timestamps keep write order
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

impl Storage for FileStorage {
    fn initialize(&self) -> Result<()> {
        let mut guard = self.writer.write();
        if guard.as_ref().is_some_and(|w| !w.is_closed()) {
            return Ok(());
        }

        let sink = if self.config.rotation_enabled {
            Sink::Rotating(RotatingLog::open(
                &self.config.data_path,
                self.config.rotation_policy(),
            )?)
        } else {
            Sink::plain(&self.config.data_path)?
        };
        info!(
            "File storage ready at {} (rotation {})",
            sink.active_path().display(),
            if self.config.rotation_enabled { "on" } else { "off" }
        );

        *guard = Some(BufferedWriter::new(
            sink,
            self.config.buffer_size,
            self.config.flush_interval(),
        ));
        Ok(())
    }

    fn close(&self) -> Result<()> {
        match self.writer.read().as_ref() {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }

    fn save_record(&self, record: ResourceRecord) -> Result<()> {
        self.with_writer(|w| w.save_record(record))
    }

    fn save_records(&self, records: &[ResourceRecord]) -> Result<()> {
        self.with_writer(|w| w.save_records(records))
    }

    fn flush(&self) -> Result<()> {
        self.with_writer(|w| w.flush())
    }

    fn read_records(&self, limit: Option<usize>) -> Result<Vec<ResourceRecord>> {
        let mut records = self.read_sorted()?;
        if let Some(limit) = limit {
            let excess = records.len().saturating_sub(limit);
            records.drain(..excess);
        }
        Ok(records)
    }

    fn read_records_by_time_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ResourceRecord>> {
        let mut records = self.read_sorted()?;
        records.retain(|r| r.timestamp >= start && r.timestamp <= end);
        records.reverse();
        Ok(records)
    }

    fn record_count(&self) -> Result<u64> {
        Ok(self.read_with_report()?.1.records)
    }

    fn clean_old_data(&self, keep_days: u32) -> Result<u64> {
        let cutoff = SystemTime::from(retention_cutoff(Local::now(), keep_days));
        let deleted = self.with_writer(|w| w.apply_retention(cutoff))?;
        info!("Removed {} log files older than {} days", deleted, keep_days);
        Ok(deleted as u64)
    }

    fn storage_info(&self) -> Result<StorageInfo> {
        let files = self.files()?;
        let (records, _) = self.read_with_report()?;

        let path = self
            .writer
            .read()
            .as_ref()
            .and_then(|w| w.active_path())
            .unwrap_or_else(|| self.config.data_path.clone());

        Ok(StorageInfo {
            backend: BackendKind::File,
            total_records: records.len() as u64,
            total_size_bytes: files.iter().map(|f| f.size).sum(),
            oldest_record: records.iter().map(|r| r.timestamp).min(),
            newest_record: records.iter().map(|r| r.timestamp).max(),
            path,
            last_modified: files
                .iter()
                .map(|f| f.modified)
                .max()
                .map(DateTime::<Local>::from),
            file_count: files.len(),
        })
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing file storage failed: {}", e);
        }
    }
}
