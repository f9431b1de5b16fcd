//! Buffered writer for the file backend
//!
//! Records are held in memory and written out in arrival order when the
//! buffer reaches capacity or the flush interval has elapsed.
//!
//! # Locking
//!
//! One [`parking_lot::Mutex`] guards the buffer, the last-flush time and the
//! open file. A flush runs while holding it, so a slow disk blocks the next
//! `save_record`. Callers that cannot tolerate that should feed records
//! through [`BackgroundWriter`](crate::pipeline::BackgroundWriter).
//!
//! # Delivery
//!
//! At most once. A batch is taken out of the buffer before it is written; if
//! the write fails partway the remaining records are dropped, counted and the
//! error is returned to whichever caller triggered the flush.

use crate::error::{Result, StoreError};
use crate::record::{encode, ResourceRecord};
use crate::rotation::{RotatingLog, RotationOutcome};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Where flushed records go
pub enum Sink {
    /// Size-rotated family with compression and retention
    Rotating(RotatingLog),

    /// One ever-growing append-only file
    Plain { writer: BufWriter<File>, path: PathBuf },
}

impl Sink {
    /// Open a plain append-only file, creating parent directories
    pub fn plain(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Sink::Plain {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    fn write_line(&mut self, line: &str) -> Result<Option<RotationOutcome>> {
        match self {
            Sink::Rotating(log) => Ok(log.write_record(line)?),
            Sink::Plain { writer, .. } => {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                Ok(None)
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Sink::Rotating(log) => Ok(log.flush()?),
            Sink::Plain { writer, .. } => Ok(writer.flush()?),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Sink::Rotating(log) => Ok(log.close()?),
            Sink::Plain { writer, .. } => Ok(writer.flush()?),
        }
    }

    /// File currently receiving records
    pub fn active_path(&self) -> &Path {
        match self {
            Sink::Rotating(log) => log.active_path(),
            Sink::Plain { path, .. } => path,
        }
    }
}

/// Counters for writer activity
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Records that reached the sink
    pub records_written: AtomicU64,

    /// Records dropped by failed flushes
    pub records_dropped: AtomicU64,

    /// Completed flushes
    pub flushes: AtomicU64,

    /// Rotations triggered by writes
    pub rotations: AtomicU64,

    /// Rotations that reported maintenance issues
    pub degraded_rotations: AtomicU64,
}

impl WriterStats {
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    pub fn degraded_rotations(&self) -> u64 {
        self.degraded_rotations.load(Ordering::Relaxed)
    }
}

struct BufferState {
    buffer: Vec<ResourceRecord>,
    last_flush: Instant,
    sink: Option<Sink>,
}

/// Size- and time-triggered buffer in front of a [`Sink`]
pub struct BufferedWriter {
    state: Mutex<BufferState>,
    capacity: usize,
    flush_interval: Duration,
    stats: Arc<WriterStats>,
}

impl BufferedWriter {
    pub fn new(sink: Sink, capacity: usize, flush_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(BufferState {
                buffer: Vec::with_capacity(capacity),
                last_flush: Instant::now(),
                sink: Some(sink),
            }),
            capacity,
            flush_interval,
            stats: Arc::new(WriterStats::default()),
        }
    }

    /// Buffer one record, flushing if a trigger fired
    pub fn save_record(&self, record: ResourceRecord) -> Result<()> {
        let mut state = self.state.lock();
        if state.sink.is_none() {
            return Err(StoreError::Closed);
        }
        state.buffer.push(record);
        self.flush_if_due(&mut state)
    }

    /// Buffer a batch, flushing if a trigger fired. An empty batch is a no-op.
    pub fn save_records(&self, records: &[ResourceRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if state.sink.is_none() {
            return Err(StoreError::Closed);
        }
        state.buffer.extend_from_slice(records);
        self.flush_if_due(&mut state)
    }

    fn flush_if_due(&self, state: &mut BufferState) -> Result<()> {
        if state.buffer.len() >= self.capacity
            || state.last_flush.elapsed() >= self.flush_interval
        {
            self.flush_locked(state)?;
        }
        Ok(())
    }

    /// Write everything buffered now
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.sink.is_none() {
            return Err(StoreError::Closed);
        }
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut BufferState) -> Result<()> {
        let batch = std::mem::take(&mut state.buffer);
        state.last_flush = Instant::now();

        let Some(sink) = state.sink.as_mut() else {
            return Err(StoreError::Closed);
        };
        if batch.is_empty() {
            return sink.flush();
        }

        let total = batch.len();
        for (written, record) in batch.iter().enumerate() {
            match sink.write_line(&encode(record)) {
                Ok(Some(outcome)) => self.note_rotation(&outcome),
                Ok(None) => {}
                Err(e) => {
                    let dropped = (total - written) as u64;
                    self.stats
                        .records_written
                        .fetch_add(written as u64, Ordering::Relaxed);
                    self.stats
                        .records_dropped
                        .fetch_add(dropped, Ordering::Relaxed);
                    warn!("Flush failed after {}/{} records, {} dropped: {}", written, total, dropped, e);
                    return Err(e);
                }
            }
        }

        if let Err(e) = sink.flush() {
            // Bytes may still be in the userspace buffer; count them as lost
            self.stats
                .records_dropped
                .fetch_add(total as u64, Ordering::Relaxed);
            warn!("Flush of {} records to {} failed: {}", total, sink.active_path().display(), e);
            return Err(e);
        }

        self.stats
            .records_written
            .fetch_add(total as u64, Ordering::Relaxed);
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        debug!("Flushed {} records to {}", total, sink.active_path().display());
        Ok(())
    }

    fn note_rotation(&self, outcome: &RotationOutcome) {
        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
        match outcome {
            RotationOutcome::Clean { index } => info!("Rotated record log to index {}", index),
            RotationOutcome::Degraded { index, issues } => {
                self.stats.degraded_rotations.fetch_add(1, Ordering::Relaxed);
                for issue in issues {
                    warn!("Rotation to index {}: {}", index, issue);
                }
            }
        }
    }

    /// Final flush, then release the file. Later saves fail with `Closed`.
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.sink.is_none() {
            return Ok(());
        }
        let flushed = self.flush_locked(&mut state);
        let closed = match state.sink.take() {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        };
        flushed.and(closed)
    }

    /// Delete rotated files last modified before `cutoff`. A plain file is
    /// never deleted.
    pub fn apply_retention(&self, cutoff: SystemTime) -> Result<usize> {
        let mut state = self.state.lock();
        match state.sink.as_mut() {
            Some(Sink::Rotating(log)) => Ok(log.apply_retention(cutoff)?),
            Some(Sink::Plain { .. }) => Ok(0),
            None => Err(StoreError::Closed),
        }
    }

    /// Records waiting for the next flush
    pub fn pending(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// File currently receiving records, `None` once closed
    pub fn active_path(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .sink
            .as_ref()
            .map(|s| s.active_path().to_path_buf())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().sink.is_none()
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Final flush on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::decode;
    use crate::rotation::RotationPolicy;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn rec(i: u32) -> ResourceRecord {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            + chrono::TimeDelta::seconds(i64::from(i));
        ResourceRecord {
            pid: i as i32,
            cpu_percent: 1.5,
            ..ResourceRecord::new(ts, format!("proc{}", i % 7))
        }
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_capacity_triggers_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("res.log");
        let writer = BufferedWriter::new(Sink::plain(&path).unwrap(), 3, Duration::from_secs(3600));

        writer.save_record(rec(1)).unwrap();
        writer.save_record(rec(2)).unwrap();
        assert_eq!(writer.pending(), 2);
        assert!(lines(&path).is_empty());

        writer.save_record(rec(3)).unwrap();
        assert_eq!(writer.pending(), 0);
        let written = lines(&path);
        assert_eq!(written.len(), 3);
        let (first, _) = decode(&written[0]).unwrap();
        assert_eq!(first, rec(1));
    }

    #[test]
    fn test_interval_triggers_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("res.log");
        let writer = BufferedWriter::new(Sink::plain(&path).unwrap(), 1000, Duration::ZERO);
        writer.save_record(rec(1)).unwrap();
        assert_eq!(lines(&path).len(), 1);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("res.log");
        let writer = BufferedWriter::new(Sink::plain(&path).unwrap(), 10, Duration::ZERO);
        writer.save_records(&[]).unwrap();
        assert_eq!(writer.stats().flushes(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_save_after_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("res.log");
        let writer = BufferedWriter::new(Sink::plain(&path).unwrap(), 10, Duration::from_secs(60));
        writer.save_record(rec(1)).unwrap();
        writer.close().unwrap();
        assert_eq!(lines(&path).len(), 1);

        assert!(matches!(writer.save_record(rec(2)), Err(StoreError::Closed)));
        assert!(matches!(writer.flush(), Err(StoreError::Closed)));
        writer.close().unwrap();
    }

    #[test]
    fn test_concurrent_saves_lose_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("res.log");
        let writer = Arc::new(BufferedWriter::new(
            Sink::plain(&path).unwrap(),
            64,
            Duration::from_secs(3600),
        ));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let writer = Arc::clone(&writer);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        writer.save_record(rec(t * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        writer.close().unwrap();

        let written = lines(&path);
        assert_eq!(written.len(), 2000);
        let pids: HashSet<i32> = written
            .iter()
            .map(|l| decode(l).unwrap().0.pid)
            .collect();
        assert_eq!(pids.len(), 2000);
        assert_eq!(writer.stats().records_written(), 2000);
    }

    #[test]
    fn test_rotating_sink_counts_rotations() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("res.log");
        let policy = RotationPolicy {
            max_size_mb: 1,
            max_files: 1024,
            retention_days: 7,
            compress_after_days: 1,
        };
        let log = RotatingLog::open(&base, policy).unwrap();
        let writer = BufferedWriter::new(Sink::Rotating(log), 50, Duration::from_secs(3600));
        for i in 0..200 {
            writer.save_record(rec(i)).unwrap();
        }
        writer.close().unwrap();

        let stats = writer.stats();
        assert_eq!(stats.records_written(), 200);
        assert!(stats.rotations() >= 1);
        assert_eq!(stats.degraded_rotations(), 0);
        assert!(dir.path().join("res.log.1").exists());
    }
}
