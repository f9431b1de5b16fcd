//! Background writer for non-blocking producers
//!
//! A sampler that must not stall on disk I/O sends records over a bounded
//! channel to a dedicated thread that owns the storage writes. A full
//! channel blocks the sender, which is the backpressure signal.
//!
//! # Lifecycle
//!
//! ```text
//! producer ──Records──▶ [bounded channel] ──▶ writer thread ──▶ Storage
//!          ──Flush────▶                        (batch, save,
//!          ──Shutdown─▶                         flush on idle tick)
//! ```

use crate::error::{Result, StoreError};
use crate::record::ResourceRecord;
use crate::storage::Storage;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Message types sent to the writer thread
#[derive(Debug)]
pub enum WriterMessage {
    /// Records to store
    Records(Vec<ResourceRecord>),

    /// Save pending records and flush the storage
    Flush,

    /// Save, flush and stop
    Shutdown,
}

/// Statistics about the writer thread
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Records received over the channel
    pub records_received: AtomicU64,

    /// Records handed to storage successfully
    pub records_saved: AtomicU64,

    /// Batches passed to `save_records`
    pub batches_saved: AtomicU64,

    /// Failed saves or flushes
    pub save_errors: AtomicU64,
}

impl PipelineStats {
    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }

    pub fn records_saved(&self) -> u64 {
        self.records_saved.load(Ordering::Relaxed)
    }

    pub fn save_errors(&self) -> u64 {
        self.save_errors.load(Ordering::Relaxed)
    }
}

/// Handle for sending messages to the writer
#[derive(Clone)]
pub struct WriterHandle {
    sender: Sender<WriterMessage>,
    stats: Arc<PipelineStats>,
    shutdown: Arc<AtomicBool>,
}

impl WriterHandle {
    /// Send one record
    pub fn send_record(&self, record: ResourceRecord) -> Result<()> {
        self.send_records(vec![record])
    }

    /// Send a batch. Blocks while the channel is full.
    pub fn send_records(&self, records: Vec<ResourceRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.sender
            .send(WriterMessage::Records(records))
            .map_err(|_| StoreError::ChannelClosed)
    }

    /// Request a flush of pending writes
    pub fn flush(&self) -> Result<()> {
        self.sender
            .send(WriterMessage::Flush)
            .map_err(|_| StoreError::ChannelClosed)
    }

    /// Request shutdown (pending writes are saved first)
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sender
            .send(WriterMessage::Shutdown)
            .map_err(|_| StoreError::ChannelClosed)
    }

    /// Get writer statistics
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Storage writer that runs in its own thread
pub struct BackgroundWriter {
    handle: Option<JoinHandle<()>>,
    writer_handle: WriterHandle,
    storage: Arc<dyn Storage>,
}

impl BackgroundWriter {
    /// Spawn the writer thread. `storage` must already be initialized.
    ///
    /// Records are saved in batches of up to `batch_size`, and pending
    /// records are saved and flushed after `flush_interval` without traffic.
    pub fn new(
        storage: Arc<dyn Storage>,
        channel_size: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Result<Self> {
        let (sender, receiver) = bounded(channel_size.max(1));
        let stats = Arc::new(PipelineStats::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let writer_handle = WriterHandle {
            sender,
            stats: Arc::clone(&stats),
            shutdown,
        };

        let thread_storage = Arc::clone(&storage);
        let handle = thread::Builder::new()
            .name("record-writer".into())
            .spawn(move || {
                writer_thread(
                    thread_storage.as_ref(),
                    receiver,
                    &stats,
                    batch_size.max(1),
                    flush_interval,
                )
            })?;

        Ok(Self {
            handle: Some(handle),
            writer_handle,
            storage,
        })
    }

    /// Get a handle for sending messages to the writer
    pub fn handle(&self) -> WriterHandle {
        self.writer_handle.clone()
    }

    /// Drain the channel, stop the thread and close the storage
    pub fn finish(mut self) -> Result<()> {
        // Thread may already be gone; join reports that
        let _ = self.writer_handle.shutdown();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Record writer thread panicked");
                return Err(StoreError::ChannelClosed);
            }
        }

        let stats = self.writer_handle.stats();
        info!(
            received = stats.records_received(),
            saved = stats.records_saved(),
            errors = stats.save_errors(),
            "Record writer finished"
        );

        self.storage.close()
    }
}

fn writer_thread(
    storage: &dyn Storage,
    receiver: Receiver<WriterMessage>,
    stats: &PipelineStats,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut pending: Vec<ResourceRecord> = Vec::with_capacity(batch_size);

    loop {
        match receiver.recv_timeout(flush_interval) {
            Ok(WriterMessage::Records(records)) => {
                stats
                    .records_received
                    .fetch_add(records.len() as u64, Ordering::Relaxed);
                pending.extend(records);
                if pending.len() >= batch_size {
                    save_pending(storage, &mut pending, stats);
                }
            }
            Ok(WriterMessage::Flush) | Err(RecvTimeoutError::Timeout) => {
                save_pending(storage, &mut pending, stats);
                flush_storage(storage, stats);
            }
            Ok(WriterMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                save_pending(storage, &mut pending, stats);
                flush_storage(storage, stats);
                break;
            }
        }
    }
    debug!("Record writer thread exiting");
}

/// Save and clear pending records. A failed batch is counted, logged and
/// dropped; the thread keeps running.
fn save_pending(storage: &dyn Storage, pending: &mut Vec<ResourceRecord>, stats: &PipelineStats) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    match storage.save_records(&batch) {
        Ok(()) => {
            stats
                .records_saved
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            stats.batches_saved.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.save_errors.fetch_add(1, Ordering::Relaxed);
            error!("Saving {} records failed: {}", batch.len(), e);
        }
    }
}

fn flush_storage(storage: &dyn Storage, stats: &PipelineStats) {
    if let Err(e) = storage.flush() {
        stats.save_errors.fetch_add(1, Ordering::Relaxed);
        error!("Storage flush failed: {}", e);
    }
}
