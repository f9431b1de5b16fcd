//! procwatch - Per-Process Resource History Store
//!
//! The persistence engine of a host agent that samples per-process resource
//! usage at a fixed interval. Samples are kept durably under a bounded disk
//! budget, and files written by older agent versions stay readable.
//!
//! # Features
//!
//! - **Versioned Record Codec**: One CSV-like line per sample. Five on-disk
//!   layouts are recognized by field count; quoted fields may contain commas.
//!
//! - **Rotating Log Files**: Size-triggered rotation into `<base>.N`, gzip
//!   compression of old siblings, age-based retention and a file-count cap.
//!
//! - **SQLite Backend**: Transactional alternative with one transaction per
//!   batch.
//!
//! - **Stats**: Per-process (or per-category) averages, maxima and active
//!   time, identical whichever backend supplied the records.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Producer (sampler / ingest)                 │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ ResourceRecord
//!                                ▼
//!            ┌───────────────────────────────────────┐
//!            │  Storage trait (open_storage factory) │
//!            └──────────┬─────────────────┬──────────┘
//!                       │                 │
//!                       ▼                 ▼
//!        ┌─────────────────────┐   ┌─────────────────────┐
//!        │    FileStorage      │   │   SqliteStorage     │
//!        │  BufferedWriter     │   │  Mutex<Connection>  │
//!        │        │            │   │  batch transaction  │
//!        │        ▼            │   └──────────┬──────────┘
//!        │  RotatingLog        │              │
//!        │  (codec, gzip,      │              ▼
//!        │   retention)        │        history.db
//!        └────────┬────────────┘
//!                 ▼
//!   resources.log, resources.log.1, resources.log.2.gz ...
//! ```
//!
//! # Example
//!
//! ```bash
//! # Store samples produced by a collector
//! collector | procwatch ingest
//!
//! # Top processes by average CPU
//! procwatch stats -n 10
//!
//! # Same data in SQLite
//! procwatch --sqlite history.db ingest --input resources.log
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod rotation;
pub mod stats;
pub mod storage;
pub mod system;

pub use config::{BackendKind, CliArgs, StorageConfig};
pub use error::{Result, StoreError};
pub use pipeline::{BackgroundWriter, WriterHandle};
pub use record::{ResourceRecord, SchemaVersion};
pub use stats::{ResourceStats, StatsOptions, StatsOrder};
pub use storage::{open_storage, Storage, StorageInfo};
pub use system::SystemInfo;
