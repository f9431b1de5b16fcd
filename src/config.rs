//! Configuration types for procwatch
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - [`StorageConfig`], the immutable storage configuration, loadable from
//!   JSON and validated before any I/O is attempted

use crate::error::ConfigError;
use crate::rotation::RotationPolicy;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for the total size budget (1 TiB)
const MAX_SIZE_MB: u64 = 1024 * 1024;

/// Upper bound for rotation slots
const MAX_FILES: usize = 10_000;

/// Upper bound for the retention window
const MAX_RETENTION_DAYS: u32 = 3650;

/// Buffer capacity limits
const MIN_BUFFER_SIZE: usize = 1;
const MAX_BUFFER_SIZE: usize = 100_000;

/// Which storage backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Rotating text log files
    #[default]
    File,
    /// SQLite database
    Sqlite,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::File => "file",
            BackendKind::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "file" => Ok(BackendKind::File),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Storage configuration. Owned by whoever builds the storage facade and
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selector
    #[serde(rename = "type")]
    pub storage_type: BackendKind,

    /// Base path of the record log (`<base>`, `<base>.N`, `<base>.N.gz`)
    pub data_path: PathBuf,

    /// SQLite database path; a non-empty value selects the SQLite backend
    pub sqlite_path: Option<PathBuf>,

    /// Rotate the record log; when false records are appended to one file
    pub rotation_enabled: bool,

    /// Total disk budget for the record log family, in MB
    pub max_size_mb: u64,

    /// Rotation slots; also the maximum number of files kept on disk
    pub max_files: usize,

    /// Files (or rows) older than this many days are deleted
    pub retention_days: u32,

    /// Rotated files older than this many days are gzip-compressed (0 = never)
    pub compress_after_days: u32,

    /// Records buffered in memory before a flush
    pub buffer_size: usize,

    /// Maximum seconds between flushes
    pub flush_interval_secs: u64,

    /// Sampling interval of the producer, used for active-time estimates
    pub sampling_interval_secs: u64,

    /// SQLite page cache size in KB
    pub sqlite_cache_kb: u32,

    /// Put SQLite in write-ahead-log mode
    pub sqlite_wal: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: BackendKind::File,
            data_path: PathBuf::from("data/resources.log"),
            sqlite_path: None,
            rotation_enabled: true,
            max_size_mb: 100,
            max_files: 10,
            retention_days: 7,
            compress_after_days: 1,
            buffer_size: 100,
            flush_interval_secs: 30,
            sampling_interval_secs: 5,
            sqlite_cache_kb: 2000,
            sqlite_wal: true,
        }
    }
}

impl StorageConfig {
    /// Load from a JSON file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Check all bounds. Called before any file or database is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_mb == 0 || self.max_size_mb > MAX_SIZE_MB {
            return Err(ConfigError::InvalidMaxSize {
                size_mb: self.max_size_mb,
                max: MAX_SIZE_MB,
            });
        }

        if self.max_files == 0 || self.max_files > MAX_FILES {
            return Err(ConfigError::InvalidMaxFiles {
                count: self.max_files,
                max: MAX_FILES,
            });
        }

        if self.retention_days == 0 || self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::InvalidRetention {
                days: self.retention_days,
                max: MAX_RETENTION_DAYS,
            });
        }

        if self.compress_after_days > self.retention_days {
            return Err(ConfigError::InvalidCompressAge {
                days: self.compress_after_days,
                retention: self.retention_days,
            });
        }

        if self.buffer_size < MIN_BUFFER_SIZE || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::InvalidBufferSize {
                size: self.buffer_size,
                min: MIN_BUFFER_SIZE,
                max: MAX_BUFFER_SIZE,
            });
        }

        if self.flush_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "flush interval",
            });
        }

        if self.sampling_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "sampling interval",
            });
        }

        match self.backend() {
            BackendKind::File => check_path(&self.data_path)?,
            BackendKind::Sqlite => check_path(&self.sqlite_db_path())?,
        }

        Ok(())
    }

    /// Effective backend: SQLite when selected by type or by a non-empty path
    pub fn backend(&self) -> BackendKind {
        let has_sqlite_path = self
            .sqlite_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if self.storage_type == BackendKind::Sqlite || has_sqlite_path {
            BackendKind::Sqlite
        } else {
            BackendKind::File
        }
    }

    /// SQLite file, defaulting to `<data_path>.db`
    pub fn sqlite_db_path(&self) -> PathBuf {
        match &self.sqlite_path {
            Some(p) if !p.as_os_str().is_empty() => p.clone(),
            _ => self.data_path.with_extension("db"),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.sampling_interval_secs)
    }

    /// Rotation and retention knobs for the file backend
    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_size_mb: self.max_size_mb,
            max_files: self.max_files,
            retention_days: self.retention_days,
            compress_after_days: self.compress_after_days,
        }
    }
}

fn check_path(path: &Path) -> Result<(), ConfigError> {
    if path.file_name().is_none() {
        return Err(ConfigError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path has no file name".to_string(),
        });
    }
    if path.is_dir() {
        return Err(ConfigError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path is a directory".to_string(),
        });
    }
    Ok(())
}

/// Per-process resource history store
#[derive(Parser, Debug, Clone)]
#[command(
    name = "procwatch",
    version,
    about = "Query and maintain per-process resource history",
    long_about = "Stores per-process resource samples in rotating, compressed log files \
                  or a SQLite database, and answers history and statistics queries.\n\n\
                  Producers pipe record lines into 'ingest'; everything else reads.",
    after_help = "EXAMPLES:\n    \
        collector | procwatch ingest\n    \
        procwatch --data-path /var/lib/procwatch/resources.log stats --order active\n    \
        procwatch --sqlite /var/lib/procwatch/history.db read --since '2024-03-15 00:00:00'\n    \
        procwatch ingest --input old-resources.log --derive  # migrate a legacy log\n    \
        procwatch clean --keep-days 3"
)]
pub struct CliArgs {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,

    /// JSON storage configuration file
    #[arg(short = 'c', long, env = "PROCWATCH_CONFIG", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Storage backend
    #[arg(long = "type", value_enum, value_name = "TYPE", global = true)]
    pub storage_type: Option<BackendKind>,

    /// Base path of the record log
    #[arg(short = 'd', long, value_name = "PATH", global = true)]
    pub data_path: Option<PathBuf>,

    /// SQLite database (selects the SQLite backend)
    #[arg(long = "sqlite", value_name = "PATH", global = true)]
    pub sqlite_path: Option<PathBuf>,

    /// Total size budget for log files in MB
    #[arg(long, value_name = "MB", global = true)]
    pub max_size_mb: Option<u64>,

    /// Maximum number of log files
    #[arg(long, value_name = "NUM", global = true)]
    pub max_files: Option<usize>,

    /// Retention window in days
    #[arg(long, value_name = "DAYS", global = true)]
    pub retention_days: Option<u32>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Store record lines (any schema version) from a file or stdin
    Ingest {
        /// Input file (stdin if omitted)
        #[arg(short = 'i', long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Fill normalized CPU and memory percent from host totals when zero
        #[arg(long)]
        derive: bool,
    },

    /// Print stored records
    Read {
        /// Inclusive lower bound (YYYY-MM-DD HH:MM:SS)
        #[arg(long, value_name = "TIME")]
        since: Option<String>,

        /// Inclusive upper bound (YYYY-MM-DD HH:MM:SS)
        #[arg(long, value_name = "TIME")]
        until: Option<String>,

        /// Show only the latest N records
        #[arg(short = 'n', long, value_name = "NUM")]
        limit: Option<usize>,
    },

    /// Show per-process statistics
    Stats {
        /// Group by category instead of process name
        #[arg(long)]
        by_category: bool,

        /// Sort order
        #[arg(long, value_enum, default_value = "cpu")]
        order: StatsOrderArg,

        /// Number of rows to show
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,
    },

    /// Show storage information
    Info,

    /// Delete data older than N days
    Clean {
        /// Days of data to keep
        #[arg(long, value_name = "DAYS")]
        keep_days: u32,
    },
}

/// Sort order for the stats table
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatsOrderArg {
    /// Average CPU, highest first
    Cpu,
    /// Estimated active time, longest first
    Active,
}

impl StorageConfig {
    /// Build from CLI arguments: config file first, then flag overrides
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => StorageConfig::load(path)?,
            None => StorageConfig::default(),
        };

        if let Some(kind) = args.storage_type {
            config.storage_type = kind;
        }
        if let Some(path) = &args.data_path {
            config.data_path = path.clone();
        }
        if let Some(path) = &args.sqlite_path {
            config.sqlite_path = Some(path.clone());
        }
        if let Some(mb) = args.max_size_mb {
            config.max_size_mb = mb;
        }
        if let Some(n) = args.max_files {
            config.max_files = n;
        }
        if let Some(days) = args.retention_days {
            config.retention_days = days;
            config.compress_after_days = config.compress_after_days.min(days);
        }

        config.validate()?;
        Ok(config)
    }
}
