//! Error types for procwatch
//!
//! This module defines the error hierarchy for the persistence engine:
//! - Record codec errors (structural line rejects)
//! - SQLite database errors
//! - Rotation controller errors
//! - Configuration errors
//!
//! Per-field numeric parse failures are not errors at all: the codec zeroes
//! the field and keeps the record. Maintenance failures during rotation
//! (compression, retention) are reported through
//! [`RotationOutcome::Degraded`](crate::rotation::RotationOutcome) rather than
//! through this hierarchy.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record could not be decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Rotation controller errors
    #[error("Rotation error: {0}")]
    Rotation(#[from] RotationError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage used before `initialize`
    #[error("Storage has not been initialized")]
    NotInitialized,

    /// Storage used after `close`
    #[error("Storage is closed")]
    Closed,

    /// Background writer channel closed unexpectedly
    #[error("Writer channel closed unexpectedly")]
    ChannelClosed,
}

/// Structural decode failures. The whole line is discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Field count matches no known schema version
    #[error("Unrecognized field count {count} (expected 9, 10, 13, 18 or 19)")]
    FieldCount { count: usize },

    /// Field count does not match the version the caller asked for
    #[error("Field count {count} does not match schema {expected}")]
    VersionMismatch { count: usize, expected: &'static str },

    /// Timestamp column is not `YYYY-MM-DD HH:MM:SS`
    #[error("Invalid timestamp '{value}'")]
    Timestamp { value: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to create database file
    #[error("Failed to create database at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },

    /// Batch insert rolled back
    #[error("Transaction rolled back after {attempted} of {total} rows: {source}")]
    BatchRolledBack {
        attempted: usize,
        total: usize,
        source: rusqlite::Error,
    },

    /// Stored value could not be converted back into a record
    #[error("Corrupt row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },
}

/// Rotation controller errors. Any of these is fatal for the write that
/// triggered it.
#[derive(Error, Debug)]
pub enum RotationError {
    /// Could not open (or create) a log file
    #[error("Failed to open log file '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Could not append to the active file
    #[error("Failed to write to '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Could not list the log directory
    #[error("Failed to scan '{dir}': {source}")]
    Scan {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// Log directory is not writable
    #[error("Log directory '{dir}' is read-only")]
    ReadOnlyDir { dir: PathBuf },

    /// Base path has no usable file name
    #[error("Invalid log path '{path}'")]
    InvalidPath { path: PathBuf },
}

/// Configuration errors, raised before any I/O is attempted
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Total size budget out of range
    #[error("Invalid max size {size_mb}MB: must be between 1 and {max}")]
    InvalidMaxSize { size_mb: u64, max: u64 },

    /// Rotation slot count out of range
    #[error("Invalid max files {count}: must be between 1 and {max}")]
    InvalidMaxFiles { count: usize, max: usize },

    /// Retention window out of range
    #[error("Invalid retention {days} days: must be between 1 and {max}")]
    InvalidRetention { days: u32, max: u32 },

    /// Compression age must not exceed retention
    #[error("Invalid compression age {days} days: must not exceed retention of {retention} days")]
    InvalidCompressAge { days: u32, retention: u32 },

    /// Buffer capacity out of range
    #[error("Invalid buffer size {size}: must be between {min} and {max}")]
    InvalidBufferSize { size: usize, min: usize, max: usize },

    /// A duration setting was zero
    #[error("Invalid {name}: must be greater than zero")]
    ZeroInterval { name: &'static str },

    /// Unknown backend selector
    #[error("Unknown storage type '{0}': expected 'file' or 'sqlite'")]
    UnknownBackend(String),

    /// Output path error
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// Config file could not be read or parsed
    #[error("Cannot load config '{path}': {reason}")]
    Load { path: PathBuf, reason: String },
}

/// Result type alias for StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type alias for RotationError
pub type RotationResult<T> = std::result::Result<T, RotationError>;

/// Result type alias for CodecError
pub type CodecResult<T> = std::result::Result<T, CodecError>;

impl StoreError {
    /// Check if this error came from bad input data rather than the environment
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            StoreError::Codec(_) | StoreError::Database(DbError::CorruptRow { .. })
        )
    }
}
