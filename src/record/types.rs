//! Resource sample types
//!
//! A [`ResourceRecord`] is one timestamped observation of one process (or
//! container). Producers hand these to the storage layer fully populated with
//! current-schema fields; records decoded from older on-disk layouts carry
//! zero/empty values for the fields those layouts lack.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used on disk and in SQLite
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One resource-usage sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Wall-clock sample time (second precision, local, no zone)
    pub timestamp: NaiveDateTime,

    /// Process or container name
    pub name: String,

    /// Raw CPU usage; may exceed 100 on multi-core hosts
    pub cpu_percent: f64,

    /// CPU usage divided by logical core count (0-100)
    pub cpu_percent_normalized: f64,

    /// Resident memory in MB
    pub memory_mb: f64,

    /// Share of total system memory
    pub memory_percent: f64,

    pub threads: i32,

    pub disk_read_mb: f64,
    pub disk_write_mb: f64,

    pub net_sent_kb: f64,
    pub net_recv_kb: f64,

    /// Derived activity flag
    pub is_active: bool,

    pub command: String,
    pub working_dir: String,
    pub category: String,

    pub pid: i32,

    /// Parent PID, 0 when unknown
    pub ppid: i32,

    /// Process start time (Unix ms)
    pub create_time: i64,

    /// Cumulative CPU seconds
    pub cpu_time: f64,
}

impl ResourceRecord {
    /// Create a record with only the identifying fields set
    pub fn new(timestamp: NaiveDateTime, name: impl Into<String>) -> Self {
        Self {
            timestamp,
            name: name.into(),
            ..Default::default()
        }
    }

    /// Formatted timestamp as stored on disk
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Key used by the stats aggregator
    pub fn group_key(&self, by_category: bool) -> &str {
        if by_category && !self.category.is_empty() {
            &self.category
        } else {
            &self.name
        }
    }
}

/// On-disk record layouts, identified solely by field count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaVersion {
    /// timestamp,name,cpu,mem,threads,diskR,diskW,netS,netR
    V1,
    /// V1 + isActive
    V2,
    /// V2 + command,workingDir,category
    V3,
    /// Extended layout without ppid
    Extended,
    /// Extended layout with ppid (current)
    ExtendedPpid,
}

impl SchemaVersion {
    /// The layout every encoder emits
    pub const CURRENT: SchemaVersion = SchemaVersion::ExtendedPpid;

    /// Smallest field count of any known layout
    pub const MIN_FIELDS: usize = 9;

    /// Detect version from field count
    pub fn from_field_count(count: usize) -> Option<Self> {
        match count {
            9 => Some(SchemaVersion::V1),
            10 => Some(SchemaVersion::V2),
            13 => Some(SchemaVersion::V3),
            18 => Some(SchemaVersion::Extended),
            19 => Some(SchemaVersion::ExtendedPpid),
            _ => None,
        }
    }

    /// Number of comma-separated fields in this layout
    pub fn field_count(&self) -> usize {
        match self {
            SchemaVersion::V1 => 9,
            SchemaVersion::V2 => 10,
            SchemaVersion::V3 => 13,
            SchemaVersion::Extended => 18,
            SchemaVersion::ExtendedPpid => 19,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V1 => "v1",
            SchemaVersion::V2 => "v2",
            SchemaVersion::V3 => "v3",
            SchemaVersion::Extended => "extended",
            SchemaVersion::ExtendedPpid => "extended+ppid",
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
