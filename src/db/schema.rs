//! Database schema definitions and creation
//!
//! This module defines the SQLite schema for resource records and provides
//! functions to create and configure the database.

use crate::error::DbResult;
use rusqlite::Connection;

/// Current schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the records table. One column per record field.
const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS resource_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,              -- YYYY-MM-DD HH:MM:SS, local
    name TEXT NOT NULL CHECK (length(name) > 0),
    cpu_percent REAL DEFAULT 0,
    cpu_percent_normalized REAL DEFAULT 0,
    memory_mb REAL DEFAULT 0,
    memory_percent REAL DEFAULT 0,
    threads INTEGER DEFAULT 0,
    disk_read_mb REAL DEFAULT 0,
    disk_write_mb REAL DEFAULT 0,
    net_sent_kb REAL DEFAULT 0,
    net_recv_kb REAL DEFAULT 0,
    is_active INTEGER DEFAULT 0,
    command TEXT DEFAULT '',
    working_dir TEXT DEFAULT '',
    category TEXT DEFAULT '',
    pid INTEGER DEFAULT 0,
    ppid INTEGER DEFAULT 0,
    create_time INTEGER DEFAULT 0,        -- Unix ms
    cpu_time REAL DEFAULT 0,              -- seconds
    created_at TEXT DEFAULT (datetime('now', 'localtime'))
)
"#;

/// SQL to create the storage metadata table
const CREATE_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS storage_meta (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

/// SQL to create indexes for common queries
const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_records_timestamp ON resource_records(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_records_name ON resource_records(name)",
    "CREATE INDEX IF NOT EXISTS idx_records_pid ON resource_records(pid)",
];

/// Column list shared by inserts and selects, in record field order
pub const RECORD_COLUMNS: &str = "timestamp, name, cpu_percent, cpu_percent_normalized, \
     memory_mb, memory_percent, threads, disk_read_mb, disk_write_mb, net_sent_kb, \
     net_recv_kb, is_active, command, working_dir, category, pid, ppid, create_time, cpu_time";

/// Connection settings applied on open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pragmas {
    pub wal: bool,
    pub cache_kb: u32,
}

impl Pragmas {
    fn to_sql(self) -> String {
        let mut sql = String::new();
        if self.wal {
            sql.push_str("PRAGMA journal_mode = WAL;\n");
        }
        sql.push_str("PRAGMA synchronous = NORMAL;\n");
        sql.push_str(&format!("PRAGMA cache_size = -{};\n", self.cache_kb));
        sql.push_str("PRAGMA temp_store = MEMORY;\n");
        sql
    }
}

/// Configure the connection and create tables and indexes
pub fn create_database(conn: &Connection, pragmas: Pragmas) -> DbResult<()> {
    conn.execute_batch(&pragmas.to_sql())?;

    conn.execute(CREATE_RECORDS_TABLE, [])?;
    conn.execute(CREATE_META_TABLE, [])?;
    create_indexes(conn)?;

    Ok(())
}

/// Create indexes
pub fn create_indexes(conn: &Connection) -> DbResult<()> {
    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }
    Ok(())
}

/// Store metadata
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO storage_meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Store metadata only if the key is absent
pub fn set_meta_once(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO storage_meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get metadata
pub fn get_meta(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM storage_meta WHERE key = ?1",
        [key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata keys
pub mod keys {
    /// Always "sqlite"
    pub const BACKEND_TYPE: &str = "backend_type";

    /// When the database was first created (RFC 3339)
    pub const CREATED_AT: &str = "created_at";

    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Crate version of the last writer
    pub const WRITER_VERSION: &str = "writer_version";
}
