//! SQLite backend
//!
//! Every batch is one transaction: any failing row rolls the whole batch
//! back, and readers see either none or all of it. The connection lives
//! behind a mutex, so reads and writes through one handle are serialized.

use crate::config::{BackendKind, StorageConfig};
use crate::db::schema::{self, keys, Pragmas, RECORD_COLUMNS};
use crate::error::{DbError, DbResult, Result, StoreError};
use crate::record::{ResourceRecord, TIMESTAMP_FORMAT};
use crate::rotation::retention_cutoff;
use crate::storage::{Storage, StorageInfo};
use chrono::{DateTime, Local, NaiveDateTime};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row, ToSql};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Storage over one SQLite database file
pub struct SqliteStorage {
    config: StorageConfig,
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl SqliteStorage {
    pub fn new(config: StorageConfig) -> Self {
        let path = config.sqlite_db_path();
        Self {
            config,
            path,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> DbResult<R>) -> Result<R> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => Ok(f(conn)?),
            None if self.closed.load(Ordering::SeqCst) => Err(StoreError::Closed),
            None => Err(StoreError::NotInitialized),
        }
    }

    fn open_connection(&self) -> DbResult<Connection> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DbError::CreateFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(&self.path).map_err(|e| DbError::CreateFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        schema::create_database(
            &conn,
            Pragmas {
                wal: self.config.sqlite_wal,
                cache_kb: self.config.sqlite_cache_kb,
            },
        )?;

        schema::set_meta(&conn, keys::BACKEND_TYPE, BackendKind::Sqlite.as_str())?;
        schema::set_meta_once(&conn, keys::CREATED_AT, &Local::now().to_rfc3339())?;
        schema::set_meta(&conn, keys::SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
        schema::set_meta(&conn, keys::WRITER_VERSION, env!("CARGO_PKG_VERSION"))?;

        Ok(conn)
    }

    /// Read a metadata value
    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| schema::get_meta(conn, key))
    }

    /// Database file plus WAL sidecar, if any
    fn disk_files(&self) -> Vec<PathBuf> {
        let mut wal = self.path.as_os_str().to_owned();
        wal.push("-wal");
        [self.path.clone(), PathBuf::from(wal)]
            .into_iter()
            .filter(|p| p.exists())
            .collect()
    }
}

/// Insert a batch in one transaction
fn insert_batch(conn: &Connection, records: &[ResourceRecord]) -> DbResult<usize> {
    let total = records.len();
    let tx = conn.unchecked_transaction()?;

    {
        let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO resource_records ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            RECORD_COLUMNS
        ))?;

        for (attempted, r) in records.iter().enumerate() {
            // Dropping `tx` on the error path rolls the batch back
            stmt.execute(params![
                r.timestamp_string(),
                r.name,
                r.cpu_percent,
                r.cpu_percent_normalized,
                r.memory_mb,
                r.memory_percent,
                r.threads,
                r.disk_read_mb,
                r.disk_write_mb,
                r.net_sent_kb,
                r.net_recv_kb,
                r.is_active,
                r.command,
                r.working_dir,
                r.category,
                r.pid,
                r.ppid,
                r.create_time,
                r.cpu_time,
            ])
            .map_err(|source| DbError::BatchRolledBack {
                attempted,
                total,
                source,
            })?;
        }
    }

    tx.commit()?;
    Ok(total)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, ResourceRecord)> {
    let id: i64 = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let record = ResourceRecord {
        timestamp: NaiveDateTime::default(),
        name: row.get(2)?,
        cpu_percent: row.get(3)?,
        cpu_percent_normalized: row.get(4)?,
        memory_mb: row.get(5)?,
        memory_percent: row.get(6)?,
        threads: row.get(7)?,
        disk_read_mb: row.get(8)?,
        disk_write_mb: row.get(9)?,
        net_sent_kb: row.get(10)?,
        net_recv_kb: row.get(11)?,
        is_active: row.get(12)?,
        command: row.get(13)?,
        working_dir: row.get(14)?,
        category: row.get(15)?,
        pid: row.get(16)?,
        ppid: row.get(17)?,
        create_time: row.get(18)?,
        cpu_time: row.get(19)?,
    };
    Ok((id, timestamp, record))
}

/// Run a record query. Rows whose timestamp cannot be parsed are skipped.
fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> DbResult<Vec<ResourceRecord>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, record_from_row)?;

    let mut records = Vec::new();
    for row in rows {
        let (id, timestamp, mut record) = row?;
        match NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT) {
            Ok(ts) => {
                record.timestamp = ts;
                records.push(record);
            }
            Err(e) => {
                let err = DbError::CorruptRow {
                    id,
                    reason: format!("timestamp '{}': {}", timestamp, e),
                };
                warn!("Skipping row: {}", err);
            }
        }
    }
    Ok(records)
}

fn parse_bound(value: Option<String>) -> Option<NaiveDateTime> {
    value.and_then(|v| NaiveDateTime::parse_from_str(&v, TIMESTAMP_FORMAT).ok())
}

impl Storage for SqliteStorage {
    fn initialize(&self) -> Result<()> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.open_connection()?);
        self.closed.store(false, Ordering::SeqCst);
        info!("SQLite storage ready at {}", self.path.display());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        self.closed.store(true, Ordering::SeqCst);
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| DbError::Sqlite(e))?;
            debug!("Closed {}", self.path.display());
        }
        Ok(())
    }

    fn save_record(&self, record: ResourceRecord) -> Result<()> {
        self.save_records(std::slice::from_ref(&record))
    }

    fn save_records(&self, records: &[ResourceRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let inserted = self.with_conn(|conn| insert_batch(conn, records))?;
        debug!("Committed batch of {} records", inserted);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        // Every batch is already committed
        self.with_conn(|_| Ok(()))
    }

    fn read_records(&self, limit: Option<usize>) -> Result<Vec<ResourceRecord>> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT * FROM (
                 SELECT id, {cols} FROM resource_records
                 ORDER BY timestamp DESC, id DESC LIMIT ?1
             ) ORDER BY timestamp ASC, id ASC",
            cols = RECORD_COLUMNS
        );
        self.with_conn(|conn| query_records(conn, &sql, &[&limit]))
    }

    fn read_records_by_time_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ResourceRecord>> {
        let start = start.format(TIMESTAMP_FORMAT).to_string();
        let end = end.format(TIMESTAMP_FORMAT).to_string();
        let sql = format!(
            "SELECT id, {} FROM resource_records
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp DESC, id DESC",
            RECORD_COLUMNS
        );
        self.with_conn(|conn| query_records(conn, &sql, &[&start, &end]))
    }

    fn record_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM resource_records", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn clean_old_data(&self, keep_days: u32) -> Result<u64> {
        let cutoff = retention_cutoff(Local::now(), keep_days)
            .naive_local()
            .format(TIMESTAMP_FORMAT)
            .to_string();
        let deleted = self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM resource_records WHERE timestamp < ?1",
                [&cutoff],
            )?;
            conn.execute("VACUUM", [])?;
            Ok(deleted)
        })?;
        info!("Deleted {} rows older than {}", deleted, cutoff);
        Ok(deleted as u64)
    }

    fn storage_info(&self) -> Result<StorageInfo> {
        let (count, oldest, newest) = self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM resource_records",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )?)
        })?;

        let mut size = 0;
        let mut last_modified: Option<SystemTime> = None;
        for path in self.disk_files() {
            if let Ok(meta) = fs::metadata(&path) {
                size += meta.len();
                if let Ok(modified) = meta.modified() {
                    last_modified = last_modified.max(Some(modified));
                }
            }
        }

        Ok(StorageInfo {
            backend: BackendKind::Sqlite,
            total_records: count as u64,
            total_size_bytes: size,
            oldest_record: parse_bound(oldest),
            newest_record: parse_bound(newest),
            path: self.path.clone(),
            last_modified: last_modified.map(DateTime::<Local>::from),
            file_count: 1,
        })
    }
}

impl Drop for SqliteStorage {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing SQLite storage failed: {}", e);
        }
    }
}
