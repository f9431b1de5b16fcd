//! Integration tests for procwatch
//!
//! Everything runs against temporary directories; SQLite checks go through
//! the storage facade and, where useful, a raw rusqlite connection.

use chrono::{Local, NaiveDate, NaiveDateTime, TimeDelta};
use flate2::write::GzEncoder;
use flate2::Compression;
use procwatch::config::{BackendKind, StorageConfig};
use procwatch::error::{DbError, StoreError};
use procwatch::record::{decode, encode, ResourceRecord, SchemaVersion};
use procwatch::stats::{StatsOptions, StatsOrder};
use procwatch::storage::{open_storage, FileStorage, Storage};
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

const DAY: Duration = Duration::from_secs(86_400);

fn at(secs: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
        + TimeDelta::seconds(secs)
}

fn sample(i: i64) -> ResourceRecord {
    ResourceRecord {
        cpu_percent: (i % 40) as f64 * 2.5,
        cpu_percent_normalized: (i % 40) as f64 * 0.25,
        memory_mb: 100.0 + (i % 7) as f64 * 12.5,
        memory_percent: 1.25,
        threads: (i % 9) as i32 + 1,
        disk_read_mb: 0.5,
        disk_write_mb: 0.25,
        net_sent_kb: 3.75,
        net_recv_kb: 8.0,
        is_active: i % 3 != 0,
        command: format!(r#"/usr/bin/worker --name "w{}", --fast"#, i % 5),
        working_dir: r"C:\srv\app".into(),
        category: if i % 2 == 0 { "web".into() } else { String::new() },
        pid: 1000 + (i % 5) as i32,
        ppid: 1,
        create_time: 1_710_000_000_000 + i,
        cpu_time: 12.5,
        ..ResourceRecord::new(at(i), format!("worker-{}", i % 5))
    }
}

fn file_config(dir: &Path) -> StorageConfig {
    StorageConfig {
        data_path: dir.join("resources.log"),
        buffer_size: 100,
        ..StorageConfig::default()
    }
}

fn age_file(path: &Path, age: Duration) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

#[test]
fn test_round_trip_through_file_storage() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&file_config(dir.path())).unwrap();
    storage.initialize().unwrap();

    let records: Vec<_> = (0..50).map(sample).collect();
    storage.save_records(&records).unwrap();
    storage.close().unwrap();

    let storage = open_storage(&file_config(dir.path())).unwrap();
    storage.initialize().unwrap();
    assert_eq!(storage.read_records(None).unwrap(), records);
}

#[test]
fn test_mixed_schema_versions_in_one_file() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("resources.log");
    let current = encode(&sample(5));
    let content = format!(
        "2024-03-15 09:00:00,v1proc,10.50,64.00,4,0.00,0.00,0.00,0.00\n\
         2024-03-15 09:00:01,v2proc,10.50,64.00,4,0.00,0.00,0.00,0.00,true\n\
         2024-03-15 09:00:02,v3proc,10.50,64.00,4,0.00,0.00,0.00,0.00,false,\"node a.js\",\"/srv\",\"web\"\n\
         2024-03-15 09:00:03,broken,1,2\n\
         {}\n",
        current
    );
    fs::write(&base, content).unwrap();

    let storage = FileStorage::new(file_config(dir.path())).unwrap();
    let (records, report) = storage.read_with_report().unwrap();

    assert_eq!(records.len(), 4);
    assert_eq!(report.skipped_lines, 1);
    assert_eq!(report.legacy_records, 3);

    assert_eq!(records[0].name, "v1proc");
    assert!(!records[0].is_active);
    assert!(records[1].is_active);
    assert_eq!(records[2].command, "node a.js");
    assert_eq!(records[2].category, "web");
    assert_eq!(records[2].pid, 0);
    assert_eq!(records[3], sample(5));

    let (_, version) = decode(&current).unwrap();
    assert_eq!(version, SchemaVersion::CURRENT);
}

#[test]
fn test_rotation_creates_first_sibling_and_keeps_base() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        // 1 MiB over 1024 slots: 1 KiB per file
        max_size_mb: 1,
        max_files: 1024,
        buffer_size: 1,
        ..file_config(dir.path())
    };
    let storage = open_storage(&config).unwrap();
    storage.initialize().unwrap();

    let mut i = 0;
    while !dir.path().join("resources.log.1").exists() {
        storage.save_record(sample(i)).unwrap();
        i += 1;
        assert!(i < 100, "no rotation after {} records", i);
    }
    let base_size = fs::metadata(dir.path().join("resources.log")).unwrap().len();
    assert!(base_size >= 1024);

    storage.save_record(sample(i)).unwrap();
    storage.flush().unwrap();
    assert_eq!(
        fs::metadata(dir.path().join("resources.log")).unwrap().len(),
        base_size
    );
    assert_eq!(storage.record_count().unwrap(), i as u64 + 1);
}

#[test]
fn test_old_sibling_compressed_on_rotation() {
    let dir = tempdir().unwrap();
    let old = dir.path().join("resources.log.1");
    fs::write(&old, format!("{}\n", encode(&sample(0)))).unwrap();
    age_file(&old, 2 * DAY);
    fs::write(dir.path().join("resources.log"), "").unwrap();

    let config = StorageConfig {
        max_size_mb: 1,
        max_files: 1024,
        buffer_size: 1,
        compress_after_days: 1,
        ..file_config(dir.path())
    };
    let storage = open_storage(&config).unwrap();
    storage.initialize().unwrap();

    for i in 1..20 {
        storage.save_record(sample(i)).unwrap();
    }
    storage.flush().unwrap();

    assert!(!old.exists());
    assert!(dir.path().join("resources.log.1.gz").exists());
    // Index 1 exists compressed, so rotation moved past it
    assert!(dir.path().join("resources.log.2").exists());

    // Compressed data is still readable, oldest first
    let records = storage.read_records(None).unwrap();
    assert_eq!(records.len(), 20);
    assert_eq!(records[0], sample(0));
}

#[test]
fn test_interrupted_compression_is_not_read_twice() {
    let dir = tempdir().unwrap();
    let records: Vec<_> = (0..10).map(sample).collect();
    let text: String = records.iter().map(|r| format!("{}\n", encode(r))).collect();

    // Crash after the archive was written but before the original was removed
    fs::write(dir.path().join("resources.log.1"), &text).unwrap();
    let mut gz = GzEncoder::new(
        File::create(dir.path().join("resources.log.1.gz")).unwrap(),
        Compression::default(),
    );
    gz.write_all(text.as_bytes()).unwrap();
    gz.finish().unwrap();

    let storage = open_storage(&file_config(dir.path())).unwrap();
    assert_eq!(storage.record_count().unwrap(), 10);
    assert_eq!(storage.read_records(None).unwrap(), records);
    assert_eq!(storage.storage_info().unwrap().total_records, 10);
}

#[test]
fn test_clean_old_data_spares_active_file() {
    let dir = tempdir().unwrap();
    for name in ["resources.log.1.gz", "resources.log.2", "resources.log.3"] {
        let path = dir.path().join(name);
        fs::write(&path, b"").unwrap();
        age_file(&path, 10 * DAY);
    }
    let active = dir.path().join("resources.log");
    fs::write(&active, format!("{}\n", encode(&sample(1)))).unwrap();
    age_file(&active, 10 * DAY);

    let storage = open_storage(&file_config(dir.path())).unwrap();
    storage.initialize().unwrap();
    assert_eq!(storage.clean_old_data(7).unwrap(), 3);

    assert!(active.exists());
    assert_eq!(storage.record_count().unwrap(), 1);
    assert_eq!(storage.storage_info().unwrap().file_count, 1);
}

#[test]
fn test_retention_applied_during_rotation() {
    let dir = tempdir().unwrap();
    let expired = dir.path().join("resources.log.1.gz");
    fs::write(&expired, b"").unwrap();
    age_file(&expired, 30 * DAY);
    fs::write(dir.path().join("resources.log"), "").unwrap();

    let config = StorageConfig {
        max_size_mb: 1,
        max_files: 1024,
        buffer_size: 1,
        retention_days: 7,
        ..file_config(dir.path())
    };
    let storage = open_storage(&config).unwrap();
    storage.initialize().unwrap();
    for i in 0..20 {
        storage.save_record(sample(i)).unwrap();
    }
    storage.flush().unwrap();

    assert!(!expired.exists());
    assert!(dir.path().join("resources.log.2").exists());
}

#[test]
fn test_max_files_bounds_the_family() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        max_size_mb: 1,
        max_files: 4,
        buffer_size: 1,
        ..file_config(dir.path())
    };
    let storage = open_storage(&config).unwrap();
    storage.initialize().unwrap();

    // 256 KiB per file; write well past four files' worth
    let mut big = sample(0);
    big.command = "x".repeat(60_000);
    for _ in 0..30 {
        storage.save_record(big.clone()).unwrap();
    }
    storage.flush().unwrap();

    let info = storage.storage_info().unwrap();
    assert!(info.file_count <= 4, "{} files on disk", info.file_count);
    assert!(!dir.path().join("resources.log").exists());
}

#[test]
fn test_empty_batch_is_noop_on_both_backends() {
    let dir = tempdir().unwrap();
    for config in [
        file_config(dir.path()),
        StorageConfig {
            sqlite_path: Some(dir.path().join("empty.db")),
            ..file_config(dir.path())
        },
    ] {
        let storage = open_storage(&config).unwrap();
        storage.initialize().unwrap();
        storage.save_records(&[]).unwrap();
        storage.flush().unwrap();
        assert_eq!(storage.record_count().unwrap(), 0);
        storage.close().unwrap();
    }
}

#[test]
fn test_sqlite_batch_rolls_back_as_a_whole() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("history.db");
    let config = StorageConfig {
        storage_type: BackendKind::Sqlite,
        sqlite_path: Some(db_path.clone()),
        ..StorageConfig::default()
    };
    let storage = open_storage(&config).unwrap();
    storage.initialize().unwrap();

    let mut batch: Vec<_> = (0..10).map(sample).collect();
    batch[7].name.clear();
    let err = storage.save_records(&batch).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Database(DbError::BatchRolledBack { attempted: 7, total: 10, .. })
    ));
    storage.close().unwrap();

    let conn = Connection::open(&db_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM resource_records", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
    let backend: String = conn
        .query_row(
            "SELECT value FROM storage_meta WHERE key = 'backend_type'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(backend, "sqlite");
}

#[test]
fn test_backends_produce_identical_stats() {
    let dir = tempdir().unwrap();
    let records: Vec<_> = (0..500).map(sample).collect();

    let file = open_storage(&file_config(dir.path())).unwrap();
    let sqlite = open_storage(&StorageConfig {
        sqlite_path: Some(dir.path().join("stats.db")),
        ..file_config(dir.path())
    })
    .unwrap();

    for storage in [&file, &sqlite] {
        storage.initialize().unwrap();
        storage.save_records(&records).unwrap();
        storage.flush().unwrap();
    }

    for group_by_category in [false, true] {
        let opts = StatsOptions {
            group_by_category,
            sampling_interval: Duration::from_secs(5),
        };
        for order in [StatsOrder::CpuAvgDesc, StatsOrder::ActiveTimeDesc] {
            let from_file = file.calculate_stats(&file.read_records(None).unwrap(), &opts, order);
            let from_db = sqlite.calculate_stats(&sqlite.read_records(None).unwrap(), &opts, order);
            assert!(!from_file.is_empty());
            assert_eq!(from_file, from_db);
        }
    }

    let start = at(100);
    let end = at(199);
    assert_eq!(
        file.read_records_by_time_range(start, end).unwrap(),
        sqlite.read_records_by_time_range(start, end).unwrap()
    );
    assert_eq!(file.read_records(Some(10)).unwrap(), sqlite.read_records(Some(10)).unwrap());
}

#[test]
fn test_stats_average_example() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&file_config(dir.path())).unwrap();
    storage.initialize().unwrap();
    let records: Vec<_> = [60.0, 70.0, 80.0]
        .iter()
        .enumerate()
        .map(|(i, &cpu)| ResourceRecord {
            cpu_percent: cpu,
            ..ResourceRecord::new(at(i as i64), "p")
        })
        .collect();
    storage.save_records(&records).unwrap();
    storage.flush().unwrap();

    let stats = storage.calculate_stats(
        &storage.read_records(None).unwrap(),
        &StatsOptions::default(),
        StatsOrder::CpuAvgDesc,
    );
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].cpu.avg, 70.0);
    assert_eq!(stats[0].cpu.max, 80.0);
    assert_eq!(stats[0].samples, 3);
}

#[test]
fn test_sqlite_clean_uses_shared_cutoff() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&StorageConfig {
        sqlite_path: Some(dir.path().join("clean.db")),
        ..StorageConfig::default()
    })
    .unwrap();
    storage.initialize().unwrap();

    let now = Local::now().naive_local();
    let records: Vec<_> = [20, 8, 6, 1]
        .iter()
        .map(|&days| ResourceRecord::new(now - TimeDelta::days(days), format!("d{}", days)))
        .collect();
    storage.save_records(&records).unwrap();

    assert_eq!(storage.clean_old_data(7).unwrap(), 2);
    let names: Vec<_> = storage
        .read_records(None)
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["d6", "d1"]);
}

#[test]
fn test_end_to_end_50k_records() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        // 1 MiB per file; the family never reaches the file cap
        max_size_mb: 10,
        max_files: 10,
        buffer_size: 1000,
        ..file_config(dir.path())
    };
    let storage = open_storage(&config).unwrap();
    storage.initialize().unwrap();

    let records: Vec<_> = (0..50_000).map(sample).collect();
    for chunk in records.chunks(500) {
        storage.save_records(chunk).unwrap();
    }
    storage.close().unwrap();

    let storage = open_storage(&config).unwrap();
    storage.initialize().unwrap();
    let info = storage.storage_info().unwrap();
    assert_eq!(info.total_records, 50_000);
    assert!(info.file_count >= 3, "only {} files", info.file_count);
    assert!(info.file_count <= 10);
    assert_eq!(info.oldest_record, Some(at(0)));
    assert_eq!(info.newest_record, Some(at(49_999)));

    let read = storage.read_records(None).unwrap();
    assert_eq!(read.len(), 50_000);
    assert_eq!(read, records);
}
