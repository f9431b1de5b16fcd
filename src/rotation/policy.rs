//! Age and count policies applied to a log family during rotation
//!
//! Every step here is best-effort: a failure is returned as a
//! [`MaintenanceIssue`] and the caller carries on.

use super::files::{FileInfo, GZ_SUFFIX};
use chrono::{DateTime, Local, TimeDelta};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Suffix of an archive still being written
const TMP_SUFFIX: &str = ".tmp";

/// Rotation and retention knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Total budget for the whole family
    pub max_size_mb: u64,

    /// Rotation slots, and the most files kept on disk
    pub max_files: usize,

    pub retention_days: u32,

    /// 0 disables compression
    pub compress_after_days: u32,
}

impl RotationPolicy {
    /// Size at which the active file is rotated: budget split across slots
    pub fn rotate_threshold_bytes(&self) -> u64 {
        let total = self.max_size_mb.saturating_mul(1024 * 1024);
        (total / self.max_files.max(1) as u64).max(1)
    }

    pub fn retention(&self) -> Duration {
        days(self.retention_days)
    }

    pub fn compress_after(&self) -> Option<Duration> {
        (self.compress_after_days > 0).then(|| days(self.compress_after_days))
    }
}

fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * SECS_PER_DAY)
}

/// Cutoff shared by file and SQLite retention: anything strictly older than
/// `now - keep_days` is removed
pub fn retention_cutoff(now: DateTime<Local>, keep_days: u32) -> DateTime<Local> {
    now - TimeDelta::days(i64::from(keep_days))
}

/// A maintenance step that failed without stopping rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceIssue {
    Compress { path: PathBuf, reason: String },
    Delete { path: PathBuf, reason: String },
}

impl std::fmt::Display for MaintenanceIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaintenanceIssue::Compress { path, reason } => {
                write!(f, "compress '{}' failed: {}", path.display(), reason)
            }
            MaintenanceIssue::Delete { path, reason } => {
                write!(f, "delete '{}' failed: {}", path.display(), reason)
            }
        }
    }
}

/// Gzip every rotated, uncompressed file older than `min_age`.
/// `skip` is the file currently open for writing.
pub fn compress_old(
    files: &[FileInfo],
    min_age: Duration,
    now: SystemTime,
    skip: Option<&Path>,
) -> Vec<MaintenanceIssue> {
    let mut issues = Vec::new();
    for file in files {
        if file.index == 0 || file.is_compressed || skip == Some(file.path.as_path()) {
            continue;
        }
        if file.age(now) <= min_age {
            continue;
        }
        match compress_file(&file.path, file.modified) {
            Ok(gz) => info!("Compressed {} -> {}", file.path.display(), gz.display()),
            Err(e) => {
                warn!("Compression of {} failed: {}", file.path.display(), e);
                issues.push(MaintenanceIssue::Compress {
                    path: file.path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    issues
}

/// Write `<path>.gz` with the original mtime, then remove `path`.
///
/// The archive is built under `<path>.gz.tmp` and renamed into place once
/// synced, so a `.gz` on disk is always complete. On error the temporary file
/// is removed and the original is left alone.
pub fn compress_file(path: &Path, modified: SystemTime) -> io::Result<PathBuf> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(GZ_SUFFIX);
    let gz_path = PathBuf::from(gz_name);
    let mut tmp_name = gz_path.as_os_str().to_owned();
    tmp_name.push(TMP_SUFFIX);
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| {
        let mut reader = BufReader::new(File::open(path)?);
        let out = File::create(&tmp_path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        let out = writer.into_inner().map_err(|e| e.into_error())?;
        out.sync_all()?;
        // Age policies must keep seeing the original age
        out.set_modified(modified)?;
        drop(out);
        fs::rename(&tmp_path, &gz_path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::remove_file(path)?;
    Ok(gz_path)
}

/// Delete every file (any compression state) last modified before `cutoff`.
/// Returns deleted paths and issues.
pub fn delete_expired(
    files: &[FileInfo],
    cutoff: SystemTime,
    skip: Option<&Path>,
) -> (Vec<PathBuf>, Vec<MaintenanceIssue>) {
    let mut deleted = Vec::new();
    let mut issues = Vec::new();
    for file in files {
        if skip == Some(file.path.as_path()) || file.modified >= cutoff {
            continue;
        }
        match fs::remove_file(&file.path) {
            Ok(()) => {
                info!("Deleted expired log {}", file.path.display());
                deleted.push(file.path.clone());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to delete expired {}: {}", file.path.display(), e);
                issues.push(MaintenanceIssue::Delete {
                    path: file.path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (deleted, issues)
}

/// Delete oldest files (by mtime, then index) while the family has at least
/// `max_files` members, making room for the file about to be opened
pub fn enforce_max_files(
    files: &[FileInfo],
    max_files: usize,
    skip: Option<&Path>,
) -> (Vec<PathBuf>, Vec<MaintenanceIssue>) {
    let mut candidates: Vec<&FileInfo> = files
        .iter()
        .filter(|f| skip != Some(f.path.as_path()))
        .collect();
    candidates.sort_by_key(|f| (f.modified, f.index));

    let mut remaining = files.len();
    let mut deleted = Vec::new();
    let mut issues = Vec::new();

    for file in candidates {
        if remaining < max_files {
            break;
        }
        match fs::remove_file(&file.path) {
            Ok(()) => {
                debug!("Deleted {} to stay under {} files", file.path.display(), max_files);
                deleted.push(file.path.clone());
                remaining -= 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => remaining -= 1,
            Err(e) => {
                warn!("Failed to delete {}: {}", file.path.display(), e);
                issues.push(MaintenanceIssue::Delete {
                    path: file.path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (deleted, issues)
}
