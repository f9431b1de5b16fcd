//! The rotating record log
//!
//! State machine over one logical stream:
//!
//! ```text
//! closed ──open()──▶ active(index, size) ──size ≥ threshold──▶ rotate()
//!                          ▲                                     │
//!                          └──────── active(next index, 0) ◀─────┘
//! ```
//!
//! Size is tracked from bytes written, not by stat-ing the file. Rotation
//! never reuses an index that exists on disk in any form, so files left by a
//! previous run (including compressed ones) are never clobbered.

use super::files::{max_index, FamilyPattern, FileInfo};
use super::policy::{self, MaintenanceIssue, RotationPolicy};
use crate::error::{RotationError, RotationResult};
use flate2::read::GzDecoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Result of a rotation that opened its new file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Every maintenance step succeeded
    Clean { index: u32 },

    /// New file is open but some compression/cleanup step failed
    Degraded {
        index: u32,
        issues: Vec<MaintenanceIssue>,
    },
}

impl RotationOutcome {
    pub fn index(&self) -> u32 {
        match self {
            RotationOutcome::Clean { index } | RotationOutcome::Degraded { index, .. } => *index,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, RotationOutcome::Degraded { .. })
    }
}

/// Size-triggered rotating writer over `<base>`, `<base>.N`, `<base>.N.gz`.
///
/// Not meant to be shared by several processes writing the same base path.
pub struct RotatingLog {
    pattern: FamilyPattern,
    policy: RotationPolicy,
    writer: Option<BufWriter<File>>,
    active_path: PathBuf,
    active_index: u32,
    size: u64,
}

impl RotatingLog {
    /// Scan the family and open the file to continue writing.
    ///
    /// The unsuffixed base is preferred whenever it exists (or nothing
    /// exists). Otherwise writing resumes at the highest index, or one past
    /// it when that index only exists compressed.
    pub fn open(base: &Path, policy: RotationPolicy) -> RotationResult<Self> {
        let pattern = FamilyPattern::new(base)?;
        fs::create_dir_all(pattern.dir()).map_err(|e| RotationError::Open {
            path: pattern.dir().to_path_buf(),
            source: e,
        })?;

        let files = pattern.scan()?;
        let highest = max_index(&files);
        let base_exists = files.iter().any(|f| f.index == 0);

        let mut log = Self {
            pattern,
            policy,
            writer: None,
            active_path: PathBuf::new(),
            active_index: 0,
            size: 0,
        };

        if base_exists || files.is_empty() {
            match log.open_index(0) {
                Ok(()) => {}
                Err(e) => {
                    if dir_is_read_only(log.pattern.dir()) {
                        return Err(RotationError::ReadOnlyDir {
                            dir: log.pattern.dir().to_path_buf(),
                        });
                    }
                    // Legacy fallback: keep the base untouched, move on
                    let fallback = highest + 1;
                    warn!(
                        "Cannot open {} ({}), falling back to index {}",
                        log.pattern.path_for(0).display(),
                        e,
                        fallback
                    );
                    log.open_index(fallback)?;
                }
            }
        } else {
            let top_uncompressed = files
                .iter()
                .any(|f| f.index == highest && !f.is_compressed);
            let index = if top_uncompressed { highest } else { highest + 1 };
            log.open_index(index)?;
        }

        info!(
            "Record log active at {} ({} bytes, index {})",
            log.active_path.display(),
            log.size,
            log.active_index
        );
        Ok(log)
    }

    fn open_index(&mut self, index: u32) -> RotationResult<()> {
        let path = self.pattern.path_for(index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RotationError::Open {
                path: path.clone(),
                source: e,
            })?;
        // Appending to a leftover file: continue from its length
        self.size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::new(file));
        self.active_path = path;
        self.active_index = index;
        Ok(())
    }

    /// True once the active file has reached its share of the size budget
    pub fn should_rotate(&self) -> bool {
        self.size >= self.policy.rotate_threshold_bytes()
    }

    /// Append one encoded record, rotating first if the active file is full.
    ///
    /// Returns the rotation outcome when a rotation happened.
    pub fn write_record(&mut self, line: &str) -> RotationResult<Option<RotationOutcome>> {
        let outcome = if self.should_rotate() || self.writer.is_none() {
            Some(self.rotate()?)
        } else {
            None
        };

        let writer = self.writer.as_mut().ok_or_else(|| RotationError::Open {
            path: self.active_path.clone(),
            source: io::Error::other("no active file"),
        })?;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|e| RotationError::Write {
                path: self.active_path.clone(),
                source: e,
            })?;
        self.size += line.len() as u64 + 1;

        Ok(outcome)
    }

    /// Flush buffered bytes to the active file
    pub fn flush(&mut self) -> RotationResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| RotationError::Write {
                path: self.active_path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Close the active file and open the next index, applying compression,
    /// retention and file-count policies in between.
    pub fn rotate(&mut self) -> RotationResult<RotationOutcome> {
        let closing = self.close_active();
        if let Err(e) = &closing {
            warn!("Flush of {} on rotation failed: {}", self.active_path.display(), e);
        }

        let files = self.pattern.scan()?;
        let next = max_index(&files).max(self.active_index) + 1;
        debug!(
            "Rotating {} at {} bytes -> index {}",
            self.active_path.display(),
            self.size,
            next
        );

        let mut issues = self.run_maintenance(None);

        let closed_path = self.active_path.clone();
        self.open_index(next)?;
        closing.map_err(|e| RotationError::Write {
            path: closed_path,
            source: e,
        })?;

        issues.dedup();
        let outcome = if issues.is_empty() {
            RotationOutcome::Clean { index: next }
        } else {
            warn!("Rotation to index {} degraded: {} issue(s)", next, issues.len());
            RotationOutcome::Degraded {
                index: next,
                issues,
            }
        };
        Ok(outcome)
    }

    /// Compression, retention, then file count. Each step rescans so it sees
    /// what the previous one changed.
    fn run_maintenance(&self, skip: Option<&Path>) -> Vec<MaintenanceIssue> {
        let now = SystemTime::now();
        let mut issues = Vec::new();

        let rescan = || match self.pattern.scan() {
            Ok(files) => Some(files),
            Err(e) => {
                warn!("Rescan during rotation failed: {}", e);
                None
            }
        };

        if let Some(min_age) = self.policy.compress_after() {
            if let Some(files) = rescan() {
                issues.extend(policy::compress_old(&files, min_age, now, skip));
            }
        }

        if let Some(files) = rescan() {
            let cutoff = now
                .checked_sub(self.policy.retention())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            issues.extend(policy::delete_expired(&files, cutoff, skip).1);
        }

        if let Some(files) = rescan() {
            issues.extend(policy::enforce_max_files(&files, self.policy.max_files, skip).1);
        }

        issues
    }

    /// Delete files last modified before `cutoff`, sparing the active file.
    /// Returns the number of files removed.
    pub fn apply_retention(&mut self, cutoff: SystemTime) -> RotationResult<usize> {
        self.flush()?;
        let files = self.pattern.scan()?;
        let (deleted, issues) =
            policy::delete_expired(&files, cutoff, Some(self.active_path.as_path()));
        for issue in &issues {
            warn!("Retention: {}", issue);
        }
        Ok(deleted.len())
    }

    fn close_active(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Flush and release the file handle
    pub fn close(&mut self) -> RotationResult<()> {
        self.close_active().map_err(|e| RotationError::Write {
            path: self.active_path.clone(),
            source: e,
        })
    }

    /// Current family members
    pub fn files(&self) -> RotationResult<Vec<FileInfo>> {
        self.pattern.scan()
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn active_index(&self) -> u32 {
        self.active_index
    }

    /// Bytes in the active file, including unflushed ones
    pub fn active_size(&self) -> u64 {
        self.size
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }
}

impl Drop for RotatingLog {
    fn drop(&mut self) {
        if let Err(e) = self.close_active() {
            warn!("Flush of {} on drop failed: {}", self.active_path.display(), e);
        }
    }
}

/// Open a family member for line reading, decompressing `.gz` siblings
pub fn open_reader(file: &FileInfo) -> io::Result<Box<dyn BufRead>> {
    let raw = File::open(&file.path)?;
    let reader: Box<dyn Read> = if file.is_compressed {
        Box::new(GzDecoder::new(raw))
    } else {
        Box::new(raw)
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Read every line of every family member in index order (oldest first).
///
/// The visitor sees each line without its newline. Unreadable files are
/// logged and skipped; a partial family is still returned.
pub fn for_each_line(files: &[FileInfo], mut visit: impl FnMut(&str)) -> usize {
    let mut skipped_files = 0;
    for file in files {
        let reader = match open_reader(file) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping unreadable {}: {}", file.path.display(), e);
                skipped_files += 1;
                continue;
            }
        };
        for line in reader.split(b'\n') {
            match line {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let text = text.trim_end_matches('\r');
                    if !text.is_empty() {
                        visit(text);
                    }
                }
                Err(e) => {
                    // Truncated gzip stream from a crash: keep what we got
                    warn!("Read of {} stopped early: {}", file.path.display(), e);
                    skipped_files += 1;
                    break;
                }
            }
        }
    }
    skipped_files
}

fn dir_is_read_only(dir: &Path) -> bool {
    fs::metadata(dir)
        .map(|m| m.permissions().readonly())
        .unwrap_or(true)
}
