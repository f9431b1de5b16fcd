//! Discovery of a log family on disk
//!
//! A family is `<base>` (index 0), `<base>.<n>` and `<base>.<n>.gz`. The
//! filesystem is the only source of truth: [`scan`] is re-run at startup and
//! on every rotation instead of keeping a persistent index.

use crate::error::{RotationError, RotationResult};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Suffix of compressed siblings
pub const GZ_SUFFIX: &str = ".gz";

/// One member of a log family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub is_compressed: bool,

    /// 0 for the unsuffixed base file, N for `<base>.N[.gz]`
    pub index: u32,
}

impl FileInfo {
    /// Age relative to `now`; files from the future count as brand new
    pub fn age(&self, now: SystemTime) -> std::time::Duration {
        now.duration_since(self.modified).unwrap_or_default()
    }
}

/// Matches sibling names for one base path
#[derive(Debug, Clone)]
pub struct FamilyPattern {
    dir: PathBuf,
    base_name: String,
    sibling: Regex,
}

impl FamilyPattern {
    pub fn new(base: &Path) -> RotationResult<Self> {
        let base_name = base
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RotationError::InvalidPath {
                path: base.to_path_buf(),
            })?
            .to_string();

        let dir = match base.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let sibling = Regex::new(&format!(
            r"^{}\.(\d+)(\.gz)?$",
            regex::escape(&base_name)
        ))
        .map_err(|_| RotationError::InvalidPath {
            path: base.to_path_buf(),
        })?;

        Ok(Self {
            dir,
            base_name,
            sibling,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the uncompressed file at `index`
    pub fn path_for(&self, index: u32) -> PathBuf {
        if index == 0 {
            self.dir.join(&self.base_name)
        } else {
            self.dir.join(format!("{}.{}", self.base_name, index))
        }
    }

    /// Parse a directory entry name into (index, compressed)
    pub fn classify(&self, name: &str) -> Option<(u32, bool)> {
        if name == self.base_name {
            return Some((0, false));
        }
        let caps = self.sibling.captures(name)?;
        let index = caps.get(1)?.as_str().parse::<u32>().ok()?;
        if index == 0 {
            return None;
        }
        Some((index, caps.get(2).is_some()))
    }

    /// List every family member, sorted by index.
    ///
    /// When an index exists both plain and compressed, compression was
    /// interrupted before the original was removed: only the plain file is
    /// listed.
    pub fn scan(&self) -> RotationResult<Vec<FileInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RotationError::Scan {
                    dir: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((index, is_compressed)) = self.classify(name) else {
                continue;
            };
            // Vanished between readdir and stat: not ours to report
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            files.push(FileInfo {
                path: entry.path(),
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                is_compressed,
                index,
            });
        }

        files.sort_by_key(|f| (f.index, f.is_compressed));
        files.dedup_by(|later, kept| {
            let dup = later.index == kept.index;
            if dup {
                debug!("Ignoring {} beside {}", later.path.display(), kept.path.display());
            }
            dup
        });
        Ok(files)
    }
}

/// Highest index present, compressed or not
pub fn max_index(files: &[FileInfo]) -> u32 {
    files.iter().map(|f| f.index).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_classify() {
        let pattern = FamilyPattern::new(Path::new("/var/log/res.log")).unwrap();
        assert_eq!(pattern.classify("res.log"), Some((0, false)));
        assert_eq!(pattern.classify("res.log.3"), Some((3, false)));
        assert_eq!(pattern.classify("res.log.12.gz"), Some((12, true)));
        assert_eq!(pattern.classify("res.log.0"), None);
        assert_eq!(pattern.classify("res.log.x"), None);
        assert_eq!(pattern.classify("resXlog.1"), None);
        assert_eq!(pattern.classify("other.log.1"), None);
    }

    #[test]
    fn test_paths() {
        let pattern = FamilyPattern::new(Path::new("/data/res.log")).unwrap();
        assert_eq!(pattern.path_for(0), PathBuf::from("/data/res.log"));
        assert_eq!(pattern.path_for(4), PathBuf::from("/data/res.log.4"));
    }

    #[test]
    fn test_scan_sorted() {
        let dir = tempdir().unwrap();
        for name in ["res.log", "res.log.2.gz", "res.log.10", "res.log.1", "unrelated.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pattern = FamilyPattern::new(&dir.path().join("res.log")).unwrap();
        let files = pattern.scan().unwrap();
        let indices: Vec<_> = files.iter().map(|f| (f.index, f.is_compressed)).collect();
        assert_eq!(indices, vec![(0, false), (1, false), (2, true), (10, false)]);
        assert_eq!(max_index(&files), 10);
    }

    #[test]
    fn test_scan_prefers_plain_over_interrupted_gz() {
        let dir = tempdir().unwrap();
        for name in ["res.log.1", "res.log.1.gz", "res.log.2.gz", "res.log.2.gz.tmp"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pattern = FamilyPattern::new(&dir.path().join("res.log")).unwrap();
        let files = pattern.scan().unwrap();
        let indices: Vec<_> = files.iter().map(|f| (f.index, f.is_compressed)).collect();
        assert_eq!(indices, vec![(1, false), (2, true)]);
        assert_eq!(files[0].path, dir.path().join("res.log.1"));
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let pattern = FamilyPattern::new(&dir.path().join("nope/res.log")).unwrap();
        assert!(pattern.scan().unwrap().is_empty());
    }
}
