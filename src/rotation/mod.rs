//! Log rotation, compression and retention
//!
//! - [`files`]: family discovery (`<base>`, `<base>.N`, `<base>.N.gz`)
//! - [`policy`]: compression, retention and file-count policies
//! - [`log`]: [`RotatingLog`], the size-triggered rotating writer

pub mod files;
pub mod log;
pub mod policy;

pub use files::{FamilyPattern, FileInfo};
pub use log::{for_each_line, RotatingLog, RotationOutcome};
pub use policy::{retention_cutoff, MaintenanceIssue, RotationPolicy};
