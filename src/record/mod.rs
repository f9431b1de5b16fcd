//! Resource records and their on-disk text encoding
//!
//! - [`types`]: the [`ResourceRecord`] sample and [`SchemaVersion`] layouts
//! - [`codec`]: line encoder/decoder with version auto-detection

pub mod codec;
pub mod types;

pub use codec::{decode, decode_versioned, encode};
pub use types::{ResourceRecord, SchemaVersion, TIMESTAMP_FORMAT};
