//! SQLite storage backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Storage facade (one writer)              │
//! │  - save_records(batch)                              │
//! └─────────────────────┬───────────────────────────────┘
//!                       │ one transaction per batch
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │         SqliteStorage (Mutex<Connection>)           │
//! │  - prepared, cached insert                          │
//! │  - rollback of the whole batch on any failing row   │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │   resource_records + storage_meta (WAL mode)        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Readers sharing the handle see a batch either entirely or not at all.

pub mod schema;
pub mod store;

pub use schema::{create_database, create_indexes, keys, Pragmas};
pub use store::SqliteStorage;
