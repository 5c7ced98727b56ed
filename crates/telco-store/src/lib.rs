//! Persistence layer for the telecom usage ETL.
//!
//! Owns the SQLite-backed usage store and the idempotent loader that writes
//! cleaned `usage` rows into it.

pub mod loader;
pub mod store;

pub use loader::{load_usage, LoadError, LoadSummary};
pub use store::{ConnectionProvider, StoreError, UsageStore};
