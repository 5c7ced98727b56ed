//! Shared types for the telecom usage ETL.
//!
//! Holds the loosely-typed table model the pipeline stages pass between each
//! other, the error enum, timestamp coercion, summary statistics, run status
//! messages and the CLI/database settings.

pub mod error;
pub mod models;
pub mod settings;
pub mod stats;
pub mod status;
pub mod time_utils;

pub use error::{EtlError, Result};
