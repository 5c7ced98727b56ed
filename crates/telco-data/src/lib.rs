//! Extraction and transformation layer for the telecom usage ETL.
//!
//! Responsible for reading raw CSV, spreadsheet and line-delimited JSON files,
//! cleaning each dataset, and building the daily per-subscriber usage
//! aggregate.

pub mod aggregator;
pub mod cleaner;
pub mod extractor;
pub mod transform;

pub use telco_core as core;
