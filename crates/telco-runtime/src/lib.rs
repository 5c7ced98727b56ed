//! Runtime orchestration layer for the telecom usage ETL.
//!
//! Sequences extraction, transformation and loading into a single run with a
//! structured report, and handles the upload intake around it.

pub mod intake;
pub mod pipeline;

pub use pipeline::{
    EtlPipeline, PipelineConfig, PipelineError, PipelineFailure, PipelineReport, RunState,
    RunSummary, SourceSelection,
};
pub use telco_core as core;
pub use telco_data as data;
pub use telco_store as store;
