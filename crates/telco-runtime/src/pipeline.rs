//! The ETL pipeline orchestrator.
//!
//! [`EtlPipeline::run`] sequences extraction, transformation and loading,
//! times the run, and returns a [`PipelineReport`] carrying a structured
//! outcome plus the status messages for the presentation layer. Stages run
//! strictly one after another; a failed run is never resumed, the next call
//! starts again at extraction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use telco_core::error::EtlError;
use telco_core::models::DailyUsageAggregate;
use telco_core::status::{latest, StatusLevel, StatusMessage};
use telco_data::aggregator::{write_daily_usage_csv, UsageAggregator};
use telco_data::extractor::{discover_raw_files, extract_all};
use telco_data::transform::transform;
use telco_store::{load_usage, ConnectionProvider, LoadError, LoadSummary, StoreError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::intake::REQUIRED_FILES;

/// File name of the daily aggregate inside the processed directory.
pub const DAILY_USAGE_FILE: &str = "daily_usage.csv";

// ── RunState ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Extracting => "extracting",
            RunState::Transforming => "transforming",
            RunState::Loading => "loading",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("an ETL pipeline run is already in progress")]
    AlreadyRunning,
    #[error("extraction failed: {0}")]
    Extract(#[from] EtlError),
    #[error("could not connect to the usage store: {0}")]
    Connect(#[source] StoreError),
    #[error("loading failed: {0}")]
    Load(#[from] LoadError),
}

/// A failed run: the stage it failed in and why.
#[derive(Debug, Error)]
#[error("pipeline failed while {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: RunState,
    #[source]
    pub error: PipelineError,
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Which raw files a run extracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    /// These names inside the raw directory, in order.
    Files(Vec<String>),
    /// Every supported file found in the raw directory.
    Discover,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub raw_dir: PathBuf,
    pub sources: SourceSelection,
    /// Where the daily aggregate CSV is written; `None` skips the file.
    pub processed_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Extract the required upload files from `raw_dir`.
    pub fn new(raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            sources: SourceSelection::Files(REQUIRED_FILES.iter().map(|s| s.to_string()).collect()),
            processed_dir: None,
        }
    }

    pub fn with_files<S: Into<String>>(mut self, files: impl IntoIterator<Item = S>) -> Self {
        self.sources = SourceSelection::Files(files.into_iter().map(Into::into).collect());
        self
    }

    pub fn discover(mut self) -> Self {
        self.sources = SourceSelection::Discover;
        self
    }

    pub fn with_processed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.processed_dir = Some(dir.into());
        self
    }

    /// Resolved paths of the files a run will extract.
    pub fn source_paths(&self) -> Vec<PathBuf> {
        match &self.sources {
            SourceSelection::Files(names) => names.iter().map(|n| self.raw_dir.join(n)).collect(),
            SourceSelection::Discover => discover_raw_files(&self.raw_dir),
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Counts from a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub files: usize,
    pub files_failed: usize,
    pub rows_extracted: usize,
    pub cleaned_usage_rows: usize,
    pub daily_rows: usize,
    pub total_usage_mb: f64,
    pub load: LoadSummary,
    pub aggregate_path: Option<PathBuf>,
}

/// Everything a caller learns from one run.
#[derive(Debug)]
pub struct PipelineReport {
    /// `Completed` or `Failed`.
    pub state: RunState,
    pub outcome: Result<RunSummary, PipelineFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    /// Status messages in the order they were raised.
    pub messages: Vec<StatusMessage>,
    /// The daily aggregate; empty when the run failed before transforming.
    pub daily_usage: Vec<DailyUsageAggregate>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&PipelineFailure> {
        self.outcome.as_ref().err()
    }

    /// The single message a dashboard would show for this run: the latest
    /// error for a failed run, otherwise the latest success.
    pub fn final_status(&self) -> Option<&StatusMessage> {
        let level = if self.is_success() {
            StatusLevel::Success
        } else {
            StatusLevel::Error
        };
        latest(&self.messages, level)
    }
}

// ── EtlPipeline ───────────────────────────────────────────────────────────────

/// Runs the ETL pipeline against one store.
///
/// At most one run per pipeline value is in flight; a concurrent call to
/// [`EtlPipeline::run`] fails fast with [`PipelineError::AlreadyRunning`].
pub struct EtlPipeline<P: ConnectionProvider> {
    config: PipelineConfig,
    provider: P,
    running: AtomicBool,
}

/// Clears the running flag on every exit path.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Mutable state threaded through one run.
struct RunContext {
    state: RunState,
    messages: Vec<StatusMessage>,
    daily_usage: Vec<DailyUsageAggregate>,
}

impl RunContext {
    fn enter(&mut self, state: RunState) {
        info!(from = %self.state, to = %state, "pipeline state change");
        self.state = state;
    }

    fn fail(&self, error: impl Into<PipelineError>) -> PipelineFailure {
        PipelineFailure {
            stage: self.state,
            error: error.into(),
        }
    }
}

impl<P: ConnectionProvider> EtlPipeline<P> {
    pub fn new(config: PipelineConfig, provider: P) -> Self {
        Self {
            config,
            provider,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run extraction, transformation and loading once.
    pub fn run(&self) -> PipelineReport {
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut ctx = RunContext {
            state: RunState::Idle,
            messages: Vec::new(),
            daily_usage: Vec::new(),
        };

        let outcome = if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("ETL pipeline already running; ignoring request");
            Err(ctx.fail(PipelineError::AlreadyRunning))
        } else {
            let _guard = RunGuard(&self.running);
            info!("Starting ETL pipeline");
            ctx.messages.push(StatusMessage::info("Running ETL pipeline..."));
            self.run_stages(&mut ctx)
        };

        let finished_at = Utc::now();
        let duration = clock.elapsed();

        match &outcome {
            Ok(summary) => {
                ctx.enter(RunState::Completed);
                ctx.messages.push(StatusMessage::success(format!(
                    "ETL pipeline completed successfully! {} new rows loaded.",
                    summary.load.rows_inserted
                )));
            }
            Err(failure) => {
                ctx.state = RunState::Failed;
                error!(stage = %failure.stage, error = %failure.error, "ETL pipeline failed");
                ctx.messages
                    .push(StatusMessage::error(format!("Error during ETL pipeline: {}", failure)));
            }
        }
        info!(
            "Finished ETL at {} (duration: {:.1}s)",
            finished_at.to_rfc3339(),
            duration.as_secs_f64()
        );

        PipelineReport {
            state: ctx.state,
            outcome,
            started_at,
            finished_at,
            duration,
            messages: ctx.messages,
            daily_usage: ctx.daily_usage,
        }
    }

    // ── Stages ────────────────────────────────────────────────────────────

    fn run_stages(&self, ctx: &mut RunContext) -> Result<RunSummary, PipelineFailure> {
        let mut summary = RunSummary::default();

        // 1. Extract
        ctx.enter(RunState::Extracting);
        let paths = self.config.source_paths();
        let extraction = extract_all(&paths).map_err(|e| ctx.fail(e))?;
        for issue in &extraction.issues {
            ctx.messages.push(StatusMessage::warn(format!(
                "Could not read {}: {}",
                issue.path.display(),
                issue.error
            )));
        }
        summary.files = paths.len();
        summary.files_failed = extraction.issues.len();
        summary.rows_extracted = extraction.total_rows();

        // 2. Transform
        ctx.enter(RunState::Transforming);
        let output = transform(&extraction.datasets);
        drop(extraction);
        summary.cleaned_usage_rows = output.usage().map_or(0, |u| u.table.len());
        summary.daily_rows = output.daily_usage.len();
        summary.total_usage_mb =
            UsageAggregator::calculate_totals(&output.daily_usage).total_usage_mb;
        if let Some(dir) = &self.config.processed_dir {
            summary.aggregate_path = self.write_aggregate(ctx, dir, &output.daily_usage);
        }

        // 3. Load
        ctx.enter(RunState::Loading);
        info!(target = %self.provider.describe(), "connecting to usage store");
        summary.load = {
            let mut store = self
                .provider
                .connect()
                .map_err(|e| ctx.fail(PipelineError::Connect(e)))?;
            load_usage(&mut store, &output.cleaned).map_err(|e| ctx.fail(e))?
        };
        if summary.load.skipped {
            ctx.messages
                .push(StatusMessage::info("No usage data to load; the store was not changed."));
        }

        ctx.daily_usage = output.daily_usage;
        Ok(summary)
    }

    /// Write the aggregate CSV; a failure is reported as a warning only.
    fn write_aggregate(
        &self,
        ctx: &mut RunContext,
        dir: &Path,
        rows: &[DailyUsageAggregate],
    ) -> Option<PathBuf> {
        let path = dir.join(DAILY_USAGE_FILE);
        match write_daily_usage_csv(&path, rows) {
            Ok(()) => {
                info!(rows = rows.len(), "wrote daily usage to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "could not write daily usage to {}", path.display());
                ctx.messages.push(StatusMessage::warn(format!(
                    "Could not write daily usage to {}: {}",
                    path.display(),
                    e
                )));
                None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
