//! Transformation step: clean every raw dataset, then aggregate `usage`.

use std::collections::BTreeMap;

use telco_core::models::{CleanedDataset, DailyUsageAggregate, RawDataset, USAGE_SOURCE};
use tracing::info;

use crate::aggregator::UsageAggregator;
use crate::cleaner::clean_all;

/// The complete output of [`transform`].
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Cleaned datasets, keyed like the raw input.
    pub cleaned: BTreeMap<String, CleanedDataset>,
    /// Daily per-subscriber aggregate of the `usage` dataset.
    pub daily_usage: Vec<DailyUsageAggregate>,
    /// Wall-clock seconds spent cleaning and aggregating.
    pub transform_time_seconds: f64,
}

impl TransformOutput {
    /// The cleaned `usage` dataset, if one was extracted.
    pub fn usage(&self) -> Option<&CleanedDataset> {
        self.cleaned.get(USAGE_SOURCE)
    }
}

/// Clean all datasets and build the daily usage aggregate.
pub fn transform(raw: &BTreeMap<String, RawDataset>) -> TransformOutput {
    let start = std::time::Instant::now();

    let cleaned = clean_all(raw);
    let daily_usage = UsageAggregator::aggregate_daily(cleaned.get(USAGE_SOURCE));

    let transform_time_seconds = start.elapsed().as_secs_f64();
    info!(
        datasets = cleaned.len(),
        daily_rows = daily_usage.len(),
        "Data transformation complete"
    );

    TransformOutput {
        cleaned,
        daily_usage,
        transform_time_seconds,
    }
}
