//! Per-dataset cleaning.
//!
//! Every dataset is cleaned independently on a copy of the raw table:
//!
//! 1. column names are lowercased, trimmed and have spaces replaced by `_`;
//! 2. missing `avg_throughput` values are filled with the dataset's median;
//! 3. rows repeating an earlier `session_id` are dropped;
//! 4. `total_usage_mb = download_mb + upload_mb`, missing sides counting as 0;
//! 5. rows with a negative `duration_ms` are dropped;
//! 6. `timestamp` cells are parsed, unparseable ones become null;
//! 7. missing `app_category` values become `"unknown"`.
//!
//! Each step only runs when its columns exist. Empty datasets pass through
//! untouched.

use std::collections::{BTreeMap, HashSet};

use telco_core::models::{
    CleanedDataset, RawDataset, Table, Value, COL_APP_CATEGORY, COL_AVG_THROUGHPUT,
    COL_DOWNLOAD_MB, COL_DURATION_MS, COL_SESSION_ID, COL_TIMESTAMP, COL_TOTAL_USAGE_MB,
    COL_UPLOAD_MB, UNKNOWN_CATEGORY,
};
use telco_core::stats::median;
use telco_core::time_utils::coerce_timestamp;
use tracing::debug;

// ── CleanStats ────────────────────────────────────────────────────────────────

/// What the cleaner changed in one dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanStats {
    pub rows_in: usize,
    pub rows_out: usize,
    /// Median used to fill `avg_throughput`, when one could be computed.
    pub throughput_median: Option<f64>,
    pub throughput_imputed: usize,
    pub duplicate_sessions_dropped: usize,
    pub negative_durations_dropped: usize,
    /// Non-null timestamp cells that could not be parsed.
    pub timestamps_nulled: usize,
    pub categories_imputed: usize,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Lowercase, trim, then replace spaces with underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.to_lowercase().trim().replace(' ', "_")
}

/// Clean every dataset, keyed as in the input.
pub fn clean_all(raw: &BTreeMap<String, RawDataset>) -> BTreeMap<String, CleanedDataset> {
    raw.iter()
        .map(|(key, dataset)| {
            let (cleaned, stats) = clean_dataset(dataset);
            debug!(dataset = %key, ?stats, "dataset cleaned");
            (key.clone(), cleaned)
        })
        .collect()
}

/// Clean a single dataset. The raw dataset is not modified.
pub fn clean_dataset(raw: &RawDataset) -> (CleanedDataset, CleanStats) {
    let mut table = raw.table.clone();
    let mut stats = CleanStats {
        rows_in: table.len(),
        ..CleanStats::default()
    };

    if !table.is_empty() {
        normalize_columns(&mut table);
        impute_throughput(&mut table, &mut stats);
        drop_duplicate_sessions(&mut table, &mut stats);
        derive_total_usage(&mut table);
        drop_negative_durations(&mut table, &mut stats);
        parse_timestamps(&mut table, &mut stats);
        impute_categories(&mut table, &mut stats);
    }

    stats.rows_out = table.len();
    (
        CleanedDataset {
            source: raw.source.clone(),
            table,
        },
        stats,
    )
}

// ── Steps ─────────────────────────────────────────────────────────────────────

fn normalize_columns(table: &mut Table) {
    for column in &mut table.columns {
        *column = normalize_column_name(column);
    }
}

fn impute_throughput(table: &mut Table, stats: &mut CleanStats) {
    let Some(idx) = table.column_index(COL_AVG_THROUGHPUT) else {
        return;
    };

    let Some(fill) = median(table.rows.iter().filter_map(|row| row[idx].as_f64())) else {
        return;
    };
    stats.throughput_median = Some(fill);

    for row in &mut table.rows {
        if row[idx].is_null() {
            row[idx] = Value::Float(fill);
            stats.throughput_imputed += 1;
        }
    }
}

/// Keeps the first row for each `session_id`; nulls count as one identifier.
fn drop_duplicate_sessions(table: &mut Table, stats: &mut CleanStats) {
    let Some(idx) = table.column_index(COL_SESSION_ID) else {
        return;
    };

    let before = table.rows.len();
    let mut seen = HashSet::new();
    table.rows.retain(|row| seen.insert(row[idx].key()));
    stats.duplicate_sessions_dropped = before - table.rows.len();
}

fn derive_total_usage(table: &mut Table) {
    let (Some(down), Some(up)) = (
        table.column_index(COL_DOWNLOAD_MB),
        table.column_index(COL_UPLOAD_MB),
    ) else {
        return;
    };

    let total = table.ensure_column(COL_TOTAL_USAGE_MB);
    for row in &mut table.rows {
        let sum = row[down].as_f64().unwrap_or(0.0) + row[up].as_f64().unwrap_or(0.0);
        row[total] = Value::Float(sum);
    }
}

/// Missing durations are kept; only negative values are invalid.
fn drop_negative_durations(table: &mut Table, stats: &mut CleanStats) {
    let Some(idx) = table.column_index(COL_DURATION_MS) else {
        return;
    };

    let before = table.rows.len();
    table
        .rows
        .retain(|row| !row[idx].as_f64().is_some_and(|d| d < 0.0));
    stats.negative_durations_dropped = before - table.rows.len();
}

fn parse_timestamps(table: &mut Table, stats: &mut CleanStats) {
    let Some(idx) = table.column_index(COL_TIMESTAMP) else {
        return;
    };

    for row in &mut table.rows {
        let parsed = coerce_timestamp(&row[idx]);
        if parsed.is_none() && !row[idx].is_null() {
            stats.timestamps_nulled += 1;
        }
        row[idx] = parsed.map(Value::Timestamp).unwrap_or(Value::Null);
    }
}

fn impute_categories(table: &mut Table, stats: &mut CleanStats) {
    let Some(idx) = table.column_index(COL_APP_CATEGORY) else {
        return;
    };

    for row in &mut table.rows {
        if row[idx].is_null() {
            row[idx] = Value::Text(UNKNOWN_CATEGORY.to_string());
            stats.categories_imputed += 1;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
