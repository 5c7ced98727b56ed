//! Daily per-subscriber usage aggregation.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use telco_core::error::Result;
use telco_core::models::{
    CleanedDataset, DailyUsageAggregate, LatencyMetric, ValueKey, COL_AVG_THROUGHPUT,
    COL_LATENCY_MS, COL_MSISDN, COL_SESSION_ID, COL_TIMESTAMP, COL_TOTAL_USAGE_MB,
};
use telco_core::stats::mean;
use tracing::debug;

// ── GroupStats ────────────────────────────────────────────────────────────────

/// Running totals for one (subscriber, day) group.
#[derive(Debug, Default)]
struct GroupStats {
    total_usage_mb: f64,
    sessions: HashSet<ValueKey>,
    throughputs: Vec<f64>,
    latencies: Vec<f64>,
    rows: usize,
}

// ── AggregateTotals ───────────────────────────────────────────────────────────

/// Cross-row totals of a daily aggregate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateTotals {
    pub subscribers: usize,
    pub days: usize,
    pub total_usage_mb: f64,
    pub sessions: usize,
}

// ── UsageAggregator ───────────────────────────────────────────────────────────

/// Stateless helper that groups cleaned usage rows by subscriber and day.
pub struct UsageAggregator;

impl UsageAggregator {
    /// Aggregate the cleaned `usage` dataset by (msisdn, calendar date).
    ///
    /// Returns an empty vector when the dataset is absent or lacks `msisdn`
    /// or `timestamp`. Rows with a null msisdn or timestamp belong to no
    /// group. When there is no `latency_ms` column each row reports
    /// [`LatencyMetric::RowCount`] instead of a mean.
    ///
    /// Output is sorted by (msisdn, date).
    pub fn aggregate_daily(usage: Option<&CleanedDataset>) -> Vec<DailyUsageAggregate> {
        let Some(usage) = usage else {
            return Vec::new();
        };
        let table = &usage.table;
        let (Some(msisdn_idx), Some(ts_idx)) = (
            table.column_index(COL_MSISDN),
            table.column_index(COL_TIMESTAMP),
        ) else {
            debug!("usage dataset lacks msisdn/timestamp; no daily aggregate");
            return Vec::new();
        };

        let total_idx = table.column_index(COL_TOTAL_USAGE_MB);
        let session_idx = table.column_index(COL_SESSION_ID);
        let throughput_idx = table.column_index(COL_AVG_THROUGHPUT);
        let latency_idx = table.column_index(COL_LATENCY_MS);

        let mut groups: BTreeMap<(String, NaiveDate), GroupStats> = BTreeMap::new();

        for row in &table.rows {
            let Some(ts) = row[ts_idx].as_timestamp() else {
                continue;
            };
            if row[msisdn_idx].is_null() {
                continue;
            }

            let group = groups
                .entry((row[msisdn_idx].to_string(), ts.date_naive()))
                .or_default();

            group.rows += 1;
            if let Some(v) = total_idx.and_then(|i| row[i].as_f64()) {
                group.total_usage_mb += v;
            }
            if let Some(i) = session_idx {
                if !row[i].is_null() {
                    group.sessions.insert(row[i].key());
                }
            }
            if let Some(v) = throughput_idx.and_then(|i| row[i].as_f64()) {
                group.throughputs.push(v);
            }
            if let Some(v) = latency_idx.and_then(|i| row[i].as_f64()) {
                group.latencies.push(v);
            }
        }

        groups
            .into_iter()
            .map(|((msisdn, date), group)| DailyUsageAggregate {
                msisdn,
                date,
                total_usage_mb: group.total_usage_mb,
                sessions: group.sessions.len(),
                avg_throughput: mean(&group.throughputs),
                latency: if latency_idx.is_some() {
                    LatencyMetric::MeanMs(mean(&group.latencies))
                } else {
                    LatencyMetric::RowCount(group.rows)
                },
            })
            .collect()
    }

    /// Sum up the aggregate rows.
    pub fn calculate_totals(rows: &[DailyUsageAggregate]) -> AggregateTotals {
        let subscribers: HashSet<&str> = rows.iter().map(|r| r.msisdn.as_str()).collect();
        let days: HashSet<NaiveDate> = rows.iter().map(|r| r.date).collect();
        AggregateTotals {
            subscribers: subscribers.len(),
            days: days.len(),
            total_usage_mb: rows.iter().map(|r| r.total_usage_mb).sum(),
            sessions: rows.iter().map(|r| r.sessions).sum(),
        }
    }
}

// ── CSV output ────────────────────────────────────────────────────────────────

/// Flat CSV row; the latency variant is spelled out in `latency_metric`.
#[derive(Debug, Serialize)]
struct DailyUsageRecord<'a> {
    msisdn: &'a str,
    date: NaiveDate,
    total_usage_mb: f64,
    sessions: usize,
    avg_throughput: Option<f64>,
    latency_metric: &'static str,
    latency_value: Option<f64>,
}

impl<'a> From<&'a DailyUsageAggregate> for DailyUsageRecord<'a> {
    fn from(row: &'a DailyUsageAggregate) -> Self {
        let (latency_metric, latency_value) = match row.latency {
            LatencyMetric::MeanMs(v) => ("mean_ms", v),
            LatencyMetric::RowCount(n) => ("row_count", Some(n as f64)),
        };
        Self {
            msisdn: &row.msisdn,
            date: row.date,
            total_usage_mb: row.total_usage_mb,
            sessions: row.sessions,
            avg_throughput: row.avg_throughput,
            latency_metric,
            latency_value,
        }
    }
}

/// Write the aggregate to `path` as CSV, creating parent directories.
pub fn write_daily_usage_csv(path: &Path, rows: &[DailyUsageAggregate]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(DailyUsageRecord::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
