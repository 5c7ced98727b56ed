use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ── Well-known column names ───────────────────────────────────────────────────

/// Subscriber identifier present in every logical source.
pub const COL_MSISDN: &str = "msisdn";
pub const COL_SESSION_ID: &str = "session_id";
pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_AVG_THROUGHPUT: &str = "avg_throughput";
pub const COL_DOWNLOAD_MB: &str = "download_mb";
pub const COL_UPLOAD_MB: &str = "upload_mb";
/// Derived by the cleaner as `download_mb + upload_mb`.
pub const COL_TOTAL_USAGE_MB: &str = "total_usage_mb";
pub const COL_DURATION_MS: &str = "duration_ms";
pub const COL_APP_CATEGORY: &str = "app_category";
pub const COL_LATENCY_MS: &str = "latency_ms";

/// Sentinel written into missing `app_category` cells.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Logical source names, in routing precedence order.
pub const LOGICAL_SOURCES: [&str; 3] = ["roaming", "usage", "sessions"];

/// Logical source holding per-session usage records.
pub const USAGE_SOURCE: &str = "usage";

/// Cell strings treated as missing when inferring values from text sources.
const NA_MARKERS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "<NA>", "#N/A",
];

// ── Value ─────────────────────────────────────────────────────────────────────

/// A single loosely-typed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Infer a value from a raw text cell (CSV field, spreadsheet string).
    pub fn from_text_cell(raw: &str) -> Self {
        let trimmed = raw.trim();
        if NA_MARKERS.contains(&trimmed) {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_nan() {
                return Value::Null;
            }
            return Value::Float(f);
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        Value::Text(raw.to_string())
    }

    /// Convert a decoded JSON value into a cell. Nested arrays and objects are
    /// kept as their compact JSON text.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            nested => Value::Text(nested.to_string()),
        }
    }

    /// `true` for [`Value::Null`] and for a NaN float.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the cell. Text, booleans and timestamps are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Hashable identity used for duplicate detection.
    ///
    /// Integral floats compare equal to the matching integer, and every null
    /// compares equal to every other null.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Int(i) => ValueKey::Int(*i),
            Value::Float(f) if f.is_nan() => ValueKey::Null,
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                ValueKey::Int(*f as i64)
            }
            Value::Float(f) => ValueKey::Float(f.to_bits()),
            Value::Text(s) => ValueKey::Text(s.clone()),
            Value::Timestamp(ts) => {
                ValueKey::Timestamp(ts.timestamp(), ts.timestamp_subsec_nanos())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

/// See [`Value::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    Timestamp(i64, u32),
}

// ── Table ─────────────────────────────────────────────────────────────────────

/// Row-major tabular data with named columns.
///
/// Every row holds exactly `columns.len()` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding with nulls or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell at `row` in column `name`, if both exist.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Index of `name`, appending an all-null column when absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }
}

// ── Datasets ──────────────────────────────────────────────────────────────────

/// A table exactly as read from one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDataset {
    /// Logical source name (`roaming`, `usage`, `sessions`, or the file stem).
    pub source: String,
    /// File the rows were read from.
    pub path: PathBuf,
    pub table: Table,
}

impl RawDataset {
    /// An empty dataset standing in for a file that could not be read.
    pub fn empty(source: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
            table: Table::default(),
        }
    }
}

/// A normalized table produced by the cleaner.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedDataset {
    pub source: String,
    pub table: Table,
}

// ── Daily aggregate ───────────────────────────────────────────────────────────

/// The latency figure reported for one (subscriber, day) group.
///
/// Usage files without a `latency_ms` column cannot produce a mean latency;
/// those groups report how many rows they contain instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMetric {
    /// Mean of the present `latency_ms` values (`None` when all are missing).
    MeanMs(Option<f64>),
    /// Placeholder: number of rows in the group.
    RowCount(usize),
}

/// Usage summary for one subscriber on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsageAggregate {
    pub msisdn: String,
    pub date: NaiveDate,
    /// Sum of `total_usage_mb` over the day.
    pub total_usage_mb: f64,
    /// Count of distinct non-null session identifiers.
    pub sessions: usize,
    /// Mean of `avg_throughput`, `None` when the column is absent or empty.
    pub avg_throughput: Option<f64>,
    pub latency: LatencyMetric,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_text_cell_inference() {
        assert_eq!(Value::from_text_cell("42"), Value::Int(42));
        assert_eq!(Value::from_text_cell("2.5"), Value::Float(2.5));
        assert_eq!(Value::from_text_cell("TRUE"), Value::Bool(true));
        assert_eq!(Value::from_text_cell("video"), Value::Text("video".into()));
        assert_eq!(Value::from_text_cell(""), Value::Null);
        assert_eq!(Value::from_text_cell("NaN"), Value::Null);
        assert_eq!(Value::from_text_cell(" NA "), Value::Null);
    }

    #[test]
    fn test_from_json_keeps_nested_as_text() {
        let v = Value::from_json(serde_json::json!({"a": 1}));
        assert_eq!(v, Value::Text("{\"a\":1}".into()));
        assert_eq!(Value::from_json(serde_json::json!(7)), Value::Int(7));
        assert_eq!(Value::from_json(serde_json::json!(null)), Value::Null);
    }

    #[test]
    fn test_key_unifies_integral_float_and_nulls() {
        assert_eq!(Value::Int(3).key(), Value::Float(3.0).key());
        assert_ne!(Value::Int(3).key(), Value::Float(3.5).key());
        assert_eq!(Value::Null.key(), Value::Float(f64::NAN).key());
        assert_ne!(Value::Text("3".into()).key(), Value::Int(3).key());
    }

    #[test]
    fn test_push_row_pads_short_rows() {
        let mut table = Table::new(vec!["a".into(), "b".into(), "c".into()]);
        table.push_row(vec![Value::Int(1)]);
        assert_eq!(table.rows[0], vec![Value::Int(1), Value::Null, Value::Null]);
    }

    #[test]
    fn test_ensure_column_appends_nulls() {
        let mut table = Table::new(vec!["a".into()]);
        table.push_row(vec![Value::Int(1)]);
        let idx = table.ensure_column("b");
        assert_eq!(idx, 1);
        assert_eq!(table.get(0, "b"), Some(&Value::Null));
        assert_eq!(table.ensure_column("a"), 0);
    }

    #[test]
    fn test_display_timestamp_without_fraction() {
        let ts = DateTime::parse_from_rfc3339("2025-01-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Value::Timestamp(ts).to_string(), "2025-01-05 10:00:00");
    }
}
