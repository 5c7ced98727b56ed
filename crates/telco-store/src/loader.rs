//! Idempotent loading of the cleaned `usage` dataset.
//!
//! One call runs a single `BEGIN IMMEDIATE` transaction:
//!
//! 1. create the `USAGE` table (or add columns it lacks);
//! 2. insert the batch, skipping rows whose key is already persisted;
//! 3. sweep duplicate keys left over from earlier data, keeping the row with
//!    the smallest `rowid`;
//! 4. create the unique index over (msisdn, session_id, timestamp).
//!
//! Any failure rolls the whole transaction back. `BEGIN IMMEDIATE` takes the
//! database write lock before step 1, so two loads against the same file run
//! one after the other.

use std::collections::{BTreeMap, HashSet};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Transaction, TransactionBehavior};
use telco_core::models::{
    CleanedDataset, Table, Value, COL_MSISDN, COL_SESSION_ID, COL_TIMESTAMP, USAGE_SOURCE,
};
use thiserror::Error;
use tracing::{error, info};

use crate::store::{quote_ident, StoreError, UsageStore, USAGE_TABLE, USAGE_UNIQUE_INDEX};

/// Columns forming the persisted row identity.
pub const KEY_COLUMNS: [&str; 3] = [COL_MSISDN, COL_SESSION_ID, COL_TIMESTAMP];

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("usage batch has no '{0}' column")]
    MissingKeyColumn(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for LoadError {
    fn from(e: rusqlite::Error) -> Self {
        LoadError::Store(StoreError::Sqlite(e))
    }
}

// ── LoadSummary ───────────────────────────────────────────────────────────────

/// What a load did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// `true` when there was no usage data and nothing was written.
    pub skipped: bool,
    /// Rows in the cleaned batch.
    pub rows_offered: usize,
    /// Rows dropped from the batch for repeating a key within it.
    pub batch_duplicates: usize,
    /// Rows actually written.
    pub rows_inserted: usize,
    /// Previously persisted duplicates removed by the sweep.
    pub rows_swept: usize,
}

impl LoadSummary {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Persist the cleaned `usage` dataset from `cleaned` into `store`.
///
/// Absent or empty usage data is a no-op. Errors are logged and returned; the
/// store is left exactly as it was before the call.
pub fn load_usage(
    store: &mut UsageStore,
    cleaned: &BTreeMap<String, CleanedDataset>,
) -> Result<LoadSummary, LoadError> {
    info!("Starting data loading into the database");

    let Some(usage) = cleaned.get(USAGE_SOURCE) else {
        info!("No usage dataset in cleaned data; skipping load");
        return Ok(LoadSummary::skipped());
    };
    if usage.table.is_empty() {
        info!("No usage data to load; skipping");
        return Ok(LoadSummary::skipped());
    }

    let result = load_table(store, &usage.table);
    match &result {
        Ok(summary) => info!(
            inserted = summary.rows_inserted,
            swept = summary.rows_swept,
            batch_duplicates = summary.batch_duplicates,
            "Data loading complete"
        ),
        Err(e) => error!(
            error = %e,
            rows = usage.table.len(),
            "Error inserting usage data; transaction rolled back"
        ),
    }
    result
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn load_table(store: &mut UsageStore, table: &Table) -> Result<LoadSummary, LoadError> {
    let key_idx = key_indices(table)?;
    let batch = dedup_batch(table, key_idx);

    let mut summary = LoadSummary {
        rows_offered: table.len(),
        batch_duplicates: table.len() - batch.len(),
        ..LoadSummary::default()
    };

    let tx = store
        .connection_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;

    ensure_table(&tx, table)?;
    summary.rows_inserted = insert_rows(&tx, &table.columns, &batch)?;
    summary.rows_swept = sweep_duplicates(&tx)?;
    tx.execute(
        &format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (msisdn, session_id, \"timestamp\")",
            quote_ident(USAGE_UNIQUE_INDEX),
            quote_ident(USAGE_TABLE)
        ),
        [],
    )?;

    tx.commit()?;
    Ok(summary)
}

fn key_indices(table: &Table) -> Result<[usize; 3], LoadError> {
    let mut indices = [0usize; 3];
    for (slot, name) in indices.iter_mut().zip(KEY_COLUMNS) {
        *slot = table
            .column_index(name)
            .ok_or(LoadError::MissingKeyColumn(name))?;
    }
    Ok(indices)
}

/// First occurrence of each key, in batch order.
fn dedup_batch(table: &Table, key_idx: [usize; 3]) -> Vec<&Vec<Value>> {
    let mut seen = HashSet::new();
    table
        .rows
        .iter()
        .filter(|row| seen.insert(key_idx.map(|i| row[i].key())))
        .collect()
}

fn ensure_table(tx: &Transaction<'_>, table: &Table) -> Result<(), LoadError> {
    let definitions: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| format!("{} {}", quote_ident(name), column_affinity(table, idx)))
        .collect();
    tx.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(USAGE_TABLE),
            definitions.join(", ")
        ),
        [],
    )?;

    let existing: HashSet<String> = {
        let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", quote_ident(USAGE_TABLE)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        names
    };

    for (idx, name) in table.columns.iter().enumerate() {
        if !existing.contains(name) {
            info!("Adding column '{}' to {}", name, USAGE_TABLE);
            tx.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(USAGE_TABLE),
                    quote_ident(name),
                    column_affinity(table, idx)
                ),
                [],
            )?;
        }
    }
    Ok(())
}

/// Returns the number of rows written; rows whose key already exists are
/// skipped once the unique index is in place.
fn insert_rows(
    tx: &Transaction<'_>,
    columns: &[String],
    rows: &[&Vec<Value>],
) -> Result<usize, LoadError> {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        quote_ident(USAGE_TABLE),
        column_list.join(", "),
        placeholders.join(", ")
    ))?;

    let mut inserted = 0;
    for row in rows {
        inserted += stmt.execute(params_from_iter(row.iter().map(to_sql_value)))?;
    }
    Ok(inserted)
}

/// Delete all but the lowest-`rowid` row of each key.
fn sweep_duplicates(tx: &Transaction<'_>) -> Result<usize, LoadError> {
    let table = quote_ident(USAGE_TABLE);
    let swept = tx.execute(
        &format!(
            "DELETE FROM {table} WHERE rowid NOT IN (\
                SELECT MIN(rowid) FROM {table} GROUP BY msisdn, session_id, \"timestamp\"\
            )"
        ),
        [],
    )?;
    Ok(swept)
}

/// SQLite affinity for a column, from the values it holds in this batch.
fn column_affinity(table: &Table, idx: usize) -> &'static str {
    let mut integral = true;
    let mut numeric = true;
    let mut any = false;
    for value in table.rows.iter().map(|r| &r[idx]).filter(|v| !v.is_null()) {
        any = true;
        match value {
            Value::Int(_) | Value::Bool(_) => {}
            Value::Float(_) => integral = false,
            _ => {
                integral = false;
                numeric = false;
            }
        }
    }
    match (any, integral, numeric) {
        (true, true, _) => "INTEGER",
        (true, false, true) => "REAL",
        _ => "TEXT",
    }
}

pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) if f.is_nan() => SqlValue::Null,
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(_) => SqlValue::Text(value.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn ts(s: &str) -> Value {
        Value::Timestamp(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc))
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn usage_map(rows: Vec<Vec<Value>>) -> BTreeMap<String, CleanedDataset> {
        let mut table = Table::new(
            ["msisdn", "session_id", "timestamp", "total_usage_mb"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        );
        for row in rows {
            table.push_row(row);
        }
        let mut map = BTreeMap::new();
        map.insert(
            USAGE_SOURCE.to_string(),
            CleanedDataset {
                source: USAGE_SOURCE.to_string(),
                table,
            },
        );
        map
    }

    fn row(msisdn: i64, session: &str, when: &str, total: f64) -> Vec<Value> {
        vec![Value::Int(msisdn), text(session), ts(when), Value::Float(total)]
    }

    fn raw_exec(store: &mut UsageStore, sql: &str) {
        store.connection_mut().execute_batch(sql).unwrap();
    }

    // ── skipping ──────────────────────────────────────────────────────────────

    #[test]
    fn test_absent_usage_is_noop() {
        let mut store = UsageStore::open_in_memory().unwrap();
        let summary = load_usage(&mut store, &BTreeMap::new()).unwrap();
        assert!(summary.skipped);
        assert!(!store.has_usage_table().unwrap());
    }

    #[test]
    fn test_empty_usage_is_noop() {
        let mut store = UsageStore::open_in_memory().unwrap();
        let summary = load_usage(&mut store, &usage_map(vec![])).unwrap();
        assert!(summary.skipped);
        assert_eq!(store.row_count().unwrap(), 0);
    }

    // ── insert ────────────────────────────────────────────────────────────────

    #[test]
    fn test_first_load_creates_table_and_index() {
        let mut store = UsageStore::open_in_memory().unwrap();
        let data = usage_map(vec![
            row(1, "A", "2025-01-05T10:00:00Z", 15.0),
            row(1, "B", "2025-01-05T11:00:00Z", 4.0),
        ]);

        let summary = load_usage(&mut store, &data).unwrap();

        assert_eq!(summary.rows_inserted, 2);
        assert_eq!(summary.rows_swept, 0);
        assert_eq!(store.row_count().unwrap(), 2);
        assert!(store.has_unique_index().unwrap());
        assert_eq!(
            store.usage_columns().unwrap(),
            vec!["msisdn", "session_id", "timestamp", "total_usage_mb"]
        );
        assert_eq!(
            store.keys().unwrap()[0],
            ("1".to_string(), "A".to_string(), Some("2025-01-05 10:00:00".to_string()))
        );
    }

    #[test]
    fn test_batch_duplicates_removed_before_insert() {
        let mut store = UsageStore::open_in_memory().unwrap();
        let data = usage_map(vec![
            row(1, "A", "2025-01-05T10:00:00Z", 15.0),
            row(1, "A", "2025-01-05T10:00:00Z", 99.0),
        ]);

        let summary = load_usage(&mut store, &data).unwrap();

        assert_eq!(summary.rows_offered, 2);
        assert_eq!(summary.batch_duplicates, 1);
        assert_eq!(summary.rows_inserted, 1);
        assert_eq!(store.row_count().unwrap(), 1);
    }

    #[test]
    fn test_load_twice_is_idempotent() {
        let mut store = UsageStore::open_in_memory().unwrap();
        let data = usage_map(vec![
            row(1, "A", "2025-01-05T10:00:00Z", 15.0),
            row(2, "B", "2025-01-06T10:00:00Z", 3.0),
            vec![Value::Int(3), text("C"), Value::Null, Value::Float(1.0)],
        ]);

        load_usage(&mut store, &data).unwrap();
        let once = store.keys().unwrap();

        let second = load_usage(&mut store, &data).unwrap();
        let twice = store.keys().unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.row_count().unwrap(), 3);
        assert_eq!(second.rows_inserted, 1);
        assert_eq!(second.rows_swept, 1);
    }

    #[test]
    fn test_overlapping_batch_adds_only_new_keys() {
        let mut store = UsageStore::open_in_memory().unwrap();
        load_usage(&mut store, &usage_map(vec![row(1, "A", "2025-01-05T10:00:00Z", 15.0)]))
            .unwrap();

        let summary = load_usage(
            &mut store,
            &usage_map(vec![
                row(1, "A", "2025-01-05T10:00:00Z", 15.0),
                row(1, "B", "2025-01-05T12:00:00Z", 2.0),
            ]),
        )
        .unwrap();

        assert_eq!(summary.rows_inserted, 1);
        assert_eq!(store.row_count().unwrap(), 2);
    }

    // ── sweep ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_sweep_removes_preexisting_duplicates_keeping_first() {
        let mut store = UsageStore::open_in_memory().unwrap();
        raw_exec(
            &mut store,
            "CREATE TABLE \"USAGE\" (
                msisdn INTEGER, session_id TEXT, \"timestamp\" TEXT, total_usage_mb REAL
             );
             INSERT INTO \"USAGE\" VALUES (1, 'A', '2025-01-05 10:00:00', 1.0);
             INSERT INTO \"USAGE\" VALUES (1, 'A', '2025-01-05 10:00:00', 2.0);
             INSERT INTO \"USAGE\" VALUES (1, 'A', '2025-01-05 10:00:00', 3.0);",
        );

        let summary =
            load_usage(&mut store, &usage_map(vec![row(2, "Z", "2025-01-07T10:00:00Z", 5.0)]))
                .unwrap();

        assert_eq!(summary.rows_swept, 2);
        assert_eq!(store.row_count().unwrap(), 2);
        assert!(store.has_unique_index().unwrap());

        let survivor: f64 = store
            .connection_mut()
            .query_row(
                "SELECT total_usage_mb FROM \"USAGE\" WHERE session_id = 'A'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(survivor, 1.0);
    }

    // ── schema evolution ──────────────────────────────────────────────────────

    #[test]
    fn test_new_columns_are_added() {
        let mut store = UsageStore::open_in_memory().unwrap();
        load_usage(&mut store, &usage_map(vec![row(1, "A", "2025-01-05T10:00:00Z", 1.0)])).unwrap();

        let mut wider = usage_map(vec![]);
        let usage = wider.get_mut(USAGE_SOURCE).unwrap();
        usage.table.columns.push("app_category".to_string());
        usage.table.push_row(vec![
            Value::Int(1),
            text("B"),
            ts("2025-01-05T11:00:00Z"),
            Value::Float(2.0),
            text("video"),
        ]);

        load_usage(&mut store, &wider).unwrap();

        assert!(store.usage_columns().unwrap().contains(&"app_category".to_string()));
        assert_eq!(store.row_count().unwrap(), 2);
    }

    // ── failure ───────────────────────────────────────────────────────────────

    #[test]
    fn test_missing_key_column_is_error() {
        let mut store = UsageStore::open_in_memory().unwrap();
        let mut data = usage_map(vec![row(1, "A", "2025-01-05T10:00:00Z", 1.0)]);
        data.get_mut(USAGE_SOURCE).unwrap().table.columns[1] = "session".to_string();

        let err = load_usage(&mut store, &data).unwrap_err();

        assert!(matches!(err, LoadError::MissingKeyColumn("session_id")));
        assert!(!store.has_usage_table().unwrap());
    }

    #[test]
    fn test_failed_load_rolls_back() {
        let mut store = UsageStore::open_in_memory().unwrap();
        load_usage(&mut store, &usage_map(vec![row(1, "A", "2025-01-05T10:00:00Z", 1.0)])).unwrap();
        // A trigger that rejects one specific row makes the second insert fail
        // after the first has been written inside the transaction.
        raw_exec(
            &mut store,
            "CREATE TRIGGER reject_z BEFORE INSERT ON \"USAGE\"
             WHEN NEW.session_id = 'Z'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        );

        let err = load_usage(
            &mut store,
            &usage_map(vec![
                row(2, "B", "2025-01-06T10:00:00Z", 1.0),
                row(2, "Z", "2025-01-06T11:00:00Z", 1.0),
            ]),
        );

        assert!(err.is_err());
        assert_eq!(store.row_count().unwrap(), 1);
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    #[test]
    fn test_column_affinity() {
        let mut table = Table::new(vec!["i".into(), "f".into(), "t".into(), "n".into()]);
        table.push_row(vec![Value::Int(1), Value::Int(1), text("x"), Value::Null]);
        table.push_row(vec![Value::Null, Value::Float(1.5), Value::Int(2), Value::Null]);
        assert_eq!(column_affinity(&table, 0), "INTEGER");
        assert_eq!(column_affinity(&table, 1), "REAL");
        assert_eq!(column_affinity(&table, 2), "TEXT");
        assert_eq!(column_affinity(&table, 3), "TEXT");
    }

    #[test]
    fn test_to_sql_value_timestamp_text() {
        assert_eq!(
            to_sql_value(&ts("2025-01-05T10:00:00Z")),
            SqlValue::Text("2025-01-05 10:00:00".to_string())
        );
        assert_eq!(to_sql_value(&Value::Float(f64::NAN)), SqlValue::Null);
    }

    #[test]
    fn test_concurrent_loads_on_same_file_serialize() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("telco.db");
        let data = usage_map(vec![
            row(1, "A", "2025-01-05T10:00:00Z", 15.0),
            row(2, "B", "2025-01-06T10:00:00Z", 3.0),
        ]);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let path = path.clone();
                let data = data.clone();
                scope.spawn(move || {
                    let mut store = UsageStore::open_path(&path).unwrap();
                    load_usage(&mut store, &data).unwrap();
                });
            }
        });

        let store = UsageStore::open_path(&path).unwrap();
        assert_eq!(store.row_count().unwrap(), 2);
    }
}
