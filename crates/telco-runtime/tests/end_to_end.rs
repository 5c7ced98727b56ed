//! Extract a usage file with a duplicate and an invalid row, transform it,
//! and load it into an empty on-disk store.

use std::path::Path;

use telco_core::settings::DbConfig;
use telco_core::status::StatusLevel;
use telco_runtime::data::extractor::extract_all;
use telco_runtime::data::transform::transform;
use telco_runtime::intake::{check_uploads, cleanup_raw_files, raw_paths, REQUIRED_FILES};
use telco_runtime::store::{load_usage, UsageStore};
use telco_runtime::{EtlPipeline, PipelineConfig, RunState};
use tempfile::TempDir;

const USAGE_CSV: &str = "\
msisdn,session_id,timestamp,download_mb,upload_mb,duration_ms
1,A,2025-01-05T10:00:00,10,5,120
1,A,2025-01-05T10:00:00,10,5,120
1,B,2025-01-06T09:30:00,3,1,-5
";

const SESSIONS_JSON: &str = "\
{\"session_id\": \"A\", \"msisdn\": 1, \"app_category\": \"video\"}
{\"session_id\": \"C\", \"msisdn\": 2, \"app_category\": null}
";

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn test_stages_by_hand_yield_one_persisted_row() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "raw_usage_2025_01.csv", USAGE_CSV);

    let extraction = extract_all(&[dir.path().join("raw_usage_2025_01.csv")]).unwrap();
    let output = transform(&extraction.datasets);

    let usage = output.usage().unwrap();
    assert_eq!(usage.table.len(), 1);
    assert_eq!(usage.table.get(0, "session_id").unwrap().to_string(), "A");
    assert_eq!(usage.table.get(0, "total_usage_mb").unwrap().as_f64(), Some(15.0));

    let mut store = UsageStore::open_path(dir.path().join("telco.db")).unwrap();
    let summary = load_usage(&mut store, &output.cleaned).unwrap();
    assert_eq!(summary.rows_inserted, 1);
    assert_eq!(store.row_count().unwrap(), 1);
    assert!(store.has_unique_index().unwrap());
}

#[test]
fn test_upload_run_and_cleanup() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw");
    std::fs::create_dir_all(&raw).unwrap();
    write(&raw, "raw_usage_2025_01.csv", USAGE_CSV);
    write(&raw, "sessions.json", SESSIONS_JSON);

    let uploaded = ["raw_usage_2025_01.csv", "sessions.json"];
    assert!(!check_uploads(&uploaded, &REQUIRED_FILES).is_ready());

    // The roaming file is missing; the run still completes on the others.
    let db = DbConfig::new(format!("sqlite://{}", dir.path().join("telco.db").display()));
    let pipeline = EtlPipeline::new(
        PipelineConfig::new(&raw).with_processed_dir(dir.path().join("processed")),
        db.clone(),
    );
    let report = pipeline.run();

    assert_eq!(report.state, RunState::Completed);
    assert!(report.finished_at >= report.started_at);
    let summary = report.summary().unwrap();
    assert_eq!(summary.files_failed, 1);
    assert_eq!(summary.load.rows_inserted, 1);
    assert_eq!(report.daily_usage.len(), 1);
    assert!(dir.path().join("processed").join("daily_usage.csv").exists());
    assert!(report.messages.iter().any(|m| m.level == StatusLevel::Warn));

    let again = pipeline.run();
    assert!(again.is_success());
    assert_eq!(UsageStore::open(&db).unwrap().row_count().unwrap(), 1);

    let warnings = cleanup_raw_files(&raw_paths(&raw, &REQUIRED_FILES));
    assert!(warnings.is_empty());
    assert!(!raw.join("raw_usage_2025_01.csv").exists());
    assert!(!raw.join("sessions.json").exists());
}
