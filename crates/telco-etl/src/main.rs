mod bootstrap;

use anyhow::Result;
use telco_core::settings::{DbConfig, Settings};
use telco_core::status::StatusLevel;
use telco_runtime::intake::{check_raw_dir, cleanup_raw_files, REQUIRED_FILES};
use telco_runtime::{EtlPipeline, PipelineConfig, PipelineReport};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load();

    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;
    bootstrap::ensure_directories(&settings.raw_dir, &settings.processed_dir)?;

    tracing::info!("telco-etl v{} starting", env!("CARGO_PKG_VERSION"));

    let db = DbConfig::from_settings(&settings)?;
    tracing::info!("Usage store: {}", db.redacted());

    // The default run expects exactly the required uploads in the raw directory.
    if !settings.discover && settings.files.is_empty() {
        let check = check_raw_dir(&settings.raw_dir, &REQUIRED_FILES);
        let message = check.message();
        if !check.is_ready() {
            eprintln!("{}", message);
            anyhow::bail!("raw directory {} is not ready", settings.raw_dir.display());
        }
        println!("{}", message);
    }

    let mut config = PipelineConfig::new(&settings.raw_dir)
        .with_processed_dir(&settings.processed_dir);
    config = if settings.discover {
        config.discover()
    } else {
        config.with_files(settings.source_files())
    };
    let sources = config.source_paths();

    let pipeline = EtlPipeline::new(config, db);
    let report = tokio::task::spawn_blocking(move || pipeline.run()).await?;

    print_report(&report);

    if report.is_success() && settings.cleanup {
        for message in cleanup_raw_files(&sources) {
            println!("{}", message);
        }
    }

    match report.outcome {
        Ok(_) => Ok(()),
        Err(failure) => Err(failure.into()),
    }
}

fn print_report(report: &PipelineReport) {
    // Success and error outcomes are rendered once, below, from the latest one.
    for message in &report.messages {
        match message.level {
            StatusLevel::Warn => eprintln!("{}", message),
            StatusLevel::Info => println!("{}", message),
            StatusLevel::Error | StatusLevel::Success => {}
        }
    }

    if let Some(summary) = report.summary() {
        println!(
            "files: {} ({} failed)  rows extracted: {}  cleaned usage rows: {}",
            summary.files, summary.files_failed, summary.rows_extracted, summary.cleaned_usage_rows
        );
        println!(
            "daily rows: {}  total usage: {:.2} MB  inserted: {}  swept: {}",
            summary.daily_rows,
            summary.total_usage_mb,
            summary.load.rows_inserted,
            summary.load.rows_swept
        );
        if let Some(path) = &summary.aggregate_path {
            println!("daily usage written to {}", path.display());
        }
    }

    match report.final_status() {
        Some(status) if status.level == StatusLevel::Error => eprintln!("{}", status),
        Some(status) => println!("{}", status),
        None => {}
    }

    println!(
        "[pipeline] Finished ETL at {} (duration: {:.1}s)",
        report.finished_at.to_rfc3339(),
        report.duration.as_secs_f64()
    );
}
