use std::path::PathBuf;
use thiserror::Error;

/// All errors produced while extracting and transforming telecom usage files.
#[derive(Error, Debug)]
pub enum EtlError {
    /// The list of source files handed to the extractor was empty.
    #[error("The list of file paths is empty")]
    EmptyInput,

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file extension does not map to a supported reader.
    #[error("Unsupported file format '{extension}' for {path}; expected csv, xlsx/xls, or json")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// A comma-separated file could not be parsed.
    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    /// A spreadsheet workbook could not be opened or has no readable sheet.
    #[error("Failed to read spreadsheet: {0}")]
    Spreadsheet(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the telco crates.
pub type Result<T> = std::result::Result<T, EtlError>;
