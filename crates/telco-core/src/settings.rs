use clap::Parser;
use std::path::{Path, PathBuf};

use crate::error::{EtlError, Result};

/// The files the upload collaborator is expected to drop into the raw
/// directory: one per logical source.
pub const DEFAULT_SOURCE_FILES: [&str; 3] = [
    "partner_roaming.xlsx",
    "raw_usage_2025_01.csv",
    "sessions.json",
];

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Batch ETL for telecom usage, roaming and session files
#[derive(Parser, Debug, Clone)]
#[command(
    name = "telco-etl",
    about = "Batch ETL for telecom usage, roaming and session files",
    version
)]
pub struct Settings {
    /// Directory holding the raw source files
    #[arg(long, env = "TELCO_RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,

    /// Directory the daily usage aggregate is written to
    #[arg(long, env = "TELCO_PROCESSED_DIR", default_value = "data/processed")]
    pub processed_dir: PathBuf,

    /// Source file name inside the raw directory (repeatable)
    #[arg(long = "file", value_name = "NAME")]
    pub files: Vec<String>,

    /// Process every supported file found in the raw directory
    #[arg(long, conflicts_with = "files")]
    pub discover: bool,

    /// Delete the raw files after a successful run
    #[arg(long)]
    pub cleanup: bool,

    /// Database connection string (takes precedence over the discrete values)
    #[arg(long, env = "DB_CONNECTION_STRING")]
    pub db_url: Option<String>,

    /// Database host: the directory holding the database file
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    /// Database name: the database file stem
    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Database user
    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Database password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Database port
    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<u16>,

    /// Logging level
    #[arg(
        long,
        default_value = "INFO",
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"]
    )]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Parse CLI arguments (and their environment fallbacks) and resolve
    /// derived values.
    pub fn load() -> Self {
        Self::resolve(Settings::parse())
    }

    /// Same as [`Settings::load`] with an explicit argument list.
    pub fn load_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::resolve(Settings::parse_from(args))
    }

    /// `--debug` overrides the log level.
    fn resolve(mut settings: Settings) -> Settings {
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// File names to extract: the explicit `--file` list, or the defaults.
    pub fn source_files(&self) -> Vec<String> {
        if self.files.is_empty() {
            DEFAULT_SOURCE_FILES.iter().map(|s| s.to_string()).collect()
        } else {
            self.files.clone()
        }
    }
}

// ── DbConfig ───────────────────────────────────────────────────────────────────

/// A resolved database connection descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    url: String,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Build the descriptor from settings.
    ///
    /// A connection string wins. Otherwise host, database, user, password and
    /// port are all required. The store is a SQLite file: the host names the
    /// directory holding it and the database name is its file stem (`.db` is
    /// appended when the name has no extension). User, password and port
    /// have no meaning for a file database and are only checked for presence.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if let Some(url) = settings.db_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(Self::new(url.trim()));
        }

        let missing: Vec<&str> = [
            ("host", settings.db_host.is_none()),
            ("database", settings.db_name.is_none()),
            ("user", settings.db_user.is_none()),
            ("password", settings.db_password.is_none()),
            ("port", settings.db_port.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        match (
            &settings.db_host,
            &settings.db_name,
            &settings.db_user,
            &settings.db_password,
            settings.db_port,
        ) {
            (Some(host), Some(name), Some(_), Some(_), Some(_)) => {
                let mut path = Path::new(host).join(name);
                if path.extension().is_none() {
                    path.set_extension("db");
                }
                Ok(Self::new(format!("sqlite://{}", path.display())))
            }
            _ => Err(EtlError::Config(format!(
                "missing required database settings: {}",
                missing.join(", ")
            ))),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL scheme, or `None` for a bare path.
    pub fn scheme(&self) -> Option<&str> {
        self.url.split_once("://").map(|(scheme, _)| scheme).or_else(|| {
            self.url
                .strip_prefix("sqlite:")
                .map(|_| "sqlite")
        })
    }

    /// The URL with any password replaced, safe for logs.
    pub fn redacted(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        match rest.split_once('@') {
            Some((credentials, host)) => {
                let user = credentials.split(':').next().unwrap_or_default();
                format!("{}://{}:***@{}", scheme, user, host)
            }
            None => self.url.clone(),
        }
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.redacted())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
