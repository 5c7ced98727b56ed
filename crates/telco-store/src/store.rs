//! The durable usage store.
//!
//! [`UsageStore`] owns one SQLite connection. It is opened from a
//! [`DbConfig`] by a [`ConnectionProvider`] and closed when dropped, so a
//! caller that holds it in a scope releases it on every exit path.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};
use telco_core::settings::DbConfig;
use thiserror::Error;
use tracing::debug;

/// Table holding persisted usage rows.
pub const USAGE_TABLE: &str = "USAGE";

/// Unique index over (msisdn, session_id, timestamp).
pub const USAGE_UNIQUE_INDEX: &str = "idx_usage_msisdn_session_ts";

/// How long a writer waits for another writer's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported database scheme '{0}'; this build persists to sqlite")]
    UnsupportedScheme(String),
}

// ── ConnectionProvider ────────────────────────────────────────────────────────

/// Supplies a ready-to-use store handle for one pipeline run.
pub trait ConnectionProvider: Send + Sync {
    fn connect(&self) -> Result<UsageStore, StoreError>;

    /// Human-readable target for logs. Must not contain credentials.
    fn describe(&self) -> String;
}

impl ConnectionProvider for DbConfig {
    fn connect(&self) -> Result<UsageStore, StoreError> {
        UsageStore::open(self)
    }

    fn describe(&self) -> String {
        self.redacted()
    }
}

// ── UsageStore ────────────────────────────────────────────────────────────────

pub struct UsageStore {
    conn: Connection,
}

impl UsageStore {
    /// Open the store named by `config`.
    ///
    /// Accepts `sqlite://<path>`, `sqlite:<path>`, `sqlite::memory:` and bare
    /// filesystem paths.
    pub fn open(config: &DbConfig) -> Result<Self, StoreError> {
        let url = config.url();
        let target = match config.scheme() {
            None => url,
            Some("sqlite") => url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .unwrap_or(url),
            Some(other) => return Err(StoreError::UnsupportedScheme(other.to_string())),
        };

        if target == ":memory:" {
            Self::open_in_memory()
        } else {
            Self::open_path(target)
        }
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!("opening usage store at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Whether the usage table has been created.
    pub fn has_usage_table(&self) -> Result<bool, StoreError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [USAGE_TABLE],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Whether the uniqueness constraint has been installed.
    pub fn has_unique_index(&self) -> Result<bool, StoreError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?1",
                [USAGE_UNIQUE_INDEX],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of persisted usage rows (0 before the first load).
    pub fn row_count(&self) -> Result<u64, StoreError> {
        if !self.has_usage_table()? {
            return Ok(0);
        }
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(USAGE_TABLE)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Column names of the usage table, in table order.
    pub fn usage_columns(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(USAGE_TABLE)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Every persisted (msisdn, session_id, timestamp) triple, rendered as
    /// text and sorted.
    pub fn keys(&self) -> Result<Vec<(String, String, Option<String>)>, StoreError> {
        if !self.has_usage_table()? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT CAST(msisdn AS TEXT), CAST(session_id AS TEXT), \"timestamp\" \
             FROM {} ORDER BY 1, 2, 3",
            quote_ident(USAGE_TABLE)
        ))?;
        let keys = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
