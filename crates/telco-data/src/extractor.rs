//! Raw file extraction.
//!
//! Reads comma-separated, spreadsheet and line-delimited JSON files into
//! [`RawDataset`]s keyed by logical source name. A file that cannot be read
//! yields an empty dataset and an [`ExtractIssue`]; it never stops the other
//! files from being read.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Read};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{TimeZone, Utc};
use telco_core::error::{EtlError, Result};
use telco_core::models::{RawDataset, Table, Value, LOGICAL_SOURCES};
use telco_core::time_utils::parse_timestamp;
use tracing::{debug, info, warn};

// ── Formats ───────────────────────────────────────────────────────────────────

/// Reader selected from a file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
    JsonLines,
}

impl SourceFormat {
    /// Infer the format strictly from the extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "xlsx" | "xls" | "xlsm" | "ods" => Ok(SourceFormat::Spreadsheet),
            "json" | "jsonl" | "ndjson" => Ok(SourceFormat::JsonLines),
            _ => Err(EtlError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }
}

// ── Public types ──────────────────────────────────────────────────────────────

/// A file that failed to extract. Its dataset is present but empty.
#[derive(Debug)]
pub struct ExtractIssue {
    pub path: PathBuf,
    /// Logical source the file was routed to.
    pub source: String,
    pub error: EtlError,
}

/// Output of [`extract_all`].
#[derive(Debug, Default)]
pub struct Extraction {
    pub datasets: BTreeMap<String, RawDataset>,
    pub issues: Vec<ExtractIssue>,
}

impl Extraction {
    /// Total number of rows across all datasets.
    pub fn total_rows(&self) -> usize {
        self.datasets.values().map(|d| d.table.len()).sum()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Route a file to its logical source.
///
/// The file stem is checked for `roaming`, `usage` and `sessions` in that
/// order; the first keyword found becomes the key. Otherwise the stem itself
/// is used.
pub fn logical_source_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    LOGICAL_SOURCES
        .iter()
        .find(|keyword| stem.contains(*keyword))
        .map(|keyword| keyword.to_string())
        .unwrap_or(stem)
}

/// Extract every file in `paths` into a dataset map.
///
/// Fails only when `paths` is empty. Per-file failures are logged, recorded
/// in [`Extraction::issues`] and replaced by an empty dataset.
pub fn extract_all<P: AsRef<Path>>(paths: &[P]) -> Result<Extraction> {
    if paths.is_empty() {
        return Err(EtlError::EmptyInput);
    }

    info!("Extracting data from {} files", paths.len());
    let mut extraction = Extraction::default();

    for path in paths {
        let path = path.as_ref();
        let source = logical_source_name(path);

        let dataset = match read_table(path) {
            Ok(table) => {
                info!("Extracted {} data with {} records", source, table.len());
                RawDataset {
                    source: source.clone(),
                    path: path.to_path_buf(),
                    table,
                }
            }
            Err(error) => {
                warn!("Failed to extract {}: {}", path.display(), error);
                extraction.issues.push(ExtractIssue {
                    path: path.to_path_buf(),
                    source: source.clone(),
                    error,
                });
                RawDataset::empty(source.clone(), path)
            }
        };

        if let Some(previous) = extraction.datasets.insert(source.clone(), dataset) {
            warn!(
                "{} replaces {} as the '{}' dataset",
                path.display(),
                previous.path.display(),
                source
            );
        }
    }

    Ok(extraction)
}

/// Read a single file into a [`Table`] using the reader for its extension.
pub fn read_table(path: &Path) -> Result<Table> {
    let format = SourceFormat::from_path(path)?;
    std::fs::metadata(path).map_err(|source| EtlError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    match format {
        SourceFormat::Csv => read_csv(path),
        SourceFormat::Spreadsheet => read_spreadsheet(path),
        SourceFormat::JsonLines => read_json_lines(path),
    }
}

/// List the supported files directly inside `dir`, sorted by path.
pub fn discover_raw_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        warn!("Raw data directory does not exist: {}", dir.display());
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file() && SourceFormat::from_path(entry.path()).is_ok()
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

// ── Readers ───────────────────────────────────────────────────────────────────

fn open_file(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).map_err(|source| EtlError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}

fn read_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(open_file(path)?);

    let columns = header_names(reader.headers()?.iter().map(str::to_string));
    let mut table = Table::new(columns);

    for (line, record) in reader.records().enumerate() {
        match record {
            Ok(record) => table.push_row(record.iter().map(Value::from_text_cell).collect()),
            Err(e) => warn!("Skipping malformed row {} in {}: {}", line + 2, path.display(), e),
        }
    }

    Ok(table)
}

fn read_spreadsheet(path: &Path) -> Result<Table> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| EtlError::Spreadsheet(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| EtlError::Spreadsheet(format!("{} has no worksheets", path.display())))?
        .map_err(|e| EtlError::Spreadsheet(e.to_string()))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Table::default());
    };

    let mut table = Table::new(header_names(header.iter().map(|c| c.to_string())));
    for row in rows {
        table.push_row(row.iter().map(spreadsheet_cell).collect());
    }

    Ok(table)
}

/// Read one JSON object per line. A file whose content is a single JSON array
/// of objects is accepted too.
fn read_json_lines(path: &Path) -> Result<Table> {
    let mut reader = std::io::BufReader::new(open_file(path)?);
    let mut objects: Vec<serde_json::Map<String, serde_json::Value>> = Vec::new();

    if reader.fill_buf()?.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'[') {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        objects.extend(parsed.into_iter().filter_map(|v| match v {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        }));
        return Ok(objects_to_table(objects));
    }

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::Object(map)) => objects.push(map),
            Ok(_) => debug!(
                "Skipping non-object line {} in {}",
                line_no + 1,
                path.display()
            ),
            Err(e) => warn!(
                "Skipping malformed JSON line {} in {}: {}",
                line_no + 1,
                path.display(),
                e
            ),
        }
    }

    Ok(objects_to_table(objects))
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Columns are the union of keys in first-seen order.
fn objects_to_table(objects: Vec<serde_json::Map<String, serde_json::Value>>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for object in &objects {
        for key in object.keys() {
            if !positions.contains_key(key) {
                positions.insert(key.clone(), columns.len());
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(columns);
    for object in objects {
        let mut row = vec![Value::Null; table.columns.len()];
        for (key, json) in object {
            if let Some(&idx) = positions.get(&key) {
                row[idx] = Value::from_json(json);
            }
        }
        table.push_row(row);
    }
    table
}

/// Blank header cells are named `Unnamed: <index>`.
fn header_names(raw: impl Iterator<Item = String>) -> Vec<String> {
    raw.enumerate()
        .map(|(idx, name)| {
            if name.trim().is_empty() {
                format!("Unnamed: {}", idx)
            } else {
                name
            }
        })
        .collect()
}

/// Spreadsheets store every number as a float; integral values become ints.
fn spreadsheet_cell(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Value::Int(*f as i64),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => Value::from_text_cell(s),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|naive| Value::Timestamp(Utc.from_utc_datetime(&naive)))
            .unwrap_or(Value::Float(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => parse_timestamp(s)
            .map(Value::Timestamp)
            .unwrap_or_else(|| Value::Text(s.clone())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
