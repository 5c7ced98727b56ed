//! Upload intake: validating the set of uploaded raw files before a run and
//! removing them afterwards.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use telco_core::settings::DEFAULT_SOURCE_FILES;
use telco_core::status::StatusMessage;
use telco_data::extractor::discover_raw_files;
use tracing::{debug, warn};

/// Files an upload must consist of: one per logical source.
pub const REQUIRED_FILES: [&str; 3] = DEFAULT_SOURCE_FILES;

/// Result of [`check_uploads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadCheck {
    /// Every required file is present and nothing else.
    Ready,
    /// A file outside the required set was uploaded (first one found).
    Unexpected(String),
    /// Required files that were not uploaded, in required order.
    Missing(Vec<String>),
}

impl UploadCheck {
    pub fn is_ready(&self) -> bool {
        matches!(self, UploadCheck::Ready)
    }

    /// The message the dashboard shows for this outcome.
    pub fn message(&self) -> StatusMessage {
        match self {
            UploadCheck::Ready => {
                StatusMessage::success("All required files uploaded successfully!")
            }
            UploadCheck::Unexpected(name) => StatusMessage::warn(format!(
                "Unexpected file '{}' uploaded. Please upload only the required files.",
                name
            )),
            UploadCheck::Missing(_) => StatusMessage::warn(format!(
                "Please upload all {} required files: {}",
                REQUIRED_FILES.len(),
                REQUIRED_FILES.join(", ")
            )),
        }
    }
}

/// Check uploaded file names against `required`.
///
/// Any unexpected name wins over missing files.
pub fn check_uploads<S: AsRef<str>>(names: &[S], required: &[&str]) -> UploadCheck {
    if let Some(extra) = names
        .iter()
        .map(AsRef::as_ref)
        .find(|name| !required.contains(name))
    {
        return UploadCheck::Unexpected(extra.to_string());
    }

    let present: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !present.contains(*name))
        .map(|name| name.to_string())
        .collect();

    if missing.is_empty() {
        UploadCheck::Ready
    } else {
        UploadCheck::Missing(missing)
    }
}

/// [`check_uploads`] over the supported files currently in `raw_dir`.
pub fn check_raw_dir(raw_dir: &Path, required: &[&str]) -> UploadCheck {
    let names: Vec<String> = discover_raw_files(raw_dir)
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    check_uploads(&names, required)
}

/// Delete raw files after a completed run.
///
/// Files that no longer exist are skipped. A failed deletion becomes a
/// warning; the remaining files are still attempted.
pub fn cleanup_raw_files<P: AsRef<Path>>(paths: &[P]) -> Vec<StatusMessage> {
    let mut messages = Vec::new();
    for path in paths.iter().map(AsRef::as_ref) {
        if !path.exists() {
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!("removed raw file {}", path.display()),
            Err(e) => {
                warn!("Could not delete file {}: {}", path.display(), e);
                messages.push(StatusMessage::warn(format!(
                    "Could not delete file {}: {}",
                    path.display(),
                    e
                )));
            }
        }
    }
    messages
}

/// Full paths of `names` inside `raw_dir`.
pub fn raw_paths<S: AsRef<str>>(raw_dir: &Path, names: &[S]) -> Vec<PathBuf> {
    names.iter().map(|n| raw_dir.join(n.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use telco_core::status::StatusLevel;
    use tempfile::TempDir;

    // ── check_uploads ─────────────────────────────────────────────────────────

    #[test]
    fn test_all_required_is_ready() {
        let names = ["sessions.json", "raw_usage_2025_01.csv", "partner_roaming.xlsx"];
        let check = check_uploads(&names, &REQUIRED_FILES);
        assert!(check.is_ready());
        assert_eq!(check.message().level, StatusLevel::Success);
    }

    #[test]
    fn test_unexpected_file_reported_first() {
        let names = ["sessions.json", "notes.txt"];
        let check = check_uploads(&names, &REQUIRED_FILES);
        assert_eq!(check, UploadCheck::Unexpected("notes.txt".to_string()));
        let msg = check.message();
        assert_eq!(msg.level, StatusLevel::Warn);
        assert!(msg.text.contains("'notes.txt'"));
    }

    #[test]
    fn test_missing_files_in_required_order() {
        let names = ["sessions.json"];
        let check = check_uploads(&names, &REQUIRED_FILES);
        assert_eq!(
            check,
            UploadCheck::Missing(vec![
                "partner_roaming.xlsx".to_string(),
                "raw_usage_2025_01.csv".to_string(),
            ])
        );
        assert!(check.message().text.contains("sessions.json"));
    }

    #[test]
    fn test_empty_upload_is_missing_everything() {
        let names: [&str; 0] = [];
        match check_uploads(&names, &REQUIRED_FILES) {
            UploadCheck::Missing(missing) => assert_eq!(missing.len(), 3),
            other => panic!("expected Missing, got {:?}", other),
        }
    }

    #[test]
    fn test_check_raw_dir_reads_directory() {
        let dir = TempDir::new().unwrap();
        for name in REQUIRED_FILES {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        assert!(check_raw_dir(dir.path(), &REQUIRED_FILES).is_ready());

        std::fs::remove_file(dir.path().join("sessions.json")).unwrap();
        assert_eq!(
            check_raw_dir(dir.path(), &REQUIRED_FILES),
            UploadCheck::Missing(vec!["sessions.json".to_string()])
        );

        std::fs::write(dir.path().join("extra_usage.csv"), "").unwrap();
        assert_eq!(
            check_raw_dir(dir.path(), &REQUIRED_FILES),
            UploadCheck::Unexpected("extra_usage.csv".to_string())
        );
    }

    // ── cleanup_raw_files ─────────────────────────────────────────────────────

    #[test]
    fn test_cleanup_removes_files_and_ignores_absent() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("sessions.json");
        std::fs::write(&present, "{}\n").unwrap();
        let absent = dir.path().join("raw_usage_2025_01.csv");

        let messages = cleanup_raw_files(&[&present, &absent]);

        assert!(messages.is_empty());
        assert!(!present.exists());
    }

    #[test]
    fn test_cleanup_failure_is_warning() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be removed with remove_file.
        let stubborn = dir.path().join("partner_roaming.xlsx");
        std::fs::create_dir(&stubborn).unwrap();

        let messages = cleanup_raw_files(&[&stubborn]);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].level, StatusLevel::Warn);
        assert!(messages[0].text.starts_with("Could not delete file"));
    }

    #[test]
    fn test_raw_paths_join() {
        let paths = raw_paths(Path::new("data/raw"), &REQUIRED_FILES);
        assert_eq!(paths[0], PathBuf::from("data/raw/partner_roaming.xlsx"));
    }
}
