//! Test identifier normalisation and suite-file loading.
//!
//! A suite file is a JSON document matching the backend's trigger-config
//! schema: a list of test ids with optional per-test overrides, plus an
//! optional set of overrides applied to every test in the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Override;

/// Errors surfaced while discovering or parsing suite files. Both variants
/// are fatal to the invocation (`spec.md` §7, "Parse/IO").
#[derive(Debug, thiserror::Error)]
pub enum SuiteLoadError {
    #[error("failed to read suite file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse suite file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid glob pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// One test entry inside a suite file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteTestEntry {
    pub id: String,
    #[serde(default, rename = "testOverrides")]
    pub overrides: Override,
}

/// Parsed contents of a single suite file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteFile {
    #[serde(default)]
    pub tests: Vec<SuiteTestEntry>,
    /// Overrides applied to every test in this file, before the per-test
    /// `testOverrides` are merged on top.
    #[serde(default)]
    pub global: Option<Override>,
}

/// A suite file alongside the path it was read from.
#[derive(Debug, Clone)]
pub struct LoadedSuite {
    pub name: PathBuf,
    pub content: SuiteFile,
}

/// Loads every file matching `pattern`, parsing each as a [`SuiteFile`].
///
/// An empty match set is not an error: the caller should log it through the
/// reporter (`spec.md` §4.1) and move on. A file that can't be read or
/// parsed is fatal and names the offending path.
pub fn load_suites(pattern: &str) -> Result<Vec<LoadedSuite>, SuiteLoadError> {
    let paths = glob::glob(pattern).map_err(|source| SuiteLoadError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut suites = Vec::new();
    for entry in paths {
        // A glob I/O error (e.g. permission denied walking a directory) is
        // reported against the pattern itself rather than a specific path.
        let path = entry.map_err(|e| SuiteLoadError::Io {
            path: PathBuf::from(pattern),
            source: e.into_error(),
        })?;
        suites.push(load_suite_file(&path)?);
    }
    Ok(suites)
}

fn load_suite_file(path: &Path) -> Result<LoadedSuite, SuiteLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SuiteLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content: SuiteFile = serde_json::from_str(&raw).map_err(|source| SuiteLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LoadedSuite {
        name: path.to_path_buf(),
        content,
    })
}

/// Normalises a test identifier to its `xxx-xxx-xxx` form.
///
/// If a longer identifier (e.g. a full test URL) is supplied, the suffix
/// after the last `/` is taken.
pub fn normalize_test_id(raw: &str) -> String {
    raw.rsplit('/').next().unwrap_or(raw).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_identity_for_bare_id() {
        assert_eq!(normalize_test_id("abc-def-ghi"), "abc-def-ghi");
    }

    #[test]
    fn normalize_strips_url_prefix() {
        assert_eq!(
            normalize_test_id("https://example/tests/abc-def-ghi"),
            "abc-def-ghi"
        );
    }

    #[test]
    fn parses_suite_file_with_global_and_per_test_overrides() {
        let json = r#"{
            "tests": [
                { "id": "abc-def-ghi", "testOverrides": { "startUrl": "https://x" } },
                { "id": "jkl-mno-pqr" }
            ],
            "global": { "tunnel": true }
        }"#;
        let parsed: SuiteFile = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.tests.len(), 2);
        assert_eq!(
            parsed.tests[0].overrides.start_url.as_deref(),
            Some("https://x")
        );
        assert_eq!(parsed.global.unwrap().tunnel, Some(true));
    }

    #[test]
    fn unknown_keys_in_overrides_are_discarded() {
        let json = r#"{ "tests": [ { "id": "abc-def-ghi", "testOverrides": { "wat": 1, "tunnel": true } } ] }"#;
        let parsed: SuiteFile = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.tests[0].overrides.tunnel, Some(true));
    }

    #[test]
    fn missing_file_is_fatal_io_error() {
        let err = load_suite_file(Path::new("/nonexistent/path/suite.json")).unwrap_err();
        assert!(matches!(err, SuiteLoadError::Io { .. }));
    }

    #[test]
    fn malformed_json_is_fatal_parse_error() {
        let dir = std::env::temp_dir().join(format!("synthrun-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = load_suite_file(&path).unwrap_err();
        assert!(matches!(err, SuiteLoadError::Parse { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_glob_match_returns_empty_vec() {
        let suites = load_suites("/nonexistent/**/*.synthrun-suite.json").unwrap();
        assert!(suites.is_empty());
    }
}
