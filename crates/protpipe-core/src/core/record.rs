//! Per-invocation score records.
//!
//! Every external scoring invocation writes one flat JSON document with
//! arbitrary metric fields plus the mandatory `decoy` key naming the
//! invocation that produced it.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key every record must carry to be attributable to an invocation.
pub const DECOY_KEY: &str = "decoy";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read record file '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse record file '{path}': {source}", path = path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("record file '{path}' is not a flat JSON object", path = path.display())]
    NotAnObject { path: PathBuf },
    #[error("record file '{path}' is missing the '{DECOY_KEY}' key", path = path.display())]
    MissingDecoy { path: PathBuf },
    #[error("record file '{path}' has a non-string '{DECOY_KEY}' value", path = path.display())]
    DecoyNotString { path: PathBuf },
}

/// One parsed record file: a flat key/value map with a guaranteed string
/// `decoy` field.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    fields: BTreeMap<String, Value>,
}

impl ScoreRecord {
    pub fn from_path(path: &Path) -> Result<Self, RecordError> {
        let content = std::fs::read_to_string(path).map_err(|e| RecordError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let value: Value = serde_json::from_str(&content).map_err(|e| RecordError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        let Value::Object(map) = value else {
            return Err(RecordError::NotAnObject {
                path: path.to_path_buf(),
            });
        };
        let fields: BTreeMap<String, Value> = map.into_iter().collect();
        match fields.get(DECOY_KEY) {
            None => Err(RecordError::MissingDecoy {
                path: path.to_path_buf(),
            }),
            Some(Value::String(_)) => Ok(Self { fields }),
            Some(_) => Err(RecordError::DecoyNotString {
                path: path.to_path_buf(),
            }),
        }
    }

    /// The raw compound invocation name, verbatim from the file.
    pub fn decoy(&self) -> &str {
        match self.fields.get(DECOY_KEY) {
            Some(Value::String(s)) => s,
            // Guaranteed string by from_path.
            _ => unreachable!("decoy key validated at parse time"),
        }
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn from_path_parses_flat_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "r0001_foo_score.json",
            r#"{"decoy":"0001_foo","rmsd":1.2,"total_score":-301.5}"#,
        );
        let record = ScoreRecord::from_path(&path).unwrap();
        assert_eq!(record.decoy(), "0001_foo");
        let fields = record.into_fields();
        assert_eq!(fields["rmsd"], Value::from(1.2));
        assert_eq!(fields["total_score"], Value::from(-301.5));
    }

    #[test]
    fn from_path_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "bad.json", "{not json");
        assert!(matches!(
            ScoreRecord::from_path(&path),
            Err(RecordError::Json { .. })
        ));
    }

    #[test]
    fn from_path_rejects_non_object_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "arr.json", "[1, 2, 3]");
        assert!(matches!(
            ScoreRecord::from_path(&path),
            Err(RecordError::NotAnObject { .. })
        ));
    }

    #[test]
    fn from_path_requires_string_decoy() {
        let dir = tempfile::tempdir().unwrap();
        let missing = write(&dir, "missing.json", r#"{"rmsd":1.2}"#);
        assert!(matches!(
            ScoreRecord::from_path(&missing),
            Err(RecordError::MissingDecoy { .. })
        ));
        let numeric = write(&dir, "numeric.json", r#"{"decoy":7}"#);
        assert!(matches!(
            ScoreRecord::from_path(&numeric),
            Err(RecordError::DecoyNotString { .. })
        ));
    }

    #[test]
    fn missing_file_reports_io_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = ScoreRecord::from_path(&path).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
