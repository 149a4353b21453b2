//! The consolidated score table handed back to the pose registry.
//!
//! One row per successful scoring invocation, indexed by the stable
//! `description` identifier. The table persists as CSV or JSON-lines; the
//! persisted file doubles as the completion marker of a pipeline stage.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Canonical column: verbatim `decoy` value of the originating record.
pub const RAW_DESCRIPTION: &str = "raw_description";
/// Canonical column: stable unique identifier, `{basename}_{ordinal}`.
pub const DESCRIPTION: &str = "description";
/// Canonical column: absolute path of the reindexed artifact.
pub const LOCATION: &str = "location";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to access score table '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read/write CSV score table '{path}': {source}", path = path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to parse JSON score table '{path}': {source}", path = path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk representation of a [`ScoreTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Csv,
    Json,
}

impl StorageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Csv => "csv",
            StorageFormat::Json => "json",
        }
    }
}

/// One consolidated row: the record's passthrough fields plus the canonical
/// `raw_description` / `description` / `location` columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreRow {
    fields: BTreeMap<String, Value>,
}

impl ScoreRow {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn description(&self) -> Option<&str> {
        self.str_field(DESCRIPTION)
    }

    pub fn raw_description(&self) -> Option<&str> {
        self.str_field(RAW_DESCRIPTION)
    }

    pub fn location(&self) -> Option<&str> {
        self.str_field(LOCATION)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Densely indexed collection of score rows with a column set that is the
/// union of all row fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreTable {
    rows: Vec<ScoreRow>,
}

impl ScoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ScoreRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ScoreRow] {
        &self.rows
    }

    pub fn get(&self, description: &str) -> Option<&ScoreRow> {
        self.rows.iter().find(|r| r.description() == Some(description))
    }

    /// Column union over all rows, with the canonical columns first.
    pub fn columns(&self) -> Vec<String> {
        let mut keys: BTreeSet<&str> = self
            .rows
            .iter()
            .flat_map(|r| r.fields.keys().map(String::as_str))
            .collect();
        let mut columns = Vec::with_capacity(keys.len());
        for canonical in [RAW_DESCRIPTION, DESCRIPTION, LOCATION] {
            if keys.remove(canonical) {
                columns.push(canonical.to_string());
            }
        }
        columns.extend(keys.into_iter().map(str::to_string));
        columns
    }

    pub fn save(&self, path: &Path, format: StorageFormat) -> Result<(), TableError> {
        match format {
            StorageFormat::Csv => self.save_csv(path),
            StorageFormat::Json => self.save_json(path),
        }
    }

    pub fn load(path: &Path, format: StorageFormat) -> Result<Self, TableError> {
        match format {
            StorageFormat::Csv => Self::load_csv(path),
            StorageFormat::Json => Self::load_json(path),
        }
    }

    /// Completion-marker check: returns the previously persisted table when it
    /// exists, parses and recomputation is not forced. An unreadable marker is
    /// treated as absent so the stage recomputes instead of failing.
    pub fn load_existing(path: &Path, format: StorageFormat, overwrite: bool) -> Option<Self> {
        if overwrite || !path.is_file() {
            return None;
        }
        match Self::load(path, format) {
            Ok(table) => Some(table),
            Err(e) => {
                warn!(
                    "Ignoring unreadable score table at '{}', recomputing: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    fn save_csv(&self, path: &Path) -> Result<(), TableError> {
        let columns = self.columns();
        let mut writer = csv::Writer::from_path(path).map_err(|e| TableError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        let csv_err = |e| TableError::Csv {
            path: path.to_path_buf(),
            source: e,
        };
        writer.write_record(&columns).map_err(csv_err)?;
        for row in &self.rows {
            let cells: Vec<String> = columns.iter().map(|c| cell_text(row.get(c))).collect();
            writer.write_record(&cells).map_err(csv_err)?;
        }
        writer.flush().map_err(|e| TableError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn load_csv(path: &Path) -> Result<Self, TableError> {
        let csv_err = |e| TableError::Csv {
            path: path.to_path_buf(),
            source: e,
        };
        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let headers = reader.headers().map_err(csv_err)?.clone();
        let mut table = Self::new();
        for result in reader.records() {
            let record = result.map_err(csv_err)?;
            let mut fields = BTreeMap::new();
            for (header, cell) in headers.iter().zip(record.iter()) {
                if cell.is_empty() {
                    continue;
                }
                fields.insert(header.to_string(), cell_value(cell));
            }
            table.push(ScoreRow::new(fields));
        }
        Ok(table)
    }

    fn save_json(&self, path: &Path) -> Result<(), TableError> {
        let io_err = |e| TableError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        for row in &self.rows {
            let line = serde_json::to_string(&row.fields).map_err(|e| TableError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
            writeln!(file, "{}", line).map_err(io_err)?;
        }
        file.flush().map_err(io_err)
    }

    fn load_json(path: &Path) -> Result<Self, TableError> {
        let content = std::fs::read_to_string(path).map_err(|e| TableError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut table = Self::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let fields: BTreeMap<String, Value> =
                serde_json::from_str(line).map_err(|e| TableError::Json {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            table.push(ScoreRow::new(fields));
        }
        Ok(table)
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

fn cell_value(cell: &str) -> Value {
    // Numbers and booleans survive the CSV round trip; everything else is
    // kept as a string.
    serde_json::from_str(cell).unwrap_or_else(|_| Value::String(cell.to_string()))
}
