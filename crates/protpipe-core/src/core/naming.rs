//! Decoy-name grammar shared by record discovery, artifact renaming and
//! command templating.
//!
//! External scoring tools tag every invocation with a replica prefix
//! `r{ordinal:04}_` and write one record file per invocation named
//! `r{ordinal:04}_{basename}_score.json` next to a raw artifact
//! `r{ordinal:04}_{basename}.{ext}`. The `decoy` field inside a record holds
//! the same compound name, with or without the leading `r` marker. The stable
//! identifier for a row moves the ordinal to the end: `{basename}_{ordinal}`.

use thiserror::Error;

/// Suffix of per-invocation record files.
pub const RECORD_SUFFIX: &str = "_score.json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("decoy name is empty")]
    Empty,
    #[error("decoy name '{raw}' has no basename tokens after the ordinal")]
    MissingBasename { raw: String },
    #[error("decoy name '{raw}' has no digits in its ordinal token")]
    InvalidOrdinal { raw: String },
}

/// A parsed compound invocation name: `[marker]{ordinal}_{basename}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoyName {
    ordinal: String,
    basename: String,
}

impl DecoyName {
    /// Parses a raw decoy string.
    ///
    /// The first underscore-delimited token is the ordinal; any leading
    /// non-digit marker characters (the `r` of the replica prefix) are
    /// stripped from it. All remaining tokens, joined by `_`, form the
    /// basename.
    pub fn parse(raw: &str) -> Result<Self, NamingError> {
        if raw.is_empty() {
            return Err(NamingError::Empty);
        }
        let mut tokens = raw.split('_');
        let first = tokens.next().unwrap_or("");
        let ordinal = first.trim_start_matches(|c: char| !c.is_ascii_digit());
        if ordinal.is_empty() {
            return Err(NamingError::InvalidOrdinal {
                raw: raw.to_string(),
            });
        }
        let basename = tokens.collect::<Vec<_>>().join("_");
        if basename.is_empty() {
            return Err(NamingError::MissingBasename {
                raw: raw.to_string(),
            });
        }
        Ok(Self {
            ordinal: ordinal.to_string(),
            basename,
        })
    }

    pub fn ordinal(&self) -> &str {
        &self.ordinal
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// The stable, sortable identifier: `{basename}_{ordinal}`.
    pub fn canonical(&self) -> String {
        format!("{}_{}", self.basename, self.ordinal)
    }
}

/// Replica prefix prepended by the external tool to all of its outputs,
/// `r{i:04}_` with `i` counted from 1.
pub fn replica_prefix(i: u32) -> String {
    format!("r{:04}_", i)
}

/// File name of the record written by replica `i` against the pose `stem`.
pub fn record_file_name(i: u32, stem: &str) -> String {
    format!("r{:04}_{}{}", i, stem, RECORD_SUFFIX)
}

/// Matches `r{ordinal}_{basename}_score.json` file names produced by scoring
/// invocations and returns the embedded decoy name.
pub fn record_decoy(file_name: &str) -> Option<DecoyName> {
    let stem = file_name.strip_suffix(RECORD_SUFFIX)?;
    if !has_replica_marker(stem) {
        return None;
    }
    DecoyName::parse(stem).ok()
}

/// Matches raw (not yet reindexed) artifact names `r{ordinal}_{basename}.{ext}`
/// and returns the embedded decoy name. Reindexed artifacts
/// (`{basename}_{ordinal}.{ext}`) do not match because they lack the `r`
/// marker in front of the ordinal.
pub fn raw_artifact_decoy(file_name: &str, ext: &str) -> Option<DecoyName> {
    let stem = file_name.strip_suffix(&format!(".{}", ext))?;
    if stem.ends_with(RECORD_SUFFIX.trim_end_matches(".json")) {
        return None;
    }
    if !has_replica_marker(stem) {
        return None;
    }
    DecoyName::parse(stem).ok()
}

fn has_replica_marker(stem: &str) -> bool {
    let mut chars = stem.chars();
    chars.next() == Some('r') && chars.next().is_some_and(|c| c.is_ascii_digit())
}
