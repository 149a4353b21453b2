//! Scored-output reconciliation.
//!
//! After a scoring batch completes, the working directory holds one record
//! file and one raw artifact per invocation, independently written and
//! possibly still flushing. The reconciler merges the records into one
//! consolidated [`ScoreTable`] with a unique `description` per row, waits
//! (bounded) for the artifacts to converge on disk, renames every artifact to
//! its row's identifier and points the row's `location` at the result.
//!
//! Renaming is destructive and deliberately not idempotent: records and raw
//! artifacts are consumed exactly once, so a second pass over an unchanged
//! directory finds nothing and returns an empty table.

use crate::core::naming::{self, DecoyName};
use crate::core::record::{DECOY_KEY, ScoreRecord};
use crate::core::table::{DESCRIPTION, LOCATION, RAW_DESCRIPTION, ScoreRow, ScoreTable};
use crate::engine::error::ReconcileError;
use crate::engine::retry::RetryPolicy;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Consolidated table, one densely indexed row per usable record.
    pub table: ScoreTable,
    /// Record files that were skipped (unreadable, malformed decoy, or
    /// duplicate of an earlier record). Their artifacts are still reindexed
    /// by the sweep pass.
    pub skipped: Vec<PathBuf>,
}

/// Merges per-invocation score records and artifacts in a working directory
/// into a consolidated table and a canonically named artifact set.
#[derive(Debug, Clone)]
pub struct Reconciler {
    work_dir: PathBuf,
    artifact_ext: String,
    barrier: RetryPolicy,
}

struct PendingRow {
    record_path: PathBuf,
    raw: String,
    name: DecoyName,
    row: ScoreRow,
}

impl Reconciler {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            artifact_ext: "pdb".to_string(),
            barrier: RetryPolicy::default(),
        }
    }

    pub fn with_artifact_ext(mut self, ext: impl Into<String>) -> Self {
        self.artifact_ext = ext.into();
        self
    }

    pub fn with_barrier(mut self, policy: RetryPolicy) -> Self {
        self.barrier = policy;
        self
    }

    /// Runs the full reconciliation pass over the working directory.
    ///
    /// Zero discovered record files is not an error: it yields an empty
    /// table, which is what a re-run against an already reconciled directory
    /// produces.
    #[instrument(skip_all, fields(work_dir = %self.work_dir.display()))]
    pub fn collect(&self) -> Result<Reconciliation, ReconcileError> {
        let work_dir = std::fs::canonicalize(&self.work_dir).map_err(|e| ReconcileError::Scan {
            work_dir: self.work_dir.clone(),
            source: e,
        })?;
        let ext = self.artifact_ext.as_str();

        let mut record_names: Vec<String> = scan_file_names(&work_dir)
            .map_err(|e| ReconcileError::Scan {
                work_dir: work_dir.clone(),
                source: e,
            })?
            .into_iter()
            .filter(|name| naming::record_decoy(name).is_some())
            .collect();
        // Directory order is arbitrary; sort so row order is reproducible.
        record_names.sort();

        if record_names.is_empty() {
            warn!(
                "No score record files found in '{}'; returning an empty table",
                work_dir.display()
            );
            return Ok(Reconciliation::default());
        }

        let mut skipped = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = Vec::with_capacity(record_names.len());
        for name in record_names {
            let record_path = work_dir.join(&name);
            let record = match ScoreRecord::from_path(&record_path) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unusable record file: {}", e);
                    skipped.push(record_path);
                    continue;
                }
            };
            let raw = record.decoy().to_string();
            let decoy = match DecoyName::parse(&raw) {
                Ok(decoy) => decoy,
                Err(e) => {
                    warn!(
                        "Skipping record file '{}' with unusable decoy: {}",
                        record_path.display(),
                        e
                    );
                    skipped.push(record_path);
                    continue;
                }
            };
            let description = decoy.canonical();
            if !seen.insert(description.clone()) {
                warn!(
                    "Skipping record file '{}': duplicate description '{}'",
                    record_path.display(),
                    description
                );
                skipped.push(record_path);
                continue;
            }

            let mut fields = record.into_fields();
            fields.remove(DECOY_KEY);
            let mut row = ScoreRow::new(fields);
            row.insert(RAW_DESCRIPTION, Value::String(raw.clone()));
            row.insert(DESCRIPTION, Value::String(description));
            pending.push(PendingRow {
                record_path,
                raw,
                name: decoy,
                row,
            });
        }

        self.await_artifacts(&work_dir, pending.len())?;

        info!(
            "Renaming and reindexing {} scored '.{}' artifacts in '{}'",
            pending.len(),
            ext,
            work_dir.display()
        );
        let mut table = ScoreTable::new();
        for mut entry in pending {
            let target = self.rename_artifact(&work_dir, &entry)?;
            entry
                .row
                .insert(LOCATION, Value::String(target.display().to_string()));
            self.consume_record(&work_dir, &entry);
            table.push(entry.row);
        }

        self.sweep(&work_dir);

        if !skipped.is_empty() {
            warn!(
                "Reconciliation skipped {} record file(s) in '{}'",
                skipped.len(),
                work_dir.display()
            );
        }
        Ok(Reconciliation { table, skipped })
    }

    /// Readiness barrier: the producing tool is known to lag behind its own
    /// record writing, so wait (bounded) until every expected raw artifact is
    /// visible.
    fn await_artifacts(&self, work_dir: &Path, expected: usize) -> Result<(), ReconcileError> {
        let ext = self.artifact_ext.as_str();
        let mut found = 0;
        self.barrier
            .wait_for("scored artifacts to flush to disk", || {
                found = count_raw_artifacts(work_dir, ext);
                found >= expected
            })
            .map(|attempts| {
                if attempts > 1 {
                    debug!("Artifact barrier satisfied after {} attempts", attempts);
                }
            })
            .map_err(|e| ReconcileError::ArtifactMissing {
                work_dir: work_dir.to_path_buf(),
                ext: ext.to_string(),
                expected,
                found,
                source: e,
            })
    }

    /// Renames one row's raw artifact to its canonical name. Tolerates the
    /// benign race between rename and visibility with a single retry.
    fn rename_artifact(
        &self,
        work_dir: &Path,
        entry: &PendingRow,
    ) -> Result<PathBuf, ReconcileError> {
        let ext = self.artifact_ext.as_str();
        // The decoy value may or may not carry the on-disk replica marker.
        let unmarked = work_dir.join(format!("{}.{}", entry.raw, ext));
        let marked = work_dir.join(format!("r{}.{}", entry.raw, ext));
        let from = if unmarked.is_file() { unmarked } else { marked };
        let to = work_dir.join(format!("{}.{}", entry.name.canonical(), ext));

        std::fs::rename(&from, &to).map_err(|e| ReconcileError::Rename {
            from: from.clone(),
            to: to.clone(),
            source: e,
        })?;
        if !to.is_file() {
            warn!(
                "Renamed artifact not yet visible at '{}', retrying rename once",
                to.display()
            );
            if let Err(e) = std::fs::rename(&from, &to) {
                debug!("Rename retry failed: {}", e);
            }
            if !to.is_file() {
                return Err(ReconcileError::RenameUnverified { from, to });
            }
        }
        Ok(to)
    }

    /// Retires a consumed record file under its row's identifier so a later
    /// pass no longer discovers it. Best-effort: the scores already live in
    /// the consolidated table.
    fn consume_record(&self, work_dir: &Path, entry: &PendingRow) {
        let retired = work_dir.join(format!(
            "{}{}",
            entry.name.canonical(),
            naming::RECORD_SUFFIX
        ));
        if let Err(e) = std::fs::rename(&entry.record_path, &retired) {
            warn!(
                "Could not retire record file '{}': {}",
                entry.record_path.display(),
                e
            );
        }
    }

    /// Sweep pass: reindex leftover raw-named artifacts (typically those whose
    /// record was skipped) with the same token rule, best-effort and without
    /// table rows.
    fn sweep(&self, work_dir: &Path) {
        let ext = self.artifact_ext.as_str();
        let names = match scan_file_names(work_dir) {
            Ok(names) => names,
            Err(e) => {
                warn!(
                    "Sweep pass could not re-scan '{}': {}",
                    work_dir.display(),
                    e
                );
                return;
            }
        };
        for name in names {
            let Some(decoy) = naming::raw_artifact_decoy(&name, ext) else {
                continue;
            };
            let from = work_dir.join(&name);
            let to = work_dir.join(format!("{}.{}", decoy.canonical(), ext));
            match std::fs::rename(&from, &to) {
                Ok(()) => debug!(
                    "Sweep pass reindexed leftover artifact '{}' -> '{}'",
                    name,
                    to.display()
                ),
                Err(e) => warn!(
                    "Sweep pass could not reindex leftover artifact '{}': {}",
                    from.display(),
                    e
                ),
            }
        }
    }
}

fn scan_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

fn count_raw_artifacts(dir: &Path, ext: &str) -> usize {
    match scan_file_names(dir) {
        Ok(names) => names
            .iter()
            .filter(|name| naming::raw_artifact_decoy(name, ext).is_some())
            .count(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(50, Duration::from_millis(10))
    }

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn reconciler(dir: &Path) -> Reconciler {
        Reconciler::new(dir).with_barrier(fast_policy())
    }

    #[test]
    fn single_record_is_consolidated_and_artifact_reindexed() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "r0001_foo_score.json",
            r#"{"decoy":"0001_foo","rmsd":1.2}"#,
        );
        write(dir.path(), "r0001_foo.pdb", "ATOM\n");

        let outcome = reconciler(dir.path()).collect().unwrap();
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.table.len(), 1);

        let row = &outcome.table.rows()[0];
        assert_eq!(row.raw_description(), Some("0001_foo"));
        assert_eq!(row.description(), Some("foo_0001"));
        assert_eq!(row.get("rmsd"), Some(&Value::from(1.2)));
        let location = row.location().unwrap();
        assert!(location.ends_with("foo_0001.pdb"));
        assert!(Path::new(location).is_file());
        assert!(!dir.path().join("r0001_foo.pdb").exists());
    }

    #[test]
    fn descriptions_are_unique_and_duplicates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "r0001_foo_score.json",
            r#"{"decoy":"0001_foo"}"#,
        );
        write(
            dir.path(),
            "r0002_foo_score.json",
            r#"{"decoy":"0002_foo"}"#,
        );
        // Same decoy as the first record, arriving under another file name.
        write(
            dir.path(),
            "r0003_dup_score.json",
            r#"{"decoy":"0001_foo"}"#,
        );
        write(dir.path(), "r0001_foo.pdb", "A");
        write(dir.path(), "r0002_foo.pdb", "B");

        let outcome = reconciler(dir.path()).collect().unwrap();
        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.skipped.len(), 1);

        let descriptions: HashSet<_> = outcome
            .table
            .rows()
            .iter()
            .map(|r| r.description().unwrap().to_string())
            .collect();
        assert_eq!(descriptions.len(), outcome.table.len());
        assert!(descriptions.contains("foo_0001"));
        assert!(descriptions.contains("foo_0002"));
    }

    #[test]
    fn decoy_with_replica_marker_resolves_to_marked_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "r0005_baz_score.json",
            r#"{"decoy":"r0005_baz","total_score":-7.5}"#,
        );
        write(dir.path(), "r0005_baz.pdb", "ATOM\n");

        let outcome = reconciler(dir.path()).collect().unwrap();
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.rows()[0].description(), Some("baz_0005"));
        assert!(dir.path().join("baz_0005.pdb").is_file());
    }

    #[test]
    fn second_run_on_reconciled_directory_yields_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "r0001_foo_score.json",
            r#"{"decoy":"0001_foo","rmsd":1.2}"#,
        );
        write(dir.path(), "r0001_foo.pdb", "ATOM\n");

        let first = reconciler(dir.path()).collect().unwrap();
        assert_eq!(first.table.len(), 1);

        // Records and raw artifact names were consumed by the first pass.
        let second = reconciler(dir.path()).collect().unwrap();
        assert!(second.table.is_empty());
        assert!(second.skipped.is_empty());
        assert!(dir.path().join("foo_0001.pdb").is_file());
    }

    #[test]
    fn sweep_reindexes_artifact_whose_record_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "r0001_foo_score.json",
            r#"{"decoy":"0001_foo"}"#,
        );
        write(dir.path(), "r0001_foo.pdb", "A");
        write(dir.path(), "r0002_bar_score.json", "{broken json");
        write(dir.path(), "r0002_bar.pdb", "B");

        let outcome = reconciler(dir.path()).collect().unwrap();
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].ends_with("r0002_bar_score.json"));
        assert!(outcome.table.get("bar_0002").is_none());
        // The orphaned artifact is still reindexed on disk.
        assert!(dir.path().join("bar_0002.pdb").is_file());
        assert!(!dir.path().join("r0002_bar.pdb").exists());
    }

    #[test]
    fn barrier_waits_for_delayed_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "r0001_foo_score.json",
            r#"{"decoy":"0001_foo"}"#,
        );

        let artifact = dir.path().join("r0001_foo.pdb");
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            fs::write(artifact, "ATOM\n").unwrap();
        });

        let outcome = reconciler(dir.path()).collect().unwrap();
        writer.join().unwrap();
        assert_eq!(outcome.table.len(), 1);
        assert!(dir.path().join("foo_0001.pdb").is_file());
    }

    #[test]
    fn exhausted_barrier_reports_artifact_missing_instead_of_hanging() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "r0001_foo_score.json",
            r#"{"decoy":"0001_foo"}"#,
        );

        let result = Reconciler::new(dir.path())
            .with_barrier(RetryPolicy::new(3, Duration::from_millis(5)))
            .collect();
        match result {
            Err(ReconcileError::ArtifactMissing {
                expected, found, ..
            }) => {
                assert_eq!(expected, 1);
                assert_eq!(found, 0);
            }
            other => panic!("expected ArtifactMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn empty_directory_yields_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = reconciler(dir.path()).collect().unwrap();
        assert!(outcome.table.is_empty());
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn custom_artifact_extension_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "r0001_foo_score.json",
            r#"{"decoy":"0001_foo"}"#,
        );
        write(dir.path(), "r0001_foo.cif", "data_foo\n");

        let outcome = reconciler(dir.path())
            .with_artifact_ext("cif")
            .collect()
            .unwrap();
        assert_eq!(outcome.table.len(), 1);
        assert!(dir.path().join("foo_0001.cif").is_file());
        assert!(
            outcome.table.rows()[0]
                .location()
                .unwrap()
                .ends_with("foo_0001.cif")
        );
    }
}
