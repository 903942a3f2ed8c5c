use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lw_core::types::Severity;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("fix history I/O: {0}")]
    Io(#[from] io::Error),

    #[error("fix history serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One apply attempt. Records are appended and later only marked undone,
/// never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub fix_id: String,
    pub file: String,
    #[serde(default)]
    pub issue_ref: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Truncated snippet of the replaced code.
    #[serde(default)]
    pub old_code: Option<String>,
    /// Truncated snippet of the replacement.
    pub new_code: String,
    #[serde(default)]
    pub line_start: Option<usize>,
    #[serde(default)]
    pub line_end: Option<usize>,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    pub applied: bool,
    pub verified: bool,
    #[serde(default)]
    pub undone: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub undone_at: Option<DateTime<Utc>>,
}

/// `fix_history.json`: a JSON array of [`FixRecord`]s, rewritten atomically on
/// every change.
pub struct FixHistory {
    path: PathBuf,
    records: Mutex<Vec<FixRecord>>,
}

impl FixHistory {
    /// Load the history at `path`. A file that cannot be parsed is moved
    /// aside rather than overwritten.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<FixRecord>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    let aside = path.with_extension(format!(
                        "json.corrupt-{}",
                        Utc::now().format("%Y%m%d%H%M%S")
                    ));
                    error!(path = %path.display(), error = %e, aside = %aside.display(),
                        "unreadable fix history moved aside");
                    fs::rename(&path, &aside)?;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FixRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn append(&self, record: FixRecord) -> Result<(), HistoryError> {
        let mut records = self.lock();
        records.push(record);
        persist(&self.path, &records)
    }

    /// Apply `change` to the record with `fix_id` and persist. Returns the
    /// updated record, or `None` if no such record exists.
    pub fn update<F>(&self, fix_id: &str, change: F) -> Result<Option<FixRecord>, HistoryError>
    where
        F: FnOnce(&mut FixRecord),
    {
        let mut records = self.lock();
        let Some(record) = records.iter_mut().find(|r| r.fix_id == fix_id) else {
            return Ok(None);
        };
        change(record);
        let updated = record.clone();
        persist(&self.path, &records)?;
        Ok(Some(updated))
    }

    pub fn get(&self, fix_id: &str) -> Option<FixRecord> {
        self.lock().iter().find(|r| r.fix_id == fix_id).cloned()
    }

    /// The newest record that was applied and not yet undone.
    pub fn latest_undoable(&self) -> Option<FixRecord> {
        self.lock()
            .iter()
            .rev()
            .find(|r| r.applied && !r.undone)
            .cloned()
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<FixRecord> {
        let records = self.lock();
        let skip = records.len().saturating_sub(limit);
        records[skip..].to_vec()
    }
}

fn persist(path: &Path, records: &[FixRecord]) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, applied: bool) -> FixRecord {
        FixRecord {
            fix_id: id.into(),
            file: "src/a.js".into(),
            issue_ref: None,
            severity: Some(Severity::High),
            old_code: Some("a".into()),
            new_code: "b".into(),
            line_start: None,
            line_end: None,
            backup_path: None,
            applied,
            verified: applied,
            undone: false,
            error: None,
            created_at: Utc::now(),
            undone_at: None,
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".live/fix_history.json");
        {
            let history = FixHistory::open(&path).unwrap();
            history.append(record("fix_1", true)).unwrap();
            history.append(record("fix_2", false)).unwrap();
        }
        let history = FixHistory::open(&path).unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history.get("fix_2").unwrap().applied);
        assert!(!dir.path().join(".live/fix_history.json.tmp").exists());
    }

    #[test]
    fn latest_undoable_skips_failed_and_undone() {
        let dir = tempfile::tempdir().unwrap();
        let history = FixHistory::open(dir.path().join("h.json")).unwrap();
        history.append(record("fix_1", true)).unwrap();
        history.append(record("fix_2", true)).unwrap();
        history.append(record("fix_3", false)).unwrap();
        assert_eq!(history.latest_undoable().unwrap().fix_id, "fix_2");

        history.update("fix_2", |r| r.undone = true).unwrap();
        assert_eq!(history.latest_undoable().unwrap().fix_id, "fix_1");
        assert!(history.update("missing", |_| {}).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fix_history.json");
        fs::write(&path, "not json").unwrap();

        let history = FixHistory::open(&path).unwrap();
        assert!(history.is_empty());
        assert!(!path.exists());
        let aside = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|e| e.file_name().to_string_lossy().contains("corrupt"));
        assert!(aside);
    }

    #[test]
    fn recent_is_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let history = FixHistory::open(dir.path().join("h.json")).unwrap();
        for i in 0..5 {
            history.append(record(&format!("fix_{i}"), true)).unwrap();
        }
        let ids: Vec<String> = history.recent(2).into_iter().map(|r| r.fix_id).collect();
        assert_eq!(ids, vec!["fix_3", "fix_4"]);
    }
}
