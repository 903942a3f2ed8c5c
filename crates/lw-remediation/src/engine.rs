//! Remediation engine.
//!
//! `apply` runs stale check, backup, verify, then a whole-file atomic write.
//! A failed backup means no mutation; a failed verification restores the
//! backup. The working file is therefore only ever seen in its pre-fix
//! content or the verified post-fix content. Apply and undo on the same path
//! are serialized by a per-path lock.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use lw_core::config::RemediationConfig;
use lw_core::types::Severity;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::history::{FixHistory, FixRecord, HistoryError};
use crate::verify::verify;

pub const BACKUP_DIR: &str = "backups";
pub const HISTORY_FILE: &str = "fix_history.json";

#[derive(Debug, Error)]
pub enum FixError {
    /// `old_code` is not in the current file. Nothing was touched.
    #[error("stale fix")]
    StaleFix,

    #[error("syntax verification failed: {detail}")]
    SyntaxVerification { detail: String, backup_restored: bool },

    /// The backup could not be written, so the file was not modified.
    #[error("backup failed: {0}")]
    BackupFailed(String),

    #[error("backup missing: {}", .0.display())]
    BackupMissing(PathBuf),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid fix request: {0}")]
    InvalidRequest(String),

    #[error("fix not found: {0}")]
    FixNotFound(String),

    #[error("fix {0} was not applied")]
    NotApplied(String),

    #[error("fix {0} is already undone")]
    AlreadyUndone(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl FixError {
    pub fn backup_restored(&self) -> bool {
        matches!(self, FixError::SyntaxVerification { backup_restored: true, .. })
    }
}

/// A single textual fix: either replace the first occurrence of `old_code`,
/// or replace lines `line_start..=line_end` (1-based).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixRequest {
    /// Path relative to the project root.
    pub file: String,
    #[serde(default)]
    pub old_code: Option<String>,
    #[serde(default)]
    pub line_start: Option<usize>,
    #[serde(default)]
    pub line_end: Option<usize>,
    pub new_code: String,
    #[serde(default, alias = "issue")]
    pub issue_ref: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl FixRequest {
    pub fn replace(file: impl Into<String>, old_code: impl Into<String>, new_code: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            old_code: Some(old_code.into()),
            new_code: new_code.into(),
            ..Self::default()
        }
    }

    pub fn lines(file: impl Into<String>, start: usize, end: usize, new_code: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line_start: Some(start),
            line_end: Some(end),
            new_code: new_code.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FixResult {
    pub success: bool,
    pub fix_id: String,
    pub file: String,
    pub error: Option<String>,
    pub backup_path: Option<PathBuf>,
    pub backup_restored: bool,
    pub verified: bool,
    /// A successful apply can always be undone right away.
    pub undo_available: bool,
}

/// What [`RemediationEngine::apply`] would do, computed without touching
/// the file or the history.
#[derive(Debug, Clone, Serialize)]
pub struct FixPreview {
    pub file: String,
    pub issue: Option<String>,
    /// The text being replaced: `old_code`, or the addressed line range.
    pub before: String,
    pub after: String,
    /// 1-based range of the replaced text in the current file.
    pub first_line: usize,
    pub last_line: usize,
    /// Why the result would fail syntax verification, if it would.
    pub verification_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UndoResult {
    pub success: bool,
    pub fix_id: Option<String>,
    pub file: Option<String>,
    pub error: Option<String>,
}

impl UndoResult {
    pub fn from_outcome(outcome: Result<FixRecord, FixError>) -> Self {
        match outcome {
            Ok(record) => Self {
                success: true,
                fix_id: Some(record.fix_id),
                file: Some(record.file),
                error: None,
            },
            Err(e) => Self {
                success: false,
                fix_id: None,
                file: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct RemediationEngine {
    project_dir: PathBuf,
    backup_dir: PathBuf,
    snippet_chars: usize,
    history: FixHistory,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    undo_lock: Mutex<()>,
}

impl RemediationEngine {
    pub fn new(project_dir: impl Into<PathBuf>, config: &RemediationConfig) -> Result<Self, FixError> {
        let project_dir = project_dir.into();
        let state_dir = project_dir.join(&config.state_dir);
        let backup_dir = state_dir.join(BACKUP_DIR);
        fs::create_dir_all(&backup_dir)?;
        let history = FixHistory::open(state_dir.join(HISTORY_FILE))?;
        Ok(Self {
            project_dir,
            backup_dir,
            snippet_chars: config.snippet_chars,
            history,
            locks: DashMap::new(),
            undo_lock: Mutex::new(()),
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn resolve(&self, file: &str) -> Result<PathBuf, FixError> {
        let rel = Path::new(file);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if file.is_empty() || escapes {
            return Err(FixError::InvalidRequest(format!(
                "'{file}' must be a path inside the project"
            )));
        }
        Ok(self.project_dir.join(rel))
    }

    /// Apply `request`. Every attempt that gets past request validation is
    /// recorded in the fix history.
    pub fn apply(&self, request: &FixRequest) -> FixResult {
        let fix_id = new_fix_id();
        let outcome = self.try_apply(&fix_id, request);

        let (applied, backup_path, error) = match &outcome {
            Ok(backup) => (true, Some(backup.clone()), None),
            Err(e) => {
                warn!(fix_id = %fix_id, file = %request.file, error = %e, "fix not applied");
                (false, None, Some(e.to_string()))
            }
        };
        let backup_restored = outcome.as_ref().err().is_some_and(FixError::backup_restored);

        let recordable = !matches!(outcome, Err(FixError::InvalidRequest(_) | FixError::FileNotFound(_)));
        if recordable {
            let record = FixRecord {
                fix_id: fix_id.clone(),
                file: request.file.clone(),
                issue_ref: request.issue_ref.clone(),
                severity: request.severity,
                old_code: request.old_code.as_deref().map(|c| truncate(c, self.snippet_chars)),
                new_code: truncate(&request.new_code, self.snippet_chars),
                line_start: request.line_start,
                line_end: request.line_end,
                backup_path: backup_path.clone(),
                applied,
                verified: applied,
                undone: false,
                error: error.clone(),
                created_at: Utc::now(),
                undone_at: None,
            };
            if let Err(e) = self.history.append(record) {
                tracing::error!(fix_id = %fix_id, error = %e, "failed to persist fix record");
            }
        }

        if applied {
            info!(fix_id = %fix_id, file = %request.file, "fix applied");
        }
        FixResult {
            success: applied,
            fix_id,
            file: request.file.clone(),
            error,
            backup_path,
            backup_restored,
            verified: applied,
            undo_available: applied,
        }
    }

    /// Preview `request` against the current file. Stale and invalid requests
    /// fail exactly as `apply` would.
    pub fn preview(&self, request: &FixRequest) -> Result<FixPreview, FixError> {
        let path = self.checked_path(request)?;
        let original = fs::read_to_string(&path)?;
        let candidate = candidate_content(&original, request)?;

        let (first_line, last_line, before) = match request.old_code.as_deref().filter(|o| !o.is_empty()) {
            Some(old) => {
                let offset = original.find(old).unwrap_or_default();
                let first = original[..offset].matches('\n').count() + 1;
                (first, first + old.matches('\n').count(), old.to_string())
            }
            None => {
                let start = request.line_start.unwrap_or(1);
                let end = request.line_end.unwrap_or(start);
                let before = original
                    .split('\n')
                    .skip(start - 1)
                    .take(end + 1 - start)
                    .collect::<Vec<_>>()
                    .join("\n");
                (start, end, before)
            }
        };

        Ok(FixPreview {
            file: request.file.clone(),
            issue: request.issue_ref.clone(),
            before,
            after: request.new_code.clone(),
            first_line,
            last_line,
            verification_error: verify(&path, &candidate).err().map(|e| e.to_string()),
        })
    }

    fn checked_path(&self, request: &FixRequest) -> Result<PathBuf, FixError> {
        if request.old_code.is_none() && request.line_start.is_none() {
            return Err(FixError::InvalidRequest(
                "either old_code or line_start is required".into(),
            ));
        }
        let path = self.resolve(&request.file)?;
        if !path.is_file() {
            return Err(FixError::FileNotFound(request.file.clone()));
        }
        Ok(path)
    }

    /// Returns the backup path on success.
    fn try_apply(&self, fix_id: &str, request: &FixRequest) -> Result<PathBuf, FixError> {
        let path = self.checked_path(request)?;

        let lock = self.path_lock(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let original = fs::read_to_string(&path)?;
        let candidate = candidate_content(&original, request)?;

        let backup = self.backup(&path, &request.file, fix_id)?;

        if let Err(e) = verify(&path, &candidate) {
            restore(&backup, &path)?;
            return Err(FixError::SyntaxVerification {
                detail: e.to_string(),
                backup_restored: true,
            });
        }

        write_atomic(&path, candidate.as_bytes())?;
        if fs::read(&path)? != candidate.as_bytes() {
            restore(&backup, &path)?;
            return Err(FixError::Io(io::Error::other(
                "written content did not read back identically; backup restored",
            )));
        }
        Ok(backup)
    }

    fn backup(&self, path: &Path, rel: &str, fix_id: &str) -> Result<PathBuf, FixError> {
        let safe_name = rel.replace(['/', '\\'], "_");
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = fix_id.rsplit('_').next().unwrap_or(fix_id);
        let backup = self
            .backup_dir
            .join(format!("{safe_name}.backup_{stamp}_{suffix}"));
        fs::create_dir_all(&self.backup_dir)
            .and_then(|_| fs::copy(path, &backup))
            .map_err(|e| FixError::BackupFailed(e.to_string()))?;
        Ok(backup)
    }

    /// Undo `fix_id`, or the newest undoable fix when `None`.
    ///
    /// Undos are serialized, so the record is selected and checked under the
    /// same lock that marks it undone.
    pub fn undo(&self, fix_id: Option<&str>) -> Result<FixRecord, FixError> {
        let _serial = self.undo_lock.lock().unwrap_or_else(|e| e.into_inner());
        let record = match fix_id {
            Some(id) => self
                .history
                .get(id)
                .ok_or_else(|| FixError::FixNotFound(id.to_string()))?,
            None => self
                .history
                .latest_undoable()
                .ok_or_else(|| FixError::FixNotFound("no applied fix to undo".into()))?,
        };
        if !record.applied {
            return Err(FixError::NotApplied(record.fix_id));
        }
        if record.undone {
            return Err(FixError::AlreadyUndone(record.fix_id));
        }
        let backup = record
            .backup_path
            .clone()
            .ok_or_else(|| FixError::BackupMissing(PathBuf::new()))?;
        if !backup.is_file() {
            return Err(FixError::BackupMissing(backup));
        }

        let path = self.resolve(&record.file)?;
        let lock = self.path_lock(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        restore(&backup, &path)?;

        let updated = self
            .history
            .update(&record.fix_id, |r| {
                r.undone = true;
                r.undone_at = Some(Utc::now());
            })?
            .ok_or_else(|| FixError::FixNotFound(record.fix_id.clone()))?;
        info!(fix_id = %updated.fix_id, file = %updated.file, "fix undone");
        Ok(updated)
    }

    pub fn record(&self, fix_id: &str) -> Option<FixRecord> {
        self.history.get(fix_id)
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn history(&self, limit: usize) -> Vec<FixRecord> {
        self.history.recent(limit)
    }

    pub fn history_path(&self) -> &Path {
        self.history.path()
    }
}

fn new_fix_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("fix_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &hex[..6])
}

fn truncate(code: &str, max_chars: usize) -> String {
    code.chars().take(max_chars).collect()
}

/// The complete resulting file content for `request`.
fn candidate_content(original: &str, request: &FixRequest) -> Result<String, FixError> {
    if let Some(old) = request.old_code.as_deref().filter(|o| !o.is_empty()) {
        if !original.contains(old) {
            return Err(FixError::StaleFix);
        }
        return Ok(original.replacen(old, &request.new_code, 1));
    }
    let start = request
        .line_start
        .ok_or_else(|| FixError::InvalidRequest("empty old_code and no line range".into()))?;
    let end = request.line_end.unwrap_or(start);
    let lines: Vec<&str> = original.split('\n').collect();
    if start == 0 || end < start || end > lines.len() {
        return Err(FixError::InvalidRequest(format!(
            "line range {start}..={end} outside 1..={}",
            lines.len()
        )));
    }
    let mut out = lines[..start - 1].to_vec();
    out.push(&request.new_code);
    out.extend_from_slice(&lines[end..]);
    Ok(out.join("\n"))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.lw-tmp"));
    fs::write(&tmp, bytes)?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(&tmp, meta.permissions())?;
    }
    fs::rename(&tmp, path)
}

fn restore(backup: &Path, path: &Path) -> io::Result<()> {
    let bytes = fs::read(backup)?;
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_first_occurrence_only() {
        let req = FixRequest::replace("a.js", "x", "y");
        assert_eq!(candidate_content("x x", &req).unwrap(), "y x");
    }

    #[test]
    fn stale_when_old_code_absent() {
        let req = FixRequest::replace("a.js", "missing", "y");
        assert!(matches!(candidate_content("abc", &req), Err(FixError::StaleFix)));
        assert_eq!(FixError::StaleFix.to_string(), "stale fix");
    }

    #[test]
    fn replaces_line_ranges() {
        let original = "one\ntwo\nthree\nfour\n";
        let req = FixRequest::lines("a.py", 2, 3, "TWO_THREE");
        assert_eq!(candidate_content(original, &req).unwrap(), "one\nTWO_THREE\nfour\n");

        let single = FixRequest {
            line_end: None,
            ..FixRequest::lines("a.py", 1, 1, "ONE")
        };
        assert_eq!(candidate_content(original, &single).unwrap(), "ONE\ntwo\nthree\nfour\n");

        let bad = FixRequest::lines("a.py", 3, 9, "x");
        assert!(matches!(candidate_content(original, &bad), Err(FixError::InvalidRequest(_))));
    }

    #[test]
    fn fix_ids_have_timestamp_and_hex_suffix() {
        let id = new_fix_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "fix");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn truncates_by_chars() {
        assert_eq!(truncate("héllo", 2), "hé");
    }
}
