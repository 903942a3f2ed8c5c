//! Commits applied fixes with conventional commit messages.
//!
//! Every git invocation goes through [`run_bounded`], so a hung git (an
//! editor prompt, a lock held by another process) cannot stall the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lw_remediation::FixRecord;
use lw_session::{run_bounded, CommandOutput, ProcessError};
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

const SUBJECT_CHARS: usize = 60;
const GROUP_LINE_CHARS: usize = 50;
const GROUP_LISTED: usize = 5;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository")]
    NotARepository,

    #[error("nothing to commit")]
    NothingToCommit,

    #[error("git {command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub hash: String,
    pub message: String,
    pub files: Vec<String>,
    pub fix_ids: Vec<String>,
}

/// Conventional commit type for a fix, from its issue description.
pub fn commit_type(issue: &str) -> &'static str {
    let issue = issue.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| issue.contains(w));
    if has(&["bug", "error", "security", "vulnerability"]) {
        "fix"
    } else if has(&["performance", "slow"]) {
        "perf"
    } else if has(&["refactor"]) {
        "refactor"
    } else if has(&["style", "format"]) {
        "style"
    } else if has(&["test"]) {
        "test"
    } else if has(&["docs", "documentation"]) {
        "docs"
    } else {
        "fix"
    }
}

/// Top-level directory of `file`, or its stem for a file at the root.
pub fn commit_scope(file: &str) -> Option<String> {
    let path = Path::new(file);
    let mut components = path.components();
    let first = components.next()?;
    if components.next().is_some() {
        Some(first.as_os_str().to_string_lossy().into_owned())
    } else {
        path.file_stem().map(|s| s.to_string_lossy().into_owned())
    }
}

fn issue_of(record: &FixRecord) -> &str {
    record
        .issue_ref
        .as_deref()
        .filter(|i| !i.trim().is_empty())
        .unwrap_or("code improvement")
}

fn subject(kind: &str, scope: Option<&str>, text: &str) -> String {
    match scope {
        Some(scope) => format!("{kind}({scope}): {text}"),
        None => format!("{kind}: {text}"),
    }
}

pub fn fix_message(record: &FixRecord) -> String {
    let issue = issue_of(record);
    let short: String = issue.chars().take(SUBJECT_CHARS).collect();
    let scope = commit_scope(&record.file);
    let mut message = subject(commit_type(issue), scope.as_deref(), &short);
    message.push_str(&format!("\n\nFixed: {issue}\n"));
    if let Some(severity) = record.severity.filter(|s| s.is_urgent()) {
        message.push_str(&format!("Severity: {severity}\n"));
    }
    message.push_str(&format!("Fix-Id: {}\n", record.fix_id));
    message
}

/// One message for several fixes sharing a type and scope.
pub fn group_message(records: &[FixRecord]) -> String {
    if let [only] = records {
        return fix_message(only);
    }
    let (kind, scope) = match records.first() {
        Some(first) => (commit_type(issue_of(first)), commit_scope(&first.file)),
        None => ("fix", None),
    };
    let mut message = subject(
        kind,
        scope.as_deref(),
        &format!("Multiple improvements ({} fixes)", records.len()),
    );
    message.push_str("\n\nFixed issues:\n");
    for record in records.iter().take(GROUP_LISTED) {
        let issue: String = issue_of(record).chars().take(GROUP_LINE_CHARS).collect();
        message.push_str(&format!("- {}: {issue}\n", record.file));
    }
    if records.len() > GROUP_LISTED {
        message.push_str(&format!("- ... and {} more\n", records.len() - GROUP_LISTED));
    }
    message
}

/// Groups by (commit type, scope) in a stable order.
pub fn group_fixes(records: &[FixRecord]) -> Vec<Vec<FixRecord>> {
    let mut groups: BTreeMap<(&'static str, String), Vec<FixRecord>> = BTreeMap::new();
    for record in records {
        let key = (
            commit_type(issue_of(record)),
            commit_scope(&record.file).unwrap_or_else(|| "general".into()),
        );
        groups.entry(key).or_default().push(record.clone());
    }
    groups.into_values().collect()
}

pub struct GitCommitter {
    project_dir: PathBuf,
    timeout: Duration,
}

impl GitCommitter {
    pub fn new(project_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            project_dir: project_dir.into(),
            timeout,
        }
    }

    async fn git(&self, args: &[&str]) -> Result<CommandOutput, GitError> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.project_dir);
        let out = run_bounded(cmd, self.timeout).await?;
        if out.success() {
            Ok(out)
        } else {
            let stderr = if out.stderr.trim().is_empty() {
                out.stdout.trim().to_string()
            } else {
                out.stderr.trim().to_string()
            };
            Err(GitError::Failed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr,
            })
        }
    }

    pub async fn is_repository(&self) -> bool {
        self.git(&["rev-parse", "--git-dir"]).await.is_ok()
    }

    /// Commit one applied fix on its own.
    pub async fn commit_fix(&self, record: &FixRecord) -> Result<CommitOutcome, GitError> {
        self.commit(std::slice::from_ref(record), fix_message(record)).await
    }

    /// Commit `records` as one commit per (type, scope) group. Groups that
    /// fail are skipped; the first error is returned only if nothing was
    /// committed.
    pub async fn commit_grouped(&self, records: &[FixRecord]) -> Result<Vec<CommitOutcome>, GitError> {
        if records.is_empty() {
            return Err(GitError::NothingToCommit);
        }
        let mut outcomes = Vec::new();
        let mut first_error = None;
        for group in group_fixes(records) {
            match self.commit(&group, group_message(&group)).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    debug!(error = %e, fixes = group.len(), "grouped commit skipped");
                    first_error.get_or_insert(e);
                }
            }
        }
        match (outcomes.is_empty(), first_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(outcomes),
        }
    }

    async fn commit(&self, records: &[FixRecord], message: String) -> Result<CommitOutcome, GitError> {
        if !self.is_repository().await {
            return Err(GitError::NotARepository);
        }
        let mut files: Vec<String> = records.iter().map(|r| r.file.clone()).collect();
        files.sort();
        files.dedup();

        let mut add = vec!["add", "--"];
        add.extend(files.iter().map(String::as_str));
        self.git(&add).await?;

        // Paths after `--` limit the commit to these files, whatever else is staged.
        let mut commit = vec!["commit", "--no-verify", "-m", message.as_str(), "--"];
        commit.extend(files.iter().map(String::as_str));
        if let Err(e) = self.git(&commit).await {
            return Err(match e {
                GitError::Failed { stderr, .. } if stderr.contains("nothing") => GitError::NothingToCommit,
                other => other,
            });
        }

        let hash = self
            .git(&["rev-parse", "--short", "HEAD"])
            .await
            .map(|out| out.stdout.trim().to_string())
            .unwrap_or_else(|_| "unknown".into());
        info!(%hash, files = files.len(), fixes = records.len(), "fixes committed");
        Ok(CommitOutcome {
            hash,
            message,
            files,
            fix_ids: records.iter().map(|r| r.fix_id.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lw_core::types::Severity;

    fn record(id: &str, file: &str, issue: &str) -> FixRecord {
        FixRecord {
            fix_id: id.into(),
            file: file.into(),
            issue_ref: Some(issue.into()),
            severity: Some(Severity::High),
            old_code: None,
            new_code: String::new(),
            line_start: None,
            line_end: None,
            backup_path: None,
            applied: true,
            verified: true,
            undone: false,
            error: None,
            created_at: Utc::now(),
            undone_at: None,
        }
    }

    #[test]
    fn commit_types_follow_issue_wording() {
        assert_eq!(commit_type("TypeError in handler"), "fix");
        assert_eq!(commit_type("Slow query in list view"), "perf");
        assert_eq!(commit_type("Refactor nested callbacks"), "refactor");
        assert_eq!(commit_type("format imports"), "style");
        assert_eq!(commit_type("update docs"), "docs");
        assert_eq!(commit_type("something else"), "fix");
    }

    #[test]
    fn scope_is_top_directory_or_stem() {
        assert_eq!(commit_scope("frontend/src/App.jsx").as_deref(), Some("frontend"));
        assert_eq!(commit_scope("server.py").as_deref(), Some("server"));
        assert_eq!(commit_scope(""), None);
    }

    #[test]
    fn single_fix_message() {
        let message = fix_message(&record("fix_1", "backend/app.py", "Hardcoded secret error"));
        assert!(message.starts_with("fix(backend): Hardcoded secret error\n\n"));
        assert!(message.contains("Severity: high"));
        assert!(message.contains("Fix-Id: fix_1"));
    }

    #[test]
    fn grouped_message_lists_first_five() {
        let records: Vec<FixRecord> = (0..7)
            .map(|i| record(&format!("fix_{i}"), &format!("frontend/f{i}.js"), "console error"))
            .collect();
        let message = group_message(&records);
        assert!(message.starts_with("fix(frontend): Multiple improvements (7 fixes)"));
        assert_eq!(message.matches("\n- frontend/").count(), 5);
        assert!(message.ends_with("- ... and 2 more\n"));
    }

    #[test]
    fn groups_split_by_type_and_scope() {
        let records = vec![
            record("a", "frontend/a.js", "error a"),
            record("b", "backend/b.py", "error b"),
            record("c", "frontend/c.js", "slow render"),
            record("d", "frontend/d.js", "error d"),
        ];
        let groups = group_fixes(&records);
        assert_eq!(groups.len(), 3);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert!(sizes.contains(&2));
    }
}
