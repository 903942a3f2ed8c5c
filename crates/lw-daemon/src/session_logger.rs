use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lw_core::types::{IssueType, Severity};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

pub const SESSIONS_DIR: &str = "sessions";
const ACTIVITY_CAPACITY: usize = 1000;
const MAX_RECOMMENDATIONS: usize = 5;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session archive I/O: {0}")]
    Io(#[from] io::Error),

    #[error("session archive serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("session {0} already ended")]
    AlreadyEnded(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub files_modified: u64,
    pub errors_detected: u64,
    pub errors_fixed: u64,
    pub fixes_failed: u64,
    pub fixes_undone: u64,
    pub improvements_suggested: u64,
    pub improvements_applied: u64,
    pub api_calls: u64,
    pub api_failures: u64,
    pub slow_requests: u64,
    pub tests_run: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub notifications_shown: u64,
    pub notifications_suppressed: u64,
}

impl SessionCounters {
    /// 0 to 100. Starts at 100, loses up to 20 for unfixed errors, up to 15
    /// for failing tests and up to 15 for failing API calls, and gains up to
    /// 10 for applied improvements.
    pub fn quality_score(&self) -> u8 {
        let mut score: i64 = 100;
        if self.errors_detected > 0 {
            let fix_rate = self.errors_fixed as f64 / self.errors_detected as f64;
            score -= ((1.0 - fix_rate) * 20.0) as i64;
        }
        if self.tests_run > 0 {
            let pass_rate = self.tests_passed as f64 / self.tests_run as f64;
            score -= ((1.0 - pass_rate) * 15.0) as i64;
        }
        if self.api_calls > 0 {
            let failure_rate = self.api_failures as f64 / self.api_calls as f64;
            score -= (failure_rate * 15.0) as i64;
        }
        if self.improvements_suggested > 0 {
            let apply_rate = self.improvements_applied as f64 / self.improvements_suggested as f64;
            score += (apply_rate * 10.0) as i64;
        }
        score.clamp(0, 100) as u8
    }

    pub fn pending_errors(&self) -> u64 {
        self.errors_detected.saturating_sub(self.errors_fixed)
    }

    pub fn recommendations(&self) -> Vec<String> {
        let mut recs = Vec::new();
        let pending = self.pending_errors();
        if pending > 0 {
            recs.push(format!("Fix {pending} pending error(s)"));
        }
        if self.tests_failed > 0 {
            recs.push(format!("Fix {} failing test(s)", self.tests_failed));
        }
        if self.slow_requests > 3 {
            recs.push("Optimize slow API endpoints".to_string());
        }
        if self.api_failures > 5 {
            recs.push("Investigate frequent API failures".to_string());
        }
        if self.fixes_undone > 0 && self.fixes_undone * 2 >= self.errors_fixed.max(1) {
            recs.push("Review rejected fixes before applying similar ones".to_string());
        }
        recs.truncate(MAX_RECOMMENDATIONS);
        recs
    }
}

/// One entry of the session activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    FileModified {
        file: String,
    },
    IssueDetected {
        issue_type: IssueType,
        severity: Severity,
        file: String,
    },
    FixApplied {
        fix_id: String,
        file: String,
        severity: Option<Severity>,
    },
    FixFailed {
        file: String,
        error: String,
    },
    FixUndone {
        fix_id: String,
        file: String,
    },
    ImprovementsSuggested {
        file: String,
        count: u64,
    },
    TestRun {
        total: u64,
        passed: u64,
        failed: u64,
    },
    ApiCall {
        method: String,
        endpoint: String,
        status: Option<u16>,
        failed: bool,
        slow: bool,
    },
    NotificationShown {
        summary: String,
    },
    NotificationSuppressed {
        count: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub activity: Activity,
}

/// The archived form of one activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: u64,
    pub counters: SessionCounters,
    pub files_modified: BTreeSet<String>,
    pub error_types: BTreeMap<String, u64>,
    pub quality_score: u8,
    pub recommendations: Vec<String>,
    pub activity_log: VecDeque<ActivityEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub counters: SessionCounters,
    pub quality_score: u8,
    pub recommendations: Vec<String>,
    pub top_errors: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionArchive {
    pub summary: SessionSummary,
    pub json_path: PathBuf,
    pub report_path: PathBuf,
}

/// Session-wide counters and activity log for one activation.
pub struct SessionLogger {
    sessions_dir: PathBuf,
    session: Mutex<Session>,
}

impl SessionLogger {
    /// Start a session whose archive will be written under
    /// `<state_dir>/sessions/`.
    pub fn start(state_dir: &Path) -> Self {
        let started_at = Utc::now();
        let session_id = format!("session_{}", started_at.format("%Y%m%d_%H%M%S_%3f"));
        info!(session_id = %session_id, "session started");
        Self {
            sessions_dir: state_dir.join(SESSIONS_DIR),
            session: Mutex::new(Session {
                session_id,
                started_at,
                ended_at: None,
                duration_secs: 0,
                counters: SessionCounters::default(),
                files_modified: BTreeSet::new(),
                error_types: BTreeMap::new(),
                quality_score: 100,
                recommendations: Vec::new(),
                activity_log: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_id(&self) -> String {
        self.lock().session_id.clone()
    }

    pub fn log(&self, activity: Activity) {
        let mut session = self.lock();
        let c = &mut session.counters;
        match &activity {
            Activity::FileModified { .. } => {}
            Activity::IssueDetected { severity, .. } if severity.is_passive() => {
                c.improvements_suggested += 1;
            }
            Activity::IssueDetected { .. } => c.errors_detected += 1,
            Activity::FixApplied { severity, .. } => match severity {
                Some(s) if s.is_passive() => c.improvements_applied += 1,
                _ => c.errors_fixed += 1,
            },
            Activity::FixFailed { .. } => c.fixes_failed += 1,
            Activity::FixUndone { .. } => c.fixes_undone += 1,
            Activity::ImprovementsSuggested { count, .. } => c.improvements_suggested += count,
            Activity::TestRun { total, passed, failed } => {
                c.tests_run += total;
                c.tests_passed += passed;
                c.tests_failed += failed;
            }
            Activity::ApiCall { failed, slow, .. } => {
                c.api_calls += 1;
                c.api_failures += u64::from(*failed);
                c.slow_requests += u64::from(*slow);
            }
            Activity::NotificationShown { .. } => c.notifications_shown += 1,
            Activity::NotificationSuppressed { count } => c.notifications_suppressed += count,
        }
        match &activity {
            Activity::FileModified { file } => {
                session.files_modified.insert(file.clone());
                session.counters.files_modified = session.files_modified.len() as u64;
            }
            Activity::IssueDetected { issue_type, severity, .. } if !severity.is_passive() => {
                *session.error_types.entry(issue_type.to_string()).or_default() += 1;
            }
            _ => {}
        }

        if session.activity_log.len() >= ACTIVITY_CAPACITY {
            session.activity_log.pop_front();
        }
        session.activity_log.push_back(ActivityEntry {
            at: Utc::now(),
            activity,
        });
    }

    pub fn counters(&self) -> SessionCounters {
        self.lock().counters.clone()
    }

    pub fn summary(&self) -> SessionSummary {
        summarize(&self.lock(), Utc::now())
    }

    pub fn render_report(&self) -> String {
        let session = self.lock();
        render(&session, &summarize(&session, Utc::now()))
    }

    /// End the session and write `<session_id>.json` and `<session_id>.txt`.
    pub fn finish(&self) -> Result<SessionArchive, SessionError> {
        let mut session = self.lock();
        if session.ended_at.is_some() {
            return Err(SessionError::AlreadyEnded(session.session_id.clone()));
        }
        let now = Utc::now();
        let summary = summarize(&session, now);
        session.ended_at = Some(now);
        session.duration_secs = summary.duration_secs;
        session.quality_score = summary.quality_score;
        session.recommendations = summary.recommendations.clone();

        let json_path = self.sessions_dir.join(format!("{}.json", session.session_id));
        let report_path = self.sessions_dir.join(format!("{}.txt", session.session_id));
        let written = write_archive(&self.sessions_dir, &json_path, &report_path, &session, &summary);
        if let Err(e) = written {
            error!(session_id = %session.session_id, error = %e, "failed to archive session");
            return Err(e);
        }

        info!(
            session_id = %session.session_id,
            duration_secs = summary.duration_secs,
            quality_score = summary.quality_score,
            report = %report_path.display(),
            "session archived"
        );
        Ok(SessionArchive {
            summary,
            json_path,
            report_path,
        })
    }
}

fn write_archive(
    dir: &Path,
    json_path: &Path,
    report_path: &Path,
    session: &Session,
    summary: &SessionSummary,
) -> Result<(), SessionError> {
    fs::create_dir_all(dir)?;
    fs::write(json_path, serde_json::to_string_pretty(session)?)?;
    fs::write(report_path, render(session, summary))?;
    Ok(())
}

fn summarize(session: &Session, now: DateTime<Utc>) -> SessionSummary {
    let duration_secs = (session.ended_at.unwrap_or(now) - session.started_at)
        .num_seconds()
        .max(0) as u64;
    let mut top_errors: Vec<(String, u64)> =
        session.error_types.iter().map(|(t, n)| (t.clone(), *n)).collect();
    top_errors.sort_by(|a, b| b.1.cmp(&a.1));
    top_errors.truncate(3);
    SessionSummary {
        session_id: session.session_id.clone(),
        started_at: session.started_at,
        duration_secs,
        counters: session.counters.clone(),
        quality_score: session.counters.quality_score(),
        recommendations: session.counters.recommendations(),
        top_errors,
    }
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn render(session: &Session, summary: &SessionSummary) -> String {
    let c = &summary.counters;
    let mut out = String::new();
    let _ = writeln!(out, "Live Development Session Report");
    let _ = writeln!(out, "Session: {}", session.session_id);
    let _ = writeln!(out, "Started: {}", session.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Duration: {}", format_duration(summary.duration_secs));
    let _ = writeln!(out);

    let _ = writeln!(out, "ACTIVITY");
    let _ = writeln!(out, "Files modified: {}", c.files_modified);
    let _ = writeln!(out);

    let _ = writeln!(out, "ERRORS");
    let _ = writeln!(out, "Detected: {}", c.errors_detected);
    let _ = writeln!(
        out,
        "Fixed: {} ({:.0}% fix rate)",
        c.errors_fixed,
        percent(c.errors_fixed, c.errors_detected)
    );
    let _ = writeln!(out, "Pending: {}", c.pending_errors());
    let _ = writeln!(out, "Fixes failed: {}, undone: {}", c.fixes_failed, c.fixes_undone);
    if !summary.top_errors.is_empty() {
        let _ = writeln!(out, "Top errors:");
        for (issue_type, count) in &summary.top_errors {
            let _ = writeln!(out, "  - {issue_type}: {count} occurrence(s)");
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "IMPROVEMENTS");
    let _ = writeln!(out, "Suggested: {}", c.improvements_suggested);
    let _ = writeln!(
        out,
        "Applied: {} ({:.0}% apply rate)",
        c.improvements_applied,
        percent(c.improvements_applied, c.improvements_suggested)
    );
    let _ = writeln!(out);

    if c.api_calls > 0 {
        let _ = writeln!(out, "NETWORK");
        let _ = writeln!(out, "API calls: {}", c.api_calls);
        let _ = writeln!(
            out,
            "Failures: {} ({:.1}%)",
            c.api_failures,
            percent(c.api_failures, c.api_calls)
        );
        let _ = writeln!(out, "Slow requests: {}", c.slow_requests);
        let _ = writeln!(out);
    }

    if c.tests_run > 0 {
        let _ = writeln!(out, "TESTING");
        let _ = writeln!(out, "Tests run: {}", c.tests_run);
        let _ = writeln!(
            out,
            "Passed: {} ({:.0}%)",
            c.tests_passed,
            percent(c.tests_passed, c.tests_run)
        );
        let _ = writeln!(out, "Failed: {}", c.tests_failed);
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "NOTIFICATIONS");
    let _ = writeln!(
        out,
        "Shown: {}, suppressed: {}",
        c.notifications_shown, c.notifications_suppressed
    );
    let _ = writeln!(out);

    if !summary.recommendations.is_empty() {
        let _ = writeln!(out, "RECOMMENDATIONS");
        for rec in &summary.recommendations {
            let _ = writeln!(out, "  - {rec}");
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "OVERALL QUALITY SCORE: {}/100", summary.quality_score);
    out
}
