use lw_core::types::{Issue, Severity};
use serde::{Deserialize, Serialize};

/// What the scheduler decided to show the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Single { issue: Issue },
    /// Several issues for one file collapsed into one message.
    Batch { file: String, issues: Vec<Issue> },
}

impl Notification {
    /// Highest severity carried by the notification.
    pub fn severity(&self) -> Severity {
        match self {
            Notification::Single { issue } => issue.severity,
            Notification::Batch { issues, .. } => issues
                .iter()
                .map(|i| i.severity)
                .min()
                .unwrap_or(Severity::Info),
        }
    }

    pub fn issues(&self) -> &[Issue] {
        match self {
            Notification::Single { issue } => std::slice::from_ref(issue),
            Notification::Batch { issues, .. } => issues,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            Notification::Single { issue } => &issue.file,
            Notification::Batch { file, .. } => file,
        }
    }

    /// One-line summary for logs and plain-text hosts.
    pub fn summary(&self) -> String {
        match self {
            Notification::Single { issue } => match issue.line {
                Some(line) => format!(
                    "[{}] {}:{} {}",
                    issue.severity, issue.file, line, issue.message
                ),
                None => format!("[{}] {} {}", issue.severity, issue.file, issue.message),
            },
            Notification::Batch { file, issues } => {
                format!("[{}] {} issues in {}", self.severity(), issues.len(), file)
            }
        }
    }
}

/// Structured events the controller publishes on the [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LiveEvent {
    StateChanged {
        state: String,
    },
    Notification(Notification),
    AdapterFailed {
        component: String,
        error: String,
    },
    FixApplied {
        fix_id: String,
        file: String,
    },
    FixFailed {
        file: String,
        error: String,
        backup_restored: bool,
    },
    FixUndone {
        fix_id: String,
        file: String,
    },
    DeepAnalysis {
        file: String,
        status: String,
    },
    TestsCompleted {
        success: bool,
        passed: u32,
        failed: u32,
    },
    FixesCommitted {
        hash: String,
        fix_ids: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use lw_core::types::IssueType;

    #[test]
    fn batch_reports_most_severe() {
        let issues = vec![
            Issue::new(IssueType::DebugCode, Severity::Low, "a.js", "x"),
            Issue::new(IssueType::TypeError, Severity::Critical, "a.js", "y"),
        ];
        let n = Notification::Batch {
            file: "a.js".into(),
            issues,
        };
        assert_eq!(n.severity(), Severity::Critical);
        assert_eq!(n.summary(), "[critical] 2 issues in a.js");
    }

    #[test]
    fn events_are_tagged() {
        let json = serde_json::to_value(LiveEvent::FixUndone {
            fix_id: "fix_1".into(),
            file: "a.py".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "fix_undone");
        assert_eq!(json["payload"]["fix_id"], "fix_1");
    }
}
