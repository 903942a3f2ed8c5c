use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Issue severity. Declaration order is most to least severe, so the derived
/// `Ord` sorts critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// High and critical issues trigger deep analysis and interrupt the user.
    pub fn is_urgent(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }

    /// Low and info issues are only surfaced on request.
    pub fn is_passive(self) -> bool {
        matches!(self, Severity::Low | Severity::Info)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// IssueType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    // --- Build and runtime diagnostics ---
    SyntaxError,
    ModuleNotFound,
    BuildFailed,
    BuildError,
    TypeError,
    ReferenceError,
    RuntimeError,
    UnhandledRejection,
    PortInUse,
    ConnectionRefused,
    PackageError,
    DependencyConflict,
    PeerDependency,
    DbConnectionRefused,
    AuthFailed,
    TableNotFound,
    ColumnNotFound,
    Warning,
    Deprecation,
    BrowserError,

    // --- Source heuristics ---
    MissingErrorHandling,
    MissingNullCheck,
    MissingKeyProp,
    BareExcept,
    MissingTypeHints,
    DebugCode,
    HardcodedSecret,
    TodoComment,

    // --- Network ---
    NetworkError,
    SlowRequest,
    EndpointMismatch,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::SyntaxError => "syntax_error",
            IssueType::ModuleNotFound => "module_not_found",
            IssueType::BuildFailed => "build_failed",
            IssueType::BuildError => "build_error",
            IssueType::TypeError => "type_error",
            IssueType::ReferenceError => "reference_error",
            IssueType::RuntimeError => "runtime_error",
            IssueType::UnhandledRejection => "unhandled_rejection",
            IssueType::PortInUse => "port_in_use",
            IssueType::ConnectionRefused => "connection_refused",
            IssueType::PackageError => "package_error",
            IssueType::DependencyConflict => "dependency_conflict",
            IssueType::PeerDependency => "peer_dependency",
            IssueType::DbConnectionRefused => "db_connection_refused",
            IssueType::AuthFailed => "auth_failed",
            IssueType::TableNotFound => "table_not_found",
            IssueType::ColumnNotFound => "column_not_found",
            IssueType::Warning => "warning",
            IssueType::Deprecation => "deprecation",
            IssueType::BrowserError => "browser_error",
            IssueType::MissingErrorHandling => "missing_error_handling",
            IssueType::MissingNullCheck => "missing_null_check",
            IssueType::MissingKeyProp => "missing_key_prop",
            IssueType::BareExcept => "bare_except",
            IssueType::MissingTypeHints => "missing_type_hints",
            IssueType::DebugCode => "debug_code",
            IssueType::HardcodedSecret => "hardcoded_secret",
            IssueType::TodoComment => "todo_comment",
            IssueType::NetworkError => "network_error",
            IssueType::SlowRequest => "slow_request",
            IssueType::EndpointMismatch => "endpoint_mismatch",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Filesystem,
    Process,
    Browser,
    Network,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalSource::Filesystem => "filesystem",
            SignalSource::Process => "process",
            SignalSource::Browser => "browser",
            SignalSource::Network => "network",
        };
        f.write_str(label)
    }
}

/// One observed HTTP call, as reported by the injected browser script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCall {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, alias = "duration")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl HttpCall {
    pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            status: Some(status),
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SignalPayload {
    Text(String),
    HttpCall(HttpCall),
}

/// A normalized unit of change or error information from one adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source: SignalSource,
    pub payload: SignalPayload,
    pub file: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn text(source: SignalSource, payload: impl Into<String>) -> Self {
        Self {
            source,
            payload: SignalPayload::Text(payload.into()),
            file: None,
            timestamp: Utc::now(),
        }
    }

    pub fn http_call(call: HttpCall) -> Self {
        Self {
            source: SignalSource::Network,
            payload: SignalPayload::HttpCall(call),
            file: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Text content of the payload; empty for structured payloads.
    pub fn text_payload(&self) -> &str {
        match &self.payload {
            SignalPayload::Text(text) => text,
            SignalPayload::HttpCall(_) => "",
        }
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// A classified finding. Issues are never mutated after creation; a repeated
/// detection produces a fresh `Issue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub file: String,
    pub line: Option<u32>,
    pub message: String,
    pub suggestion: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    pub fn new(
        issue_type: IssueType,
        severity: Severity,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_type,
            severity,
            file: file.into(),
            line: None,
            message: message.into(),
            suggestion: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Identity used for notification dedup: type, file and the first
    /// `prefix_chars` characters of the message.
    pub fn dedup_key(&self, prefix_chars: usize) -> DedupKey {
        DedupKey {
            issue_type: self.issue_type,
            file: self.file.clone(),
            message_prefix: self.message.chars().take(prefix_chars).collect(),
        }
    }

    /// Content equality ignoring identity and creation time.
    pub fn same_finding(&self, other: &Issue) -> bool {
        self.issue_type == other.issue_type
            && self.severity == other.severity
            && self.file == other.file
            && self.line == other.line
            && self.message == other.message
            && self.suggestion == other.suggestion
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub issue_type: IssueType,
    pub file: String,
    pub message_prefix: String,
}
