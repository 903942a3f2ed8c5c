//! Tier-1 rule tables.
//!
//! Diagnostic rules scan build, dev-server and browser output and are applied
//! first-match in table order. Source rules scan file content line by line and
//! are grouped into families selected once per file from its [`Language`].

use lw_core::language::Language;
use lw_core::types::{IssueType, Severity};
use regex::Regex;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Diagnostic rules
// ---------------------------------------------------------------------------

pub struct DiagnosticRule {
    pattern: Regex,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub suggestion: &'static str,
}

impl DiagnosticRule {
    pub fn is_match(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    /// Message for a matching line: the first capture group when the rule
    /// has one and it is non-empty, otherwise the whole trimmed line.
    pub fn message(&self, line: &str) -> String {
        self.pattern
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| line.trim())
            .to_string()
    }
}

static DIAGNOSTIC_RULES: LazyLock<Vec<DiagnosticRule>> = LazyLock::new(|| {
    use IssueType as T;
    use Severity as S;
    [
        // Build
        (r"(?i)SyntaxError:?\s*(.*)", T::SyntaxError, S::Critical, "Check the reported line for a typo, missing bracket or stray character"),
        (r"(?i)\bunexpected (?:token|end of (?:input|file)|indent(?:ation)?)\b", T::SyntaxError, S::Critical, "Check the reported line for a typo, missing bracket or stray character"),
        (r"(?i)Module not found:?\s*(.*)", T::ModuleNotFound, S::Critical, "Install the missing package or fix the import path"),
        (r"(?i)Cannot find module\s*(.*)", T::ModuleNotFound, S::Critical, "Install the missing package or fix the import path"),
        (r"(?i)Failed to compile", T::BuildFailed, S::Critical, "Fix the first compile error shown above this line"),
        (r"(?i)Build failed", T::BuildFailed, S::Critical, "Fix the first compile error shown above this line"),
        (r"(?i)ERROR in\s+(.+)", T::BuildError, S::High, "Open the referenced file and fix the build error"),
        // Runtime
        (r"(?i)TypeError:?\s*(.*)", T::TypeError, S::Critical, "Check for undefined or null values before use"),
        (r"(?i)ReferenceError:?\s*(.*)", T::ReferenceError, S::Critical, "Define or import the referenced name"),
        (r"(?i)EADDRINUSE\s*(.*)", T::PortInUse, S::High, "Stop the other process on this port or change the port"),
        (r"ECONNREFUSED", T::ConnectionRefused, S::High, "Make sure the target service is running"),
        // Dependencies
        (r"(?i)npm ERR!\s*(.*)", T::PackageError, S::High, "Re-run the install and read the first npm error"),
        (r"(?i)ERESOLVE unable to resolve dependency", T::DependencyConflict, S::High, "Align the conflicting versions or install with --legacy-peer-deps"),
        (r"(?i)peer dependency", T::PeerDependency, S::Medium, "Install the required peer dependency version"),
        // Database
        (r"(?i)Connection refused", T::DbConnectionRefused, S::High, "Make sure the database is running and the connection URL is right"),
        (r"(?i)Authentication failed", T::AuthFailed, S::High, "Check the database credentials"),
        (r"(?i)relation .+ does not exist", T::TableNotFound, S::High, "Run the pending migrations"),
        (r"(?i)column .+ does not exist", T::ColumnNotFound, S::High, "Run the pending migrations or fix the column name"),
        // Compiler and promise diagnostics
        (r"\bTS\d{4,5}:\s*(.*)", T::TypeError, S::High, "Fix the type error reported by the TypeScript compiler"),
        (r"(?i)unhandled (?:promise )?rejection:?\s*(.*)", T::UnhandledRejection, S::High, "Add a .catch() handler or try/await around the promise"),
        // Warnings
        (r"(?i)DeprecationWarning:?\s*(.*)", T::Deprecation, S::Low, "Move to the replacement API before it is removed"),
        (r"(?i)\bWarning:\s*(.+)", T::Warning, S::Medium, "Review the warning before it turns into an error"),
        // Catch-all
        (r"(?i)\b(?:uncaught\s+)?error:\s*(.+)", T::RuntimeError, S::Medium, "Read the stack trace to find where the error was raised"),
    ]
    .into_iter()
    .map(|(pattern, issue_type, severity, suggestion)| DiagnosticRule {
        pattern: Regex::new(pattern).expect("valid diagnostic pattern"),
        issue_type,
        severity,
        suggestion,
    })
    .collect()
});

pub fn diagnostic_rules() -> &'static [DiagnosticRule] {
    &DIAGNOSTIC_RULES
}

/// First diagnostic rule matching `line`, in table order.
pub fn match_diagnostic(line: &str) -> Option<&'static DiagnosticRule> {
    DIAGNOSTIC_RULES.iter().find(|r| r.is_match(line))
}

// ---------------------------------------------------------------------------
// Location extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

static FILE_LINE_COL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([\w./\\@~-]+\.(?:jsx?|tsx?|mjs|cjs|vue|svelte|py|java|go|rs|rb|php|kt|swift))(?::|\()(\d+)(?:[:,](\d+))?",
    )
    .expect("valid file location regex")
});
static PY_TRACEBACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "(.+?)", line (\d+)"#).expect("valid traceback regex"));
static BARE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bline\s+(\d+)").expect("valid line regex"));

/// Pull a file path and line number out of a diagnostic line.
pub fn extract_location(text: &str) -> Option<Location> {
    if let Some(c) = PY_TRACEBACK.captures(text) {
        return Some(Location {
            file: Some(c[1].to_string()),
            line: c[2].parse().ok(),
            column: None,
        });
    }
    if let Some(c) = FILE_LINE_COL.captures(text) {
        return Some(Location {
            file: Some(c[1].to_string()),
            line: c[2].parse().ok(),
            column: c.get(3).and_then(|m| m.as_str().parse().ok()),
        });
    }
    BARE_LINE.captures(text).map(|c| Location {
        file: None,
        line: c[1].parse().ok(),
        column: None,
    })
}

// ---------------------------------------------------------------------------
// Source rules
// ---------------------------------------------------------------------------

/// The text a source rule sees: one line plus up to 200 bytes before it.
pub struct LineContext<'a> {
    pub line: &'a str,
    pub preceding: &'a str,
}

pub struct SourceRule {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub message: &'static str,
    pub suggestion: &'static str,
    pub applies: fn(&LineContext<'_>) -> bool,
}

/// Rule family, resolved once per file from its language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFamily {
    JavaScript,
    Python,
    Generic,
}

impl RuleFamily {
    pub fn for_language(language: Language) -> Self {
        if language.is_javascript_like() {
            RuleFamily::JavaScript
        } else if language == Language::Python {
            RuleFamily::Python
        } else {
            RuleFamily::Generic
        }
    }

    /// Language-specific rules; the generic set is applied separately to
    /// every family.
    pub fn rules(self) -> &'static [SourceRule] {
        match self {
            RuleFamily::JavaScript => JS_RULES,
            RuleFamily::Python => PY_RULES,
            RuleFamily::Generic => &[],
        }
    }
}

pub fn generic_rules() -> &'static [SourceRule] {
    GENERIC_RULES
}

static HTTP_CALL_JS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:fetch|axios(?:\.\w+)?)\s*\(").expect("valid regex"));
static CHAINED_ACCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:user|data|response)\.\w+\.\w+").expect("valid regex"));
static HTTP_CALL_PY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\brequests\.(?:get|post|put|patch|delete|head|request)\s*\(").expect("valid regex")
});
static BARE_EXCEPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*except\s*:").expect("valid regex"));
static UNANNOTATED_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*def\s+\w+\s*\([^)]*\)\s*:").expect("valid regex"));
static PRINT_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*print\(").expect("valid regex"));
static ASSIGNED_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(password|secret|api_key|token)\s*[=:]\s*["'][\w-]{8,}["']"#)
        .expect("valid regex")
});
static KEY_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:sk-[A-Za-z0-9_-]{20,}|AKIA[0-9A-Z]{16}|ghp_[A-Za-z0-9]{36})\b")
        .expect("valid regex")
});
static TODO_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:TODO|FIXME|HACK|XXX):").expect("valid regex"));
static DEBUG_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w.])debugger\s*;?\s*$|\bbreakpoint\(\)|\bpdb\.set_trace\(\)|\bdbg!\(")
        .expect("valid regex")
});

fn js_unguarded_request(ctx: &LineContext<'_>) -> bool {
    HTTP_CALL_JS.is_match(ctx.line)
        && ctx.line.contains("await")
        && !ctx.line.contains(".catch")
        && !ctx.preceding.contains("try")
}

fn js_unchecked_access(ctx: &LineContext<'_>) -> bool {
    let trimmed = ctx.line.trim_start();
    !trimmed.starts_with("import ")
        && !ctx.line.contains("?.")
        && CHAINED_ACCESS.is_match(ctx.line)
}

fn js_unkeyed_map(ctx: &LineContext<'_>) -> bool {
    ctx.line.contains(".map(") && ctx.line.contains('<') && !ctx.line.contains("key=")
}

fn js_console_log(ctx: &LineContext<'_>) -> bool {
    ctx.line.contains("console.log") && !ctx.line.to_ascii_lowercase().contains("debug")
}

fn py_unguarded_request(ctx: &LineContext<'_>) -> bool {
    HTTP_CALL_PY.is_match(ctx.line) && !ctx.preceding.contains("try")
}

fn py_bare_except(ctx: &LineContext<'_>) -> bool {
    BARE_EXCEPT.is_match(ctx.line)
}

fn py_unannotated_def(ctx: &LineContext<'_>) -> bool {
    UNANNOTATED_DEF.is_match(ctx.line)
        && !ctx.line.contains("->")
        && (ctx.line.contains("self") || !ctx.line.contains("__init__"))
}

fn py_print(ctx: &LineContext<'_>) -> bool {
    PRINT_CALL.is_match(ctx.line)
}

fn any_secret(ctx: &LineContext<'_>) -> bool {
    ASSIGNED_SECRET.is_match(ctx.line) || KEY_LITERAL.is_match(ctx.line)
}

fn any_todo(ctx: &LineContext<'_>) -> bool {
    TODO_MARKER.is_match(ctx.line)
}

fn any_debug_marker(ctx: &LineContext<'_>) -> bool {
    DEBUG_MARKER.is_match(ctx.line)
}

static JS_RULES: &[SourceRule] = &[
    SourceRule {
        issue_type: IssueType::MissingErrorHandling,
        severity: Severity::High,
        message: "Fetch/axios call without error handling",
        suggestion: "Wrap the call in try/catch or add a .catch() handler",
        applies: js_unguarded_request,
    },
    SourceRule {
        issue_type: IssueType::MissingNullCheck,
        severity: Severity::Medium,
        message: "Property access without null check",
        suggestion: "Use optional chaining (?.) or add a null check",
        applies: js_unchecked_access,
    },
    SourceRule {
        issue_type: IssueType::MissingKeyProp,
        severity: Severity::Medium,
        message: "Missing 'key' prop in list rendering",
        suggestion: "Add key={item.id} to mapped elements",
        applies: js_unkeyed_map,
    },
    SourceRule {
        issue_type: IssueType::DebugCode,
        severity: Severity::Low,
        message: "console.log left in code",
        suggestion: "Remove it or use a proper logger",
        applies: js_console_log,
    },
];

static PY_RULES: &[SourceRule] = &[
    SourceRule {
        issue_type: IssueType::MissingErrorHandling,
        severity: Severity::High,
        message: "HTTP request without error handling",
        suggestion: "Wrap the request in try/except",
        applies: py_unguarded_request,
    },
    SourceRule {
        issue_type: IssueType::BareExcept,
        severity: Severity::Medium,
        message: "Bare except clause catches all exceptions",
        suggestion: "Name the exception type: except Exception as e:",
        applies: py_bare_except,
    },
    SourceRule {
        issue_type: IssueType::MissingTypeHints,
        severity: Severity::Low,
        message: "Function missing type hints",
        suggestion: "Add parameter and return annotations",
        applies: py_unannotated_def,
    },
    SourceRule {
        issue_type: IssueType::DebugCode,
        severity: Severity::Low,
        message: "print() left in code",
        suggestion: "Remove it or use the logging module",
        applies: py_print,
    },
];

static GENERIC_RULES: &[SourceRule] = &[
    SourceRule {
        issue_type: IssueType::HardcodedSecret,
        severity: Severity::Critical,
        message: "Potential hardcoded secret/credential",
        suggestion: "Move it to an environment variable",
        applies: any_secret,
    },
    SourceRule {
        issue_type: IssueType::TodoComment,
        severity: Severity::Info,
        message: "TODO/FIXME comment found",
        suggestion: "Address this before production",
        applies: any_todo,
    },
    SourceRule {
        issue_type: IssueType::DebugCode,
        severity: Severity::Low,
        message: "Debugger statement left in code",
        suggestion: "Remove the breakpoint before committing",
        applies: any_debug_marker,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(line: &str) -> LineContext<'_> {
        LineContext {
            line,
            preceding: "",
        }
    }

    #[test]
    fn diagnostic_first_match_wins() {
        let rule = match_diagnostic("Error: listen EADDRINUSE: address already in use :::3000")
            .expect("match");
        assert_eq!(rule.issue_type, IssueType::PortInUse);

        let rule = match_diagnostic("(node:1) DeprecationWarning: Buffer() is deprecated").unwrap();
        assert_eq!(rule.issue_type, IssueType::Deprecation);
        assert_eq!(rule.severity, Severity::Low);

        let rule = match_diagnostic("Uncaught TypeError: x is undefined").unwrap();
        assert_eq!(rule.issue_type, IssueType::TypeError);
        assert_eq!(rule.message("Uncaught TypeError: x is undefined"), "x is undefined");
    }

    #[test]
    fn diagnostic_without_capture_uses_whole_line() {
        let line = "  unexpected token at line 12 ";
        let rule = match_diagnostic(line).unwrap();
        assert_eq!(rule.issue_type, IssueType::SyntaxError);
        assert_eq!(rule.message(line), "unexpected token at line 12");
    }

    #[test]
    fn plain_output_does_not_match() {
        assert!(match_diagnostic("Compiled successfully in 812ms").is_none());
        assert!(match_diagnostic("GET /api/users 200 12ms").is_none());
    }

    #[test]
    fn location_extraction_variants() {
        let loc = extract_location("    at render (/app/src/App.jsx:42:13)").unwrap();
        assert_eq!(loc.file.as_deref(), Some("/app/src/App.jsx"));
        assert_eq!(loc.line, Some(42));
        assert_eq!(loc.column, Some(13));

        let loc = extract_location(r#"  File "api/main.py", line 7, in <module>"#).unwrap();
        assert_eq!(loc.file.as_deref(), Some("api/main.py"));
        assert_eq!(loc.line, Some(7));

        let loc = extract_location("src/index.ts(12,5): error TS2322").unwrap();
        assert_eq!(loc.line, Some(12));
        assert_eq!(loc.column, Some(5));

        let loc = extract_location("unexpected token at line 12").unwrap();
        assert_eq!(loc.file, None);
        assert_eq!(loc.line, Some(12));

        assert!(extract_location("nothing here").is_none());
    }

    #[test]
    fn family_selection() {
        assert_eq!(RuleFamily::for_language(Language::TypeScript), RuleFamily::JavaScript);
        assert_eq!(RuleFamily::for_language(Language::Python), RuleFamily::Python);
        assert_eq!(RuleFamily::for_language(Language::Unknown), RuleFamily::Generic);
        assert!(RuleFamily::Generic.rules().is_empty());
    }

    #[test]
    fn js_request_guard_respects_try() {
        let line = "const res = await fetch('/api/users');";
        assert!(js_unguarded_request(&ctx(line)));
        assert!(!js_unguarded_request(&LineContext {
            line,
            preceding: "async function load() {\n  try {\n",
        }));
        assert!(!js_unguarded_request(&ctx("await fetch(url).catch(handle)")));
    }

    #[test]
    fn secret_and_debug_markers() {
        assert!(any_secret(&ctx(r#"const API_KEY = "abcd1234efgh""#)));
        assert!(any_secret(&ctx(r#"password: 'hunter2hunter2'"#)));
        assert!(any_secret(&ctx("key = sk-ABCDEFGHIJKLMNOPQRSTUVWX")));
        assert!(!any_secret(&ctx("password = os.environ['DB_PASSWORD']")));

        assert!(any_debug_marker(&ctx("    debugger;")));
        assert!(any_debug_marker(&ctx("import pdb; pdb.set_trace()")));
        assert!(any_debug_marker(&ctx("let x = dbg!(y);")));
        assert!(!any_debug_marker(&ctx("const debuggerEnabled = true;")));
    }

    #[test]
    fn python_rules() {
        assert!(py_bare_except(&ctx("    except:")));
        assert!(!py_bare_except(&ctx("    except ValueError:")));
        assert!(py_unannotated_def(&ctx("def load(path):")));
        assert!(!py_unannotated_def(&ctx("def load(path) -> str:")));
        assert!(py_unguarded_request(&ctx("r = requests.get(url)")));
    }
}
