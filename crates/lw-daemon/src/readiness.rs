use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use lw_core::types::Severity;
use lw_session::{run_bounded, ProcessError};
use regex::Regex;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

const GIT_TIMEOUT: Duration = Duration::from_secs(30);
const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", ".git", "dist", "build", ".live", "target", ".venv", "venv"];
const SOURCE_DIRS: &[&str] = &["frontend/src", "backend/src", "src"];
const BUILD_DIRS: &[&str] = &["dist", "build", "frontend/dist", "frontend/build"];
const TEST_SUFFIXES: &[&str] = &[
    ".test.js", ".test.jsx", ".test.ts", ".test.tsx", ".spec.js", ".spec.jsx", ".spec.ts", ".spec.tsx",
    "_test.py", "_test.go",
];
const SECRET_SCAN_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "py", "java", "go"];

static DEBUG_PATTERNS: LazyLock<Vec<(Regex, &'static str, bool)>> = LazyLock::new(|| {
    // (pattern, label, python only)
    [
        (r"console\.log\(", "console.log", false),
        (r"console\.debug\(", "console.debug", false),
        (r"\bdebugger\b", "debugger", false),
        (r"(?m)^\s*print\(", "print()", true),
    ]
    .into_iter()
    .map(|(p, label, py)| (Regex::new(p).expect("valid debug pattern regex"), label, py))
    .collect()
});

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r#"(?i)(api[_-]?key|apikey)\s*[=:]\s*["']([a-zA-Z0-9_\-]{20,})["']"#, "API key"),
        (r#"(?i)(password|passwd|pwd)\s*[=:]\s*["']([^"']{8,})["']"#, "password"),
        (r#"(?i)(secret|token)\s*[=:]\s*["']([a-zA-Z0-9_\-]{20,})["']"#, "secret or token"),
        (r#"["']sk-[a-zA-Z0-9]{32,}["']"#, "OpenAI-style API key"),
    ]
    .into_iter()
    .map(|(p, label)| (Regex::new(p).expect("valid secret pattern regex"), label))
    .collect()
});

static INSECURE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"http://[^\s]+").expect("valid insecure url regex")
});

static WILDCARD_CORS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(Access-Control-Allow-Origin.*\*|cors.*origin.*["']?\*["']?|allow_origins\s*=\s*\[\s*["']\*["'])"#)
        .expect("valid cors regex")
});

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessCheck {
    pub name: &'static str,
    pub passed: bool,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ReadinessCheck {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            message: message.into(),
            severity: Severity::Info,
            details: Vec::new(),
        }
    }

    fn fail(name: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            message: message.into(),
            severity,
            details: Vec::new(),
        }
    }

    fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    /// True only when every check passed.
    pub ready: bool,
    /// Percentage of checks passed.
    pub score: u8,
    pub checks: Vec<ReadinessCheck>,
    pub blockers: Vec<String>,
}

impl ReadinessReport {
    fn from_checks(checks: Vec<ReadinessCheck>) -> Self {
        let passed = checks.iter().filter(|c| c.passed).count();
        let score = if checks.is_empty() {
            0
        } else {
            (passed * 100 / checks.len()) as u8
        };
        let blockers = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect();
        Self {
            ready: passed == checks.len(),
            score,
            checks,
            blockers,
        }
    }
}

/// Deployment-readiness checklist for one project directory.
pub struct DeploymentChecker {
    project_dir: PathBuf,
}

impl DeploymentChecker {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    pub async fn check(&self) -> ReadinessReport {
        let dir = self.project_dir.clone();
        let mut checks = match tokio::task::spawn_blocking(move || static_checks(&dir)).await {
            Ok(checks) => checks,
            Err(e) => {
                warn!(error = %e, "readiness scan task failed");
                vec![ReadinessCheck::fail("scan", Severity::High, format!("source scan failed: {e}"))]
            }
        };
        checks.push(self.check_git().await);

        let report = ReadinessReport::from_checks(checks);
        info!(ready = report.ready, score = report.score, blockers = report.blockers.len(),
            "deployment readiness checked");
        report
    }

    async fn check_git(&self) -> ReadinessCheck {
        let mut cmd = Command::new("git");
        cmd.args(["status", "--porcelain"]).current_dir(&self.project_dir);
        match run_bounded(cmd, GIT_TIMEOUT).await {
            Ok(out) if out.success() => {
                if out.stdout.trim().is_empty() {
                    ReadinessCheck::pass("git", "Working tree clean")
                } else {
                    let changed = out.stdout.lines().count();
                    ReadinessCheck::fail("git", Severity::Medium, format!("{changed} uncommitted change(s)"))
                }
            }
            Ok(out) => {
                debug!(exit_code = ?out.exit_code, "git status unavailable");
                ReadinessCheck::pass("git", "Git check skipped (not a repository)")
            }
            Err(ProcessError::Timeout { .. }) => {
                ReadinessCheck::fail("git", Severity::Low, "git status timed out")
            }
            Err(e) => {
                debug!(error = %e, "git not available");
                ReadinessCheck::pass("git", "Git check skipped")
            }
        }
    }
}

fn static_checks(dir: &Path) -> Vec<ReadinessCheck> {
    vec![
        check_tests(dir),
        check_debug_code(dir),
        check_env(dir),
        check_secrets(dir),
        check_dependencies(dir),
        check_build(dir),
        check_security(dir),
    ]
}

fn not_skipped(entry: &DirEntry) -> bool {
    !(entry.file_type().is_dir()
        && entry.depth() > 0
        && SKIPPED_DIRS.iter().any(|s| entry.file_name() == *s))
}

fn source_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(not_skipped)
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or_default()
}

fn relative(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir).unwrap_or(path).display().to_string()
}

fn check_tests(dir: &Path) -> ReadinessCheck {
    let count = source_files(dir)
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            TEST_SUFFIXES.iter().any(|s| name.ends_with(s))
                || (name.starts_with("test_") && name.ends_with(".py"))
        })
        .count();
    if count > 0 {
        ReadinessCheck::pass("tests", format!("Found {count} test file(s)"))
    } else {
        ReadinessCheck::fail("tests", Severity::Critical, "No tests found")
    }
}

fn check_debug_code(dir: &Path) -> ReadinessCheck {
    let mut found = Vec::new();
    for source_dir in SOURCE_DIRS {
        let root = dir.join(source_dir);
        if !root.is_dir() {
            continue;
        }
        for entry in source_files(&root) {
            let ext = extension(entry.path());
            if !matches!(ext, "js" | "jsx" | "ts" | "tsx" | "py") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let hit = DEBUG_PATTERNS
                .iter()
                .find(|(re, _, py_only)| (!py_only || ext == "py") && re.is_match(&content));
            if let Some((_, label, _)) = hit {
                found.push(format!("{} ({label})", relative(dir, entry.path())));
            }
        }
    }
    found.sort();
    found.dedup();
    if found.is_empty() {
        ReadinessCheck::pass("debug_code", "No debug code found")
    } else {
        let message = format!("Found debug code in {} file(s)", found.len());
        found.truncate(5);
        ReadinessCheck::fail("debug_code", Severity::High, message).with_details(found)
    }
}

fn check_env(dir: &Path) -> ReadinessCheck {
    let has_example = dir.join(".env.example").is_file();
    if dir.join(".env").is_file() {
        let ignored = fs::read_to_string(dir.join(".gitignore"))
            .map(|g| g.lines().any(|l| matches!(l.trim(), ".env" | ".env*" | "*.env" | "/.env")))
            .unwrap_or(false);
        if !ignored {
            return ReadinessCheck::fail(
                "env_vars",
                Severity::Critical,
                ".env file exists but is not in .gitignore",
            );
        }
    }
    if has_example {
        ReadinessCheck::pass("env_vars", ".env.example found")
    } else {
        ReadinessCheck::fail("env_vars", Severity::Medium, ".env.example missing")
    }
}

fn check_secrets(dir: &Path) -> ReadinessCheck {
    let mut found = Vec::new();
    for entry in source_files(dir) {
        if !SECRET_SCAN_EXTENSIONS.contains(&extension(entry.path())) {
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        for (re, label) in SECRET_PATTERNS.iter() {
            for m in re.find_iter(&content) {
                let text = m.as_str().to_lowercase();
                if text.contains("your_") || text.contains("placeholder") {
                    continue;
                }
                let line = content[..m.start()].matches('\n').count() + 1;
                found.push(format!("{}:{line} ({label})", relative(dir, entry.path())));
            }
        }
    }
    if found.is_empty() {
        ReadinessCheck::pass("secrets", "No hardcoded secrets detected")
    } else {
        let message = format!("Found {} potential hardcoded secret(s)", found.len());
        found.truncate(3);
        ReadinessCheck::fail("secrets", Severity::Critical, message).with_details(found)
    }
}

fn check_dependencies(dir: &Path) -> ReadinessCheck {
    let Ok(raw) = fs::read_to_string(dir.join("package.json")) else {
        return ReadinessCheck::pass("dependencies", "No package.json found");
    };
    let pkg: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            return ReadinessCheck::fail("dependencies", Severity::High, format!("package.json is invalid: {e}"))
        }
    };
    let mut total = 0usize;
    let mut warnings = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(deps) = pkg.get(section).and_then(|d| d.as_object()) {
            for (name, version) in deps {
                total += 1;
                let version = version.as_str().unwrap_or_default();
                if version.starts_with("^0.") || version.starts_with("~0.") || version.starts_with("0.") {
                    warnings.push(format!("{name}@{version} (pre-1.0)"));
                }
            }
        }
    }
    if warnings.is_empty() {
        ReadinessCheck::pass("dependencies", format!("{total} dependencies checked"))
    } else {
        ReadinessCheck::fail(
            "dependencies",
            Severity::Low,
            format!("{total} dependencies, {} warning(s)", warnings.len()),
        )
        .with_details(warnings)
    }
}

fn check_build(dir: &Path) -> ReadinessCheck {
    for build_dir in BUILD_DIRS {
        let non_empty = fs::read_dir(dir.join(build_dir))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if non_empty {
            return ReadinessCheck::pass("build", format!("Build output found in {build_dir}"));
        }
    }
    ReadinessCheck::fail("build", Severity::High, "No build output found")
}

fn check_security(dir: &Path) -> ReadinessCheck {
    let mut issues = Vec::new();
    for env_file in [".env.production", ".env"] {
        let Ok(content) = fs::read_to_string(dir.join(env_file)) else {
            continue;
        };
        let insecure = INSECURE_URL.find_iter(&content).any(|m| {
            let url = m.as_str();
            !url.starts_with("http://localhost") && !url.starts_with("http://127.0.0.1")
        });
        if insecure {
            issues.push(format!("Non-HTTPS URL in {env_file}"));
        }
    }

    let backend = dir.join("backend");
    if backend.is_dir() {
        let wildcard = source_files(&backend)
            .filter(|e| matches!(extension(e.path()), "js" | "ts" | "py"))
            .any(|e| {
                fs::read_to_string(e.path())
                    .map(|c| WILDCARD_CORS.is_match(&c))
                    .unwrap_or(false)
            });
        if wildcard {
            issues.push("Wildcard CORS in backend".to_string());
        }
    }

    if issues.is_empty() {
        ReadinessCheck::pass("security", "Basic security checks passed")
    } else {
        ReadinessCheck::fail("security", Severity::High, format!("{} security issue(s) found", issues.len()))
            .with_details(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn score_is_share_of_passed_checks() {
        let report = ReadinessReport::from_checks(vec![
            ReadinessCheck::pass("a", "ok"),
            ReadinessCheck::pass("b", "ok"),
            ReadinessCheck::pass("c", "ok"),
            ReadinessCheck::fail("d", Severity::High, "bad"),
        ]);
        assert!(!report.ready);
        assert_eq!(report.score, 75);
        assert_eq!(report.blockers, vec!["d: bad".to_string()]);
    }

    #[test]
    fn debug_code_only_flags_python_prints_in_python() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/app.js", "window.print();\n");
        assert!(check_debug_code(dir.path()).passed);

        write(dir.path(), "src/tool.py", "def main():\n    print('hi')\n");
        let check = check_debug_code(dir.path());
        assert!(!check.passed);
        assert_eq!(check.details, vec!["src/tool.py (print())".to_string()]);
    }

    #[test]
    fn env_file_must_be_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".env", "API_URL=https://api.example.com\n");
        write(dir.path(), ".env.example", "API_URL=\n");
        assert_eq!(check_env(dir.path()).severity, Severity::Critical);

        write(dir.path(), ".gitignore", "node_modules\n.env\n");
        assert!(check_env(dir.path()).passed);
    }

    #[test]
    fn secrets_skip_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "backend/config.py", "API_KEY = 'your_api_key_goes_here_12345'\n");
        assert!(check_secrets(dir.path()).passed);

        write(dir.path(), "backend/keys.py", "\nAPI_KEY = 'abcdefghijklmnopqrstuvwx'\n");
        let check = check_secrets(dir.path());
        assert!(!check.passed);
        assert_eq!(check.details, vec!["backend/keys.py:2 (API key)".to_string()]);
    }

    #[test]
    fn pre_release_npm_dependencies_warn() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"dependencies": {"react": "^18.2.0", "tiny": "^0.3.1"}}"#,
        );
        let check = check_dependencies(dir.path());
        assert!(!check.passed);
        assert_eq!(check.severity, Severity::Low);
        assert_eq!(check.details, vec!["tiny@^0.3.1 (pre-1.0)".to_string()]);
    }

    #[test]
    fn security_flags_plain_http_and_wildcard_cors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".env", "API=http://localhost:8000\n");
        write(dir.path(), "backend/main.py", "app = FastAPI()\n");
        assert!(check_security(dir.path()).passed);

        write(dir.path(), ".env.production", "API=http://api.example.com\n");
        write(
            dir.path(),
            "backend/server.js",
            "app.use(cors({ origin: '*' }));\n",
        );
        let check = check_security(dir.path());
        assert!(!check.passed);
        assert_eq!(check.details.len(), 2);
    }
}
