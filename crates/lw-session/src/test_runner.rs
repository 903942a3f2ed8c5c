//! Detects the project's test framework, runs it as a bounded subprocess and
//! parses the summary out of its output.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lw_core::config::TestsConfig;
use regex::Regex;
use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::bounded::{run_bounded, CommandOutput, ProcessError};

const HISTORY_CAPACITY: usize = 50;
const OUTPUT_TAIL_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Jest,
    Vitest,
    Mocha,
    Pytest,
    Cargo,
    Go,
    Maven,
    Gradle,
}

impl Framework {
    pub fn as_str(self) -> &'static str {
        match self {
            Framework::Jest => "jest",
            Framework::Vitest => "vitest",
            Framework::Mocha => "mocha",
            Framework::Pytest => "pytest",
            Framework::Cargo => "cargo",
            Framework::Go => "go",
            Framework::Maven => "maven",
            Framework::Gradle => "gradle",
        }
    }

    /// Inspect marker files in `project_dir`.
    pub fn detect(project_dir: &Path) -> Option<Framework> {
        if let Some(js) = detect_node(&project_dir.join("package.json")) {
            return Some(js);
        }
        if ["pytest.ini", "setup.cfg", "pyproject.toml"]
            .iter()
            .any(|f| project_dir.join(f).is_file())
        {
            return Some(Framework::Pytest);
        }
        if project_dir.join("Cargo.toml").is_file() {
            return Some(Framework::Cargo);
        }
        let has_go_tests = std::fs::read_dir(project_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .any(|e| e.file_name().to_string_lossy().ends_with("_test.go"))
            })
            .unwrap_or(false);
        if has_go_tests {
            return Some(Framework::Go);
        }
        if project_dir.join("pom.xml").is_file() {
            return Some(Framework::Maven);
        }
        if project_dir.join("build.gradle").is_file() {
            return Some(Framework::Gradle);
        }
        None
    }

    fn command(self, scope: &TestScope) -> (String, Vec<String>) {
        let file = match scope {
            TestScope::File(path) => Some(path.to_string_lossy().into_owned()),
            _ => None,
        };
        let mut args: Vec<String> = Vec::new();
        let program = match self {
            Framework::Jest => {
                args.extend(["test", "--", "--passWithNoTests"].map(String::from));
                match scope {
                    TestScope::Changed => args.push("--onlyChanged".into()),
                    TestScope::Failed => args.push("--onlyFailures".into()),
                    _ => {}
                }
                "npm"
            }
            Framework::Vitest => {
                args.extend(["vitest", "run"].map(String::from));
                if matches!(scope, TestScope::Changed) {
                    args.push("--changed".into());
                }
                "npx"
            }
            Framework::Mocha => {
                args.push("mocha".into());
                "npx"
            }
            Framework::Pytest => {
                args.push("-v".into());
                if matches!(scope, TestScope::Failed) {
                    args.push("--last-failed".into());
                }
                "pytest"
            }
            Framework::Cargo => {
                args.push("test".into());
                "cargo"
            }
            Framework::Go => {
                args.push("test".into());
                if file.is_none() {
                    args.push("./...".into());
                }
                "go"
            }
            Framework::Maven => {
                args.push("test".into());
                "mvn"
            }
            Framework::Gradle => {
                args.push("test".into());
                "./gradlew"
            }
        };
        if let Some(file) = file {
            if !matches!(self, Framework::Cargo | Framework::Maven | Framework::Gradle) {
                args.push(file);
            }
        }
        (program.to_string(), args)
    }
}

fn detect_node(package_json: &Path) -> Option<Framework> {
    let raw = std::fs::read_to_string(package_json).ok()?;
    let pkg: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let has_dep = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| pkg.get(section).and_then(|d| d.get(name)).is_some())
    };
    let test_script = pkg
        .pointer("/scripts/test")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    if has_dep("jest") || test_script.contains("jest") {
        Some(Framework::Jest)
    } else if has_dep("vitest") || test_script.contains("vitest") {
        Some(Framework::Vitest)
    } else if has_dep("mocha") || test_script.contains("mocha") {
        Some(Framework::Mocha)
    } else {
        None
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tests to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestScope {
    All,
    /// Tests affected by uncommitted changes, where the framework supports it.
    Changed,
    /// Tests that failed on the previous run, where the framework supports it.
    Failed,
    File(PathBuf),
}

impl FromStr for TestScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "all" => Ok(TestScope::All),
            "changed" => Ok(TestScope::Changed),
            "failed" => Ok(TestScope::Failed),
            other => match other.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(TestScope::File(PathBuf::from(path))),
                _ => Err(format!("unknown test scope '{other}'")),
            },
        }
    }
}

impl fmt::Display for TestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestScope::All => f.write_str("all"),
            TestScope::Changed => f.write_str("changed"),
            TestScope::Failed => f.write_str("failed"),
            TestScope::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestResult {
    pub success: bool,
    pub framework: Option<Framework>,
    pub scope: String,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub failed_tests: Vec<String>,
    pub duration_ms: u64,
    pub output_tail: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    fn failure(framework: Option<Framework>, scope: &TestScope, error: impl Into<String>) -> Self {
        Self {
            framework,
            scope: scope.to_string(),
            error: Some(error.into()),
            timestamp: Utc::now(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestStats {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub total_passed: u64,
    pub total_failed: u64,
    /// Percentage of individual tests passed, 0 when nothing ran.
    pub pass_rate: f64,
}

static JEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(\d+)\s+failed,\s*)?(?:(\d+)\s+skipped,\s*)?(?:(\d+)\s+passed,\s*)?(\d+)\s+total")
        .expect("valid jest summary regex")
});
static JEST_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*● (.+? › .+)$").expect("valid jest failure regex"));
static VITEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests\s+(?:(\d+)\s+failed\s*\|\s*)?(?:(\d+)\s+passed)?(?:\s*\|\s*(\d+)\s+skipped)?\s*\((\d+)\)")
        .expect("valid vitest summary regex")
});
static PYTEST_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+(passed|failed|skipped|error|errors)\b").expect("valid pytest count regex")
});
static PYTEST_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^FAILED (\S+)").expect("valid pytest failure regex"));
static GO_RESULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--- (PASS|FAIL|SKIP): (\S+)").expect("valid go result regex"));
static CARGO_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored")
        .expect("valid cargo result regex")
});
static CARGO_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^test (\S+) \.\.\. FAILED$").expect("valid cargo failure regex"));

fn num(m: Option<regex::Match<'_>>) -> u32 {
    m.and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
}

/// Fill counts from framework output; falls back to the exit code when the
/// output carries no recognizable summary.
pub fn parse_output(framework: Framework, output: &CommandOutput) -> TestResult {
    let text = format!("{}\n{}", output.stdout, output.stderr);
    let mut r = TestResult {
        success: output.success(),
        framework: Some(framework),
        duration_ms: output.duration_ms,
        ..TestResult::default()
    };

    match framework {
        Framework::Jest | Framework::Vitest | Framework::Mocha => {
            if let Some(c) = JEST_SUMMARY.captures(&text) {
                r.failed = num(c.get(1));
                r.skipped = num(c.get(2));
                r.passed = num(c.get(3));
                r.total = num(c.get(4));
            } else if let Some(c) = VITEST_SUMMARY.captures(&text) {
                r.failed = num(c.get(1));
                r.passed = num(c.get(2));
                r.skipped = num(c.get(3));
                r.total = num(c.get(4));
            }
            r.failed_tests = JEST_FAILED
                .captures_iter(&text)
                .map(|c| c[1].trim().to_string())
                .collect();
        }
        Framework::Pytest => {
            for c in PYTEST_COUNT.captures_iter(&text) {
                let n = num(c.get(1));
                match &c[2] {
                    "passed" => r.passed += n,
                    "skipped" => r.skipped += n,
                    _ => r.failed += n,
                }
            }
            r.total = r.passed + r.failed + r.skipped;
            r.failed_tests = PYTEST_FAILED
                .captures_iter(&text)
                .map(|c| c[1].to_string())
                .collect();
        }
        Framework::Go => {
            for c in GO_RESULT.captures_iter(&text) {
                match &c[1] {
                    "PASS" => r.passed += 1,
                    "SKIP" => r.skipped += 1,
                    _ => {
                        r.failed += 1;
                        r.failed_tests.push(c[2].to_string());
                    }
                }
            }
            r.total = r.passed + r.failed + r.skipped;
        }
        Framework::Cargo => {
            // One summary line per test binary.
            for c in CARGO_RESULT.captures_iter(&text) {
                r.passed += num(c.get(1));
                r.failed += num(c.get(2));
                r.skipped += num(c.get(3));
            }
            r.total = r.passed + r.failed + r.skipped;
            r.failed_tests = CARGO_FAILED
                .captures_iter(&text)
                .map(|c| c[1].to_string())
                .collect();
        }
        Framework::Maven | Framework::Gradle => {}
    }

    if r.total == 0 {
        if r.success {
            r.passed = 1;
        } else {
            r.failed = 1;
        }
        r.total = 1;
    }
    r.output_tail = tail(&text, OUTPUT_TAIL_CHARS);
    r
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max_chars)).collect()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct TestRunner {
    project_dir: PathBuf,
    timeout: Duration,
    framework: Option<Framework>,
    history: Mutex<VecDeque<TestResult>>,
}

impl TestRunner {
    /// Detects the framework once, up front.
    pub fn new(project_dir: impl Into<PathBuf>, config: &TestsConfig) -> Self {
        let project_dir = project_dir.into();
        let framework = Framework::detect(&project_dir);
        Self {
            project_dir,
            timeout: Duration::from_secs(config.timeout_secs),
            framework,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn framework(&self) -> Option<Framework> {
        self.framework
    }

    pub async fn run(&self, scope: TestScope) -> TestResult {
        let result = self.execute(&scope).await;
        let mut history = lock(&self.history);
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(result.clone());
        result
    }

    async fn execute(&self, scope: &TestScope) -> TestResult {
        let Some(framework) = self.framework else {
            return TestResult::failure(None, scope, "No test framework detected");
        };
        let (program, args) = framework.command(scope);
        info!(%framework, %scope, %program, "running tests");

        let mut cmd = Command::new(&program);
        cmd.args(&args).current_dir(&self.project_dir);
        match run_bounded(cmd, self.timeout).await {
            Ok(output) => {
                let mut result = parse_output(framework, &output);
                result.scope = scope.to_string();
                result.timestamp = Utc::now();
                info!(passed = result.passed, failed = result.failed, "tests finished");
                result
            }
            Err(e @ ProcessError::Timeout { .. }) => {
                warn!(error = %e, "test run killed");
                TestResult::failure(Some(framework), scope, format!("Tests timed out: {e}"))
            }
            Err(e) => TestResult::failure(Some(framework), scope, e.to_string()),
        }
    }

    /// Run the tests related to `source`, or everything when no related test
    /// file exists.
    pub async fn run_for(&self, source: &Path) -> TestResult {
        match self.tests_for(source) {
            Some(test_file) => self.run(TestScope::File(test_file)).await,
            None => self.run(TestScope::All).await,
        }
    }

    /// The test file conventionally paired with `source`, relative to the
    /// project root.
    pub fn tests_for(&self, source: &Path) -> Option<PathBuf> {
        let rel = source.strip_prefix(&self.project_dir).unwrap_or(source);
        let stem = rel.file_stem()?.to_string_lossy().into_owned();
        let dir = rel.parent().unwrap_or_else(|| Path::new(""));
        let candidates = [
            format!("{stem}.test.js"),
            format!("{stem}.test.ts"),
            format!("{stem}.test.jsx"),
            format!("{stem}.test.tsx"),
            format!("{stem}.spec.js"),
            format!("{stem}.spec.ts"),
            format!("test_{stem}.py"),
            format!("{stem}_test.py"),
            format!("{stem}_test.go"),
        ];
        let search_dirs = [
            dir.to_path_buf(),
            dir.join("__tests__"),
            dir.join("tests"),
            dir.join("test"),
        ];
        search_dirs
            .iter()
            .flat_map(|d| candidates.iter().map(move |c| d.join(c)))
            .find(|candidate| self.project_dir.join(candidate).is_file())
    }

    /// Most recent runs, newest last.
    pub fn history(&self, limit: usize) -> Vec<TestResult> {
        let history = lock(&self.history);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> TestStats {
        let history = lock(&self.history);
        let total_passed: u64 = history.iter().map(|r| u64::from(r.passed)).sum();
        let total_failed: u64 = history.iter().map(|r| u64::from(r.failed)).sum();
        let tests = total_passed + total_failed;
        TestStats {
            total_runs: history.len(),
            successful_runs: history.iter().filter(|r| r.success).count(),
            total_passed,
            total_failed,
            pass_rate: if tests == 0 {
                0.0
            } else {
                total_passed as f64 / tests as f64 * 100.0
            },
        }
    }
}
