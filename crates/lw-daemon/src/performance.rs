//! Build output size, build time and API latency.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lw_core::config::PerformanceConfig;
use lw_session::{run_bounded, ProcessError};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::network_tracker::RequestRecord;

const BUILD_DIRS: &[&str] = &["frontend/dist", "frontend/build", "dist", "build"];
const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx"];
const BUNDLE_SNAPSHOTS: usize = 20;
const BUILD_TIMINGS: usize = 10;
const LISTED_BUNDLES: usize = 10;
const LISTED_LEAKS: usize = 10;

#[derive(Debug, Error)]
pub enum PerformanceError {
    #[error("no build output found (looked in {})", BUILD_DIRS.join(", "))]
    NoBuildOutput,

    #[error("no build script in package.json")]
    NoBuildScript,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("measurement task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleFile {
    pub path: String,
    pub size_kb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleSnapshot {
    /// Build directory, relative to the project.
    pub dir: String,
    pub total_bytes: u64,
    /// Largest JavaScript files, biggest first.
    pub bundles: Vec<BundleFile>,
    pub change_percent: Option<f64>,
    pub warning: Option<String>,
    pub at: DateTime<Utc>,
}

impl BundleSnapshot {
    pub fn total_mb(&self) -> f64 {
        (self.total_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildTiming {
    pub duration_ms: u64,
    pub success: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointTiming {
    /// `METHOD /path`
    pub endpoint: String,
    pub calls: usize,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub slow_calls: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiPerformance {
    pub total_calls: usize,
    /// Slowest average first.
    pub endpoints: Vec<EndpointTiming>,
}

impl ApiPerformance {
    /// Latency per endpoint over calls that reported a duration.
    pub fn from_records(records: &[RequestRecord], slow_ms: u64) -> Self {
        let mut by_endpoint: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for record in records {
            if let Some(ms) = record.duration_ms {
                by_endpoint
                    .entry(format!("{} {}", record.method, record.endpoint))
                    .or_default()
                    .push(ms);
            }
        }
        let mut endpoints: Vec<EndpointTiming> = by_endpoint
            .into_iter()
            .map(|(endpoint, durations)| {
                let sum: u64 = durations.iter().sum();
                let avg = sum as f64 / durations.len() as f64;
                EndpointTiming {
                    endpoint,
                    calls: durations.len(),
                    avg_ms: (avg * 100.0).round() / 100.0,
                    min_ms: durations.iter().copied().min().unwrap_or_default(),
                    max_ms: durations.iter().copied().max().unwrap_or_default(),
                    slow_calls: durations.iter().filter(|d| **d > slow_ms).count(),
                }
            })
            .collect();
        endpoints.sort_by(|a, b| b.avg_ms.total_cmp(&a.avg_ms));
        Self {
            total_calls: endpoints.iter().map(|e| e.calls).sum(),
            endpoints,
        }
    }

    pub fn slowest(&self) -> Option<&EndpointTiming> {
        self.endpoints.first()
    }

    pub fn fastest(&self) -> Option<&EndpointTiming> {
        self.endpoints.last()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakWarning {
    pub file: String,
    pub warning: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub bundle: Option<BundleSnapshot>,
    pub build: Option<BuildTiming>,
    pub api: ApiPerformance,
    pub leaks: Vec<LeakWarning>,
}

impl PerformanceReport {
    pub fn render(&self) -> String {
        let mut out = String::from("Performance Report\n\n");
        if let Some(bundle) = &self.bundle {
            let _ = writeln!(out, "Bundle size: {} MB ({})", bundle.total_mb(), bundle.dir);
            match bundle.change_percent {
                Some(change) if change > 0.0 => {
                    let _ = writeln!(out, "  Change: +{change}% since last check");
                }
                Some(change) if change < 0.0 => {
                    let _ = writeln!(out, "  Change: {change}% since last check");
                }
                _ => {}
            }
            out.push('\n');
        }
        if let Some(build) = &self.build {
            let status = if build.success { "ok" } else { "failed" };
            let _ = writeln!(out, "Build time: {:.1}s ({status})\n", build.duration_ms as f64 / 1000.0);
        }
        if let Some(slowest) = self.api.slowest() {
            let _ = writeln!(out, "API calls: {}", self.api.total_calls);
            let _ = writeln!(out, "  Slowest: {} ({:.0}ms avg)\n", slowest.endpoint, slowest.avg_ms);
        }
        if !self.leaks.is_empty() {
            let _ = writeln!(out, "Potential memory leaks: {}", self.leaks.len());
            for leak in &self.leaks {
                let _ = writeln!(out, "  {}: {}", leak.file, leak.warning);
            }
        }
        out
    }
}

struct LeakPattern {
    /// Flagged when this matches...
    opens: Regex,
    /// ...and this does not match anywhere in the same file.
    closes: Option<Regex>,
    warning: &'static str,
}

static LEAK_PATTERNS: LazyLock<Vec<LeakPattern>> = LazyLock::new(|| {
    let re = |p: &str| Regex::new(p).expect("valid leak pattern regex");
    vec![
        LeakPattern {
            opens: re(r"\bsetInterval\("),
            closes: Some(re(r"\bclearInterval\(")),
            warning: "setInterval without clearInterval",
        },
        LeakPattern {
            opens: re(r"\baddEventListener\("),
            closes: Some(re(r"\bremoveEventListener\(")),
            warning: "addEventListener without removeEventListener",
        },
        LeakPattern {
            opens: re(r"new Array\(\d{6,}\)"),
            closes: None,
            warning: "very large array allocation",
        },
    ]
});

/// Keeps short histories of bundle checks and build timings so growth can be
/// reported between checks.
pub struct PerformanceMonitor {
    project_dir: PathBuf,
    frontend_dir: String,
    config: PerformanceConfig,
    bundles: Mutex<VecDeque<BundleSnapshot>>,
    builds: Mutex<VecDeque<BuildTiming>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    if queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}

impl PerformanceMonitor {
    pub fn new(project_dir: impl Into<PathBuf>, frontend_dir: impl Into<String>, config: &PerformanceConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            frontend_dir: frontend_dir.into(),
            config: config.clone(),
            bundles: Mutex::new(VecDeque::new()),
            builds: Mutex::new(VecDeque::new()),
        }
    }

    /// Measure the first build directory found. Walks the filesystem.
    pub fn check_bundle_size(&self) -> Result<BundleSnapshot, PerformanceError> {
        let (rel, dir) = BUILD_DIRS
            .iter()
            .map(|rel| (*rel, self.project_dir.join(rel)))
            .find(|(_, dir)| dir.is_dir())
            .ok_or(PerformanceError::NoBuildOutput)?;

        let mut total_bytes = 0;
        let mut bundles = Vec::new();
        for entry in WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            total_bytes += meta.len();
            if entry.path().extension().is_some_and(|e| e == "js") {
                let path = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
                bundles.push(BundleFile {
                    path: path.to_string_lossy().into_owned(),
                    size_kb: meta.len() / 1024,
                });
            }
        }
        bundles.sort_by(|a, b| b.size_kb.cmp(&a.size_kb).then_with(|| a.path.cmp(&b.path)));
        bundles.truncate(LISTED_BUNDLES);

        let mut history = lock(&self.bundles);
        let change_percent = history
            .back()
            .filter(|prev| prev.total_bytes > 0)
            .map(|prev| {
                let change = (total_bytes as f64 - prev.total_bytes as f64) / prev.total_bytes as f64 * 100.0;
                (change * 10.0).round() / 10.0
            });
        let warning = change_percent
            .filter(|c| *c > self.config.bundle_growth_warn_percent)
            .map(|c| format!("Bundle size increased by {c:.1}%"));
        let snapshot = BundleSnapshot {
            dir: rel.to_string(),
            total_bytes,
            bundles,
            change_percent,
            warning,
            at: Utc::now(),
        };
        info!(dir = rel, total_bytes, change = ?change_percent, "bundle size checked");
        push_bounded(&mut history, snapshot.clone(), BUNDLE_SNAPSHOTS);
        Ok(snapshot)
    }

    /// Directory holding a `package.json` with a `build` script, preferring
    /// the frontend directory.
    fn build_dir(&self) -> Option<PathBuf> {
        [self.project_dir.join(&self.frontend_dir), self.project_dir.clone()]
            .into_iter()
            .find(|dir| has_build_script(&dir.join("package.json")))
    }

    /// Run `npm run build` and record how long it took.
    pub async fn measure_build(&self) -> Result<BuildTiming, PerformanceError> {
        let dir = self.build_dir().ok_or(PerformanceError::NoBuildScript)?;
        let mut cmd = Command::new("npm");
        cmd.args(["run", "build"]).current_dir(&dir);
        let out = run_bounded(cmd, Duration::from_secs(self.config.build_timeout_secs)).await?;
        let timing = BuildTiming {
            duration_ms: out.duration_ms,
            success: out.success(),
            at: Utc::now(),
        };
        info!(duration_ms = timing.duration_ms, success = timing.success, "build measured");
        push_bounded(&mut lock(&self.builds), timing.clone(), BUILD_TIMINGS);
        Ok(timing)
    }

    /// Static scan of frontend sources for common leak shapes. Walks the
    /// filesystem.
    pub fn detect_leaks(&self) -> Vec<LeakWarning> {
        let dir = self.project_dir.join(&self.frontend_dir);
        let mut warnings = Vec::new();
        let walker = WalkDir::new(&dir)
            .into_iter()
            .filter_entry(|e| e.file_name() != "node_modules");
        for entry in walker.filter_map(Result::ok) {
            let path = entry.path();
            let wanted = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));
            if !entry.file_type().is_file() || !wanted {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(path) else {
                debug!(path = %path.display(), "skipping unreadable source file");
                continue;
            };
            let file = path
                .strip_prefix(&self.project_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            for pattern in LEAK_PATTERNS.iter() {
                let released = pattern.closes.as_ref().is_some_and(|c| c.is_match(&content));
                if pattern.opens.is_match(&content) && !released {
                    warnings.push(LeakWarning {
                        file: file.clone(),
                        warning: pattern.warning,
                    });
                }
            }
        }
        warnings.sort_by(|a, b| a.file.cmp(&b.file));
        warnings.truncate(LISTED_LEAKS);
        warnings
    }

    pub fn latest_bundle(&self) -> Option<BundleSnapshot> {
        lock(&self.bundles).back().cloned()
    }

    pub fn latest_build(&self) -> Option<BuildTiming> {
        lock(&self.builds).back().cloned()
    }

    /// Combine the latest measurements with `requests`. Walks the frontend
    /// sources for the leak scan.
    pub fn report(&self, requests: &[RequestRecord], slow_ms: u64) -> PerformanceReport {
        PerformanceReport {
            bundle: self.latest_bundle(),
            build: self.latest_build(),
            api: ApiPerformance::from_records(requests, slow_ms),
            leaks: self.detect_leaks(),
        }
    }
}

fn has_build_script(package_json: &Path) -> bool {
    std::fs::read_to_string(package_json)
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .is_some_and(|pkg| pkg["scripts"]["build"].is_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(method: &str, endpoint: &str, ms: Option<u64>) -> RequestRecord {
        RequestRecord {
            method: method.into(),
            endpoint: endpoint.into(),
            url: endpoint.into(),
            status: Some(200),
            duration_ms: ms,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn api_timings_per_endpoint_slowest_first() {
        let records = vec![
            record("GET", "/api/a", Some(100)),
            record("GET", "/api/a", Some(300)),
            record("GET", "/api/b", Some(1500)),
            record("GET", "/api/c", None),
        ];
        let perf = ApiPerformance::from_records(&records, 1000);
        assert_eq!(perf.total_calls, 3);
        assert_eq!(perf.endpoints.len(), 2);
        let slowest = perf.slowest().unwrap();
        assert_eq!(slowest.endpoint, "GET /api/b");
        assert_eq!(slowest.slow_calls, 1);
        let fastest = perf.fastest().unwrap();
        assert_eq!((fastest.avg_ms, fastest.min_ms, fastest.max_ms), (200.0, 100, 300));
    }

    #[test]
    fn render_skips_empty_sections() {
        let report = PerformanceReport {
            bundle: None,
            build: None,
            api: ApiPerformance::default(),
            leaks: Vec::new(),
        };
        assert_eq!(report.render(), "Performance Report\n\n");
    }
}
