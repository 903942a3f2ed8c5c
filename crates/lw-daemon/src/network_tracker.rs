use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use lw_core::config::NetworkConfig;
use lw_core::types::{HttpCall, Issue, IssueType, Severity};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build", ".next", "__pycache__", "venv", ".venv"];
const FRONTEND_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "vue", "svelte"];
const BACKEND_EXTENSIONS: &[&str] = &["js", "ts", "mjs", "py", "java", "go", "rb"];
const RECENT_CAPACITY: usize = 50;
const MAX_SUGGESTIONS: usize = 3;
const USAGE_CAPACITY: usize = 200;

static FRONTEND_CALLS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"fetch\(\s*['"`]([^'"`]+)['"`]"#,
        r#"axios\.(?:get|post|put|delete|patch)\(\s*['"`]([^'"`]+)['"`]"#,
        r#"\.(?:get|post)\(\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid frontend call regex"))
    .collect()
});

static BACKEND_ROUTES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Express, and FastAPI decorators via the leading '@'.
        r#"(?:router|app)\.(?:get|post|put|delete|patch)\(\s*['"]([^'"]+)['"]"#,
        // Flask
        r#"@(?:app|bp|blueprint|router)\.route\(\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid backend route regex"))
    .collect()
});

/// Strip scheme, host, query string, fragment and trailing slash.
pub fn normalize_endpoint(url: &str) -> String {
    let mut path = url.trim();
    if let Some((_, rest)) = path.split_once("://") {
        path = rest.find('/').map_or("", |i| &rest[i..]);
    }
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn is_route_param(segment: &str) -> bool {
    segment.starts_with(':')
        || (segment.starts_with('{') && segment.ends_with('}'))
        || (segment.starts_with('<') && segment.ends_with('>'))
}

/// `route` with `:id`, `{id}` or `<id>` segments matches any single segment.
pub fn route_matches(route: &str, endpoint: &str) -> bool {
    if route == endpoint {
        return true;
    }
    let route_segments: Vec<&str> = route.split('/').collect();
    let endpoint_segments: Vec<&str> = endpoint.split('/').collect();
    route_segments.len() == endpoint_segments.len()
        && route_segments
            .iter()
            .zip(&endpoint_segments)
            .all(|(r, e)| r == e || (is_route_param(r) && !e.is_empty()))
}

// ---------------------------------------------------------------------------
// EndpointInventory
// ---------------------------------------------------------------------------

/// Routes called by the frontend and routes declared by the backend, found
/// by a one-time source scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointInventory {
    pub frontend: BTreeSet<String>,
    pub backend: BTreeSet<String>,
}

impl EndpointInventory {
    pub fn scan(project_dir: &Path, config: &NetworkConfig) -> Self {
        let frontend = scan_dir(&project_dir.join(&config.frontend_dir), FRONTEND_EXTENSIONS, &FRONTEND_CALLS);
        let backend = scan_dir(&project_dir.join(&config.backend_dir), BACKEND_EXTENSIONS, &BACKEND_ROUTES);
        info!(frontend = frontend.len(), backend = backend.len(), "endpoint inventory scanned");
        Self { frontend, backend }
    }

    pub fn from_routes<I, J, S, T>(frontend: I, backend: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            frontend: frontend.into_iter().map(|r| normalize_endpoint(r.as_ref())).collect(),
            backend: backend.into_iter().map(|r| normalize_endpoint(r.as_ref())).collect(),
        }
    }

    pub fn has_backend_route(&self, endpoint: &str) -> bool {
        self.backend_route_for(endpoint).is_some()
    }

    /// The declared backend route serving `endpoint`, if any.
    pub fn backend_route_for(&self, endpoint: &str) -> Option<&str> {
        self.backend
            .iter()
            .find(|route| route_matches(route, endpoint))
            .map(String::as_str)
    }

    /// Backend routes whose similarity to `endpoint` exceeds `threshold`,
    /// closest first.
    pub fn similar(&self, endpoint: &str, threshold: f64) -> Vec<String> {
        let needle = endpoint.to_lowercase();
        let mut scored: Vec<(f64, &String)> = self
            .backend
            .iter()
            .map(|route| (strsim::normalized_damerau_levenshtein(&needle, &route.to_lowercase()), route))
            .filter(|(score, _)| *score > threshold)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, route)| route.clone())
            .collect()
    }
}

fn scan_dir(dir: &Path, extensions: &[&str], patterns: &[Regex]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    if !dir.is_dir() {
        return found;
    }
    let walker = WalkDir::new(dir).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir() && SKIPPED_DIRS.iter().any(|s| e.file_name() == *s))
    });
    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e));
        if !entry.file_type().is_file() || !wanted {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(path) else {
            debug!(path = %path.display(), "skipping unreadable source file");
            continue;
        };
        for pattern in patterns {
            for caps in pattern.captures_iter(&content) {
                if let Some(route) = caps.get(1).map(|m| m.as_str()) {
                    if route.starts_with('/') {
                        found.insert(normalize_endpoint(route));
                    }
                }
            }
        }
    }
    found
}

// ---------------------------------------------------------------------------
// NetworkTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub method: String,
    pub endpoint: String,
    pub url: String,
    pub status: Option<u16>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub slow_requests: usize,
    pub avg_response_ms: f64,
    pub frontend_endpoints: usize,
    pub backend_endpoints: usize,
    /// `(method endpoint, calls)`, most used first.
    pub most_used: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkReport {
    pub stats: NetworkStats,
    pub recent_requests: Vec<RequestRecord>,
    pub failed_requests: Vec<RequestRecord>,
    pub slow_requests: Vec<RequestRecord>,
}

#[derive(Default)]
struct TrackerState {
    log: VecDeque<RequestRecord>,
    usage: HashMap<String, u64>,
    failed: VecDeque<RequestRecord>,
    slow: VecDeque<RequestRecord>,
    failed_total: usize,
    slow_total: usize,
}

fn push_bounded(queue: &mut VecDeque<RequestRecord>, record: RequestRecord, capacity: usize) {
    if queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(record);
}

/// Turns observed HTTP calls into network issues.
///
/// The endpoint inventory is scanned on the first tracked call, whatever its
/// status, and never
/// refreshed, so routes added to the backend mid-session can be reported as
/// mismatches until the tracker is recreated.
pub struct NetworkTracker {
    project_dir: PathBuf,
    config: NetworkConfig,
    inventory: OnceLock<EndpointInventory>,
    state: Mutex<TrackerState>,
}

impl NetworkTracker {
    pub fn new(project_dir: impl Into<PathBuf>, config: &NetworkConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            config: config.clone(),
            inventory: OnceLock::new(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// A tracker with a fixed inventory instead of a source scan.
    pub fn with_inventory(config: &NetworkConfig, inventory: EndpointInventory) -> Self {
        let tracker = Self::new(PathBuf::new(), config);
        let _ = tracker.inventory.set(inventory);
        tracker
    }

    pub fn is_scanned(&self) -> bool {
        self.inventory.get().is_some()
    }

    /// The inventory, scanning the project on first use. The scan walks the
    /// filesystem, so async callers should run the first call on a blocking
    /// thread.
    pub fn inventory(&self) -> &EndpointInventory {
        self.inventory
            .get_or_init(|| EndpointInventory::scan(&self.project_dir, &self.config))
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn track(&self, call: &HttpCall) -> Vec<Issue> {
        let inventory = self.inventory();
        let endpoint = normalize_endpoint(&call.url);
        let method = call.method.to_uppercase();
        let record = RequestRecord {
            method: method.clone(),
            endpoint: endpoint.clone(),
            url: call.url.clone(),
            status: call.status,
            duration_ms: call.duration_ms,
            error: call.error.clone(),
            timestamp: Utc::now(),
        };

        let mut issues = Vec::new();
        let failed = call.status.is_some_and(|s| s >= 400) || (call.status.is_none() && call.error.is_some());
        let slow = call.duration_ms.is_some_and(|d| d > self.config.slow_request_ms);

        match (call.status, &call.error) {
            (Some(status), _) if status >= 400 => {
                let severity = if status >= 500 { Severity::Critical } else { Severity::High };
                issues.push(
                    Issue::new(
                        IssueType::NetworkError,
                        severity,
                        &endpoint,
                        format!("{method} {endpoint} failed with status {status}"),
                    )
                    .with_suggestion(suggestion_for_status(status)),
                );
            }
            (None, Some(error)) => issues.push(
                Issue::new(
                    IssueType::NetworkError,
                    Severity::High,
                    &endpoint,
                    format!("{method} {endpoint} failed: {error}"),
                )
                .with_suggestion("Check network connection and backend status"),
            ),
            _ => {}
        }

        if slow {
            let duration = call.duration_ms.unwrap_or_default();
            issues.push(
                Issue::new(
                    IssueType::SlowRequest,
                    Severity::Medium,
                    &endpoint,
                    format!("{method} {endpoint} took {duration}ms (slow)"),
                )
                .with_suggestion("Optimize this endpoint or add caching"),
            );
        }

        let route = inventory.backend_route_for(&endpoint);
        if call.status == Some(404) && route.is_none() {
            let similar = inventory.similar(&endpoint, self.config.similarity_threshold);
            let suggestion = match similar.first() {
                Some(best) => format!("Did you mean: {best}?"),
                None => "Check if endpoint exists in backend".to_string(),
            };
            issues.push(
                Issue::new(
                    IssueType::EndpointMismatch,
                    Severity::High,
                    &endpoint,
                    format!("Endpoint not found: {method} {endpoint}"),
                )
                .with_suggestion(suggestion),
            );
        }

        let capacity = self.config.log_capacity;
        let mut state = self.lock();
        // Keyed by declared route so ids in paths collapse onto one entry.
        let key = format!("{method} {}", route.unwrap_or(&endpoint));
        if !state.usage.contains_key(&key) && state.usage.len() >= USAGE_CAPACITY {
            let rarest = state
                .usage
                .iter()
                .min_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(k, _)| k.clone());
            if let Some(rarest) = rarest {
                state.usage.remove(&rarest);
            }
        }
        *state.usage.entry(key).or_default() += 1;
        if failed {
            state.failed_total += 1;
            push_bounded(&mut state.failed, record.clone(), RECENT_CAPACITY);
        }
        if slow {
            state.slow_total += 1;
            push_bounded(&mut state.slow, record.clone(), RECENT_CAPACITY);
        }
        push_bounded(&mut state.log, record, capacity);
        issues
    }

    pub fn stats(&self) -> NetworkStats {
        let (frontend_endpoints, backend_endpoints) = match self.inventory.get() {
            Some(inv) => (inv.frontend.len(), inv.backend.len()),
            None => (0, 0),
        };
        let state = self.lock();
        let durations: Vec<u64> = state.log.iter().filter_map(|r| r.duration_ms).collect();
        let avg_response_ms = if durations.is_empty() {
            0.0
        } else {
            let avg = durations.iter().sum::<u64>() as f64 / durations.len() as f64;
            (avg * 100.0).round() / 100.0
        };
        let mut most_used: Vec<(String, u64)> =
            state.usage.iter().map(|(k, v)| (k.clone(), *v)).collect();
        most_used.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_used.truncate(5);

        NetworkStats {
            total_requests: state.log.len(),
            failed_requests: state.failed_total,
            slow_requests: state.slow_total,
            avg_response_ms,
            frontend_endpoints,
            backend_endpoints,
            most_used,
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<RequestRecord> {
        let state = self.lock();
        let skip = state.log.len().saturating_sub(limit);
        state.log.iter().skip(skip).cloned().collect()
    }

    pub fn report(&self) -> NetworkReport {
        let stats = self.stats();
        let state = self.lock();
        let last = |q: &VecDeque<RequestRecord>| -> Vec<RequestRecord> {
            q.iter().skip(q.len().saturating_sub(5)).cloned().collect()
        };
        NetworkReport {
            stats,
            recent_requests: state.log.iter().skip(state.log.len().saturating_sub(10)).cloned().collect(),
            failed_requests: last(&state.failed),
            slow_requests: last(&state.slow),
        }
    }
}

fn suggestion_for_status(status: u16) -> &'static str {
    match status {
        404 => "Check endpoint URL matches backend route",
        401 => "Add authentication token to request",
        403 => "Check user permissions for this endpoint",
        500 => "Check backend logs for server error",
        503 => "Backend service may be down",
        _ => "Check network connection and backend status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_urls() {
        assert_eq!(normalize_endpoint("http://localhost:3000/api/users/?page=2"), "/api/users");
        assert_eq!(normalize_endpoint("/api/items#top"), "/api/items");
        assert_eq!(normalize_endpoint("https://example.com"), "/");
        assert_eq!(normalize_endpoint("/"), "/");
    }

    #[test]
    fn route_params_match_one_segment() {
        assert!(route_matches("/api/users/:id", "/api/users/42"));
        assert!(route_matches("/api/users/{user_id}", "/api/users/42"));
        assert!(route_matches("/api/users/<int:id>", "/api/users/42"));
        assert!(!route_matches("/api/users/:id", "/api/users/42/posts"));
        assert!(!route_matches("/api/users/:id", "/api/posts/42"));
    }

    #[test]
    fn similar_routes_ranked_by_closeness() {
        let inv = EndpointInventory::from_routes(
            Vec::<&str>::new(),
            ["/api/users", "/api/user/settings", "/health"],
        );
        let similar = inv.similar("/api/usres", 0.5);
        assert_eq!(similar.first().map(String::as_str), Some("/api/users"));
        assert!(!similar.contains(&"/health".to_string()));
    }

    #[test]
    fn server_errors_are_critical_and_slow_calls_medium() {
        let tracker = NetworkTracker::with_inventory(
            &NetworkConfig::default(),
            EndpointInventory::from_routes(Vec::<&str>::new(), ["/api/orders"]),
        );
        let issues = tracker.track(&HttpCall::new("post", "/api/orders", 503).with_duration(2500));
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].issue_type, IssueType::NetworkError);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].suggestion.as_deref(), Some("Backend service may be down"));
        assert_eq!(issues[0].message, "POST /api/orders failed with status 503");
        assert_eq!(issues[1].issue_type, IssueType::SlowRequest);
        assert_eq!(issues[1].severity, Severity::Medium);

        let stats = tracker.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.slow_requests, 1);
        assert_eq!(stats.avg_response_ms, 2500.0);
        assert_eq!(stats.most_used[0], ("POST /api/orders".to_string(), 1));
    }

    #[test]
    fn successful_call_raises_nothing() {
        let tracker = NetworkTracker::with_inventory(&NetworkConfig::default(), EndpointInventory::default());
        assert!(tracker
            .track(&HttpCall::new("GET", "/api/anything", 200).with_duration(20))
            .is_empty());
    }

    #[test]
    fn usage_collapses_onto_declared_routes() {
        let tracker = NetworkTracker::with_inventory(
            &NetworkConfig::default(),
            EndpointInventory::from_routes(Vec::<&str>::new(), ["/api/users/:id"]),
        );
        for id in 0..20 {
            tracker.track(&HttpCall::new("GET", format!("/api/users/{id}"), 200));
        }
        let stats = tracker.stats();
        assert_eq!(stats.most_used, vec![("GET /api/users/:id".to_string(), 20)]);
    }

    #[test]
    fn usage_map_is_capped() {
        let tracker = NetworkTracker::with_inventory(&NetworkConfig::default(), EndpointInventory::default());
        tracker.track(&HttpCall::new("GET", "/api/hot", 200));
        tracker.track(&HttpCall::new("GET", "/api/hot", 200));
        for i in 0..USAGE_CAPACITY * 2 {
            tracker.track(&HttpCall::new("GET", format!("/api/items/{i}"), 200));
        }
        assert_eq!(tracker.lock().usage.len(), USAGE_CAPACITY);
        assert_eq!(tracker.stats().most_used[0], ("GET /api/hot".to_string(), 2));
    }

    #[test]
    fn log_is_bounded() {
        let config = NetworkConfig {
            log_capacity: 3,
            ..NetworkConfig::default()
        };
        let tracker = NetworkTracker::with_inventory(&config, EndpointInventory::default());
        for i in 0..5 {
            tracker.track(&HttpCall::new("GET", format!("/api/{i}"), 200));
        }
        let recent = tracker.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].endpoint, "/api/2");
    }
}
