use std::fs;
use std::path::Path;

use lw_core::config::NetworkConfig;
use lw_core::types::{HttpCall, IssueType, Severity};
use lw_daemon::network_tracker::NetworkTracker;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

const ROUTES_JS: &str = "\
const router = require('express').Router();
router.get('/api/users', listUsers);
router.post('/api/users/:id/avatar', uploadAvatar);
module.exports = router;
";

#[test]
fn misspelled_endpoint_suggests_real_route() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "backend/routes.js", ROUTES_JS);
    let tracker = NetworkTracker::new(dir.path(), &NetworkConfig::default());

    let issues = tracker.track(&HttpCall::new("GET", "/api/usres", 404));

    let network = issues
        .iter()
        .find(|i| i.issue_type == IssueType::NetworkError)
        .expect("network error");
    assert_eq!(network.severity, Severity::High);

    let mismatch = issues
        .iter()
        .find(|i| i.issue_type == IssueType::EndpointMismatch)
        .expect("endpoint mismatch");
    assert_eq!(mismatch.severity, Severity::High);
    assert_eq!(mismatch.file, "/api/usres");
    assert_eq!(mismatch.suggestion.as_deref(), Some("Did you mean: /api/users?"));
}

#[test]
fn parameterised_route_is_not_a_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "backend/routes.js", ROUTES_JS);
    let tracker = NetworkTracker::new(dir.path(), &NetworkConfig::default());

    let issues = tracker.track(&HttpCall::new("POST", "http://localhost:8000/api/users/42/avatar", 404));
    assert!(issues.iter().all(|i| i.issue_type != IssueType::EndpointMismatch));
}

#[test]
fn inventory_is_scanned_once() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "backend/routes.js", ROUTES_JS);
    write(dir.path(), "frontend/src/api.js", "export const load = () => fetch('/api/users');\n");
    let tracker = NetworkTracker::new(dir.path(), &NetworkConfig::default());

    let first = tracker.track(&HttpCall::new("GET", "/api/orders", 404));
    assert!(first.iter().any(|i| i.issue_type == IssueType::EndpointMismatch));

    write(dir.path(), "backend/orders.py", "@app.get('/api/orders')\ndef orders():\n    return []\n");
    let second = tracker.track(&HttpCall::new("GET", "/api/orders", 404));
    assert!(second.iter().any(|i| i.issue_type == IssueType::EndpointMismatch));

    let fresh = NetworkTracker::new(dir.path(), &NetworkConfig::default());
    let third = fresh.track(&HttpCall::new("GET", "/api/orders", 404));
    assert!(third.iter().all(|i| i.issue_type != IssueType::EndpointMismatch));

    let stats = tracker.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.failed_requests, 2);
    assert_eq!(stats.frontend_endpoints, 1);
    assert_eq!(stats.backend_endpoints, 2);
    assert_eq!(stats.most_used, vec![("GET /api/orders".to_string(), 2)]);
}

#[test]
fn successful_first_call_takes_the_inventory_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "backend/routes.js", ROUTES_JS);
    let tracker = NetworkTracker::new(dir.path(), &NetworkConfig::default());
    assert!(!tracker.is_scanned());

    tracker.track(&HttpCall::new("GET", "/api/users", 200));
    assert!(tracker.is_scanned());
    assert_eq!(tracker.stats().backend_endpoints, 2);

    write(dir.path(), "backend/orders.py", "@app.get('/api/orders')\ndef orders():\n    return []\n");
    let later = tracker.track(&HttpCall::new("GET", "/api/orders", 404));
    assert!(later.iter().any(|i| i.issue_type == IssueType::EndpointMismatch));
    assert_eq!(tracker.stats().backend_endpoints, 2);
}

#[test]
fn report_lists_failed_and_slow_calls() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = NetworkTracker::new(dir.path(), &NetworkConfig::default());

    tracker.track(&HttpCall::new("GET", "/api/health", 200).with_duration(12));
    tracker.track(&HttpCall::new("GET", "/api/report", 200).with_duration(2_400));
    tracker.track(&HttpCall::new("DELETE", "/api/users/7", 403).with_duration(30));

    let report = tracker.report();
    assert_eq!(report.stats.total_requests, 3);
    assert_eq!(report.stats.slow_requests, 1);
    assert_eq!(report.failed_requests.len(), 1);
    assert_eq!(report.failed_requests[0].status, Some(403));
    assert_eq!(report.slow_requests[0].endpoint, "/api/report");
    assert_eq!(report.recent_requests.len(), 3);
}
