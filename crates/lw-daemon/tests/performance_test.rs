use std::fs;
use std::path::Path;

use chrono::Utc;
use lw_core::config::PerformanceConfig;
use lw_daemon::network_tracker::RequestRecord;
use lw_daemon::{PerformanceError, PerformanceMonitor};

fn write(dir: &Path, rel: &str, content: &[u8]) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn monitor(dir: &Path) -> PerformanceMonitor {
    PerformanceMonitor::new(dir, "frontend", &PerformanceConfig::default())
}

#[test]
fn bundle_growth_past_threshold_warns() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "frontend/dist/main.js", &vec![b'x'; 100 * 1024]);
    write(dir.path(), "frontend/dist/index.html", b"<html></html>");
    let monitor = monitor(dir.path());

    let first = monitor.check_bundle_size().unwrap();
    assert_eq!(first.dir, "frontend/dist");
    assert_eq!(first.change_percent, None);
    assert!(first.warning.is_none());
    assert_eq!(first.bundles.len(), 1);
    assert_eq!(first.bundles[0].size_kb, 100);

    write(dir.path(), "frontend/dist/vendor.js", &vec![b'y'; 50 * 1024]);
    let second = monitor.check_bundle_size().unwrap();
    assert!(second.change_percent.is_some_and(|c| c > 40.0));
    assert!(second.warning.as_deref().is_some_and(|w| w.starts_with("Bundle size increased")));
    assert_eq!(second.bundles[0].path, "main.js");
    assert_eq!(monitor.latest_bundle().unwrap().total_bytes, second.total_bytes);

    let third = monitor.check_bundle_size().unwrap();
    assert_eq!(third.change_percent, Some(0.0));
    assert!(third.warning.is_none());
}

#[test]
fn missing_build_output_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        monitor(dir.path()).check_bundle_size(),
        Err(PerformanceError::NoBuildOutput)
    ));
}

#[tokio::test]
async fn build_needs_a_build_script() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "frontend/package.json", br#"{"scripts": {"dev": "vite"}}"#);
    assert!(matches!(
        monitor(dir.path()).measure_build().await,
        Err(PerformanceError::NoBuildScript)
    ));
}

#[test]
fn leak_scan_flags_unreleased_handles_only() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "frontend/src/Clock.jsx",
        b"useEffect(() => { setInterval(tick, 1000); }, []);\n",
    );
    write(
        dir.path(),
        "frontend/src/Poller.js",
        b"const id = setInterval(poll, 500);\nexport const stop = () => clearInterval(id);\n",
    );
    write(
        dir.path(),
        "frontend/node_modules/lib/index.js",
        b"window.addEventListener('resize', f);\n",
    );

    let leaks = monitor(dir.path()).detect_leaks();
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].file, "frontend/src/Clock.jsx");
    assert_eq!(leaks[0].warning, "setInterval without clearInterval");
}

#[test]
fn report_combines_measurements_and_api_timings() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "dist/app.js", &vec![b'z'; 2048]);
    let monitor = monitor(dir.path());
    monitor.check_bundle_size().unwrap();

    let call = |endpoint: &str, ms: u64| RequestRecord {
        method: "GET".into(),
        endpoint: endpoint.into(),
        url: format!("http://localhost:3000{endpoint}"),
        status: Some(200),
        duration_ms: Some(ms),
        error: None,
        timestamp: Utc::now(),
    };
    let records = [call("/api/users", 40), call("/api/users", 60), call("/api/report", 2500)];
    let report = monitor.report(&records, 1000);

    assert_eq!(report.bundle.as_ref().map(|b| b.dir.as_str()), Some("dist"));
    assert!(report.build.is_none());
    assert_eq!(report.api.total_calls, 3);
    let slowest = report.api.slowest().unwrap();
    assert!(slowest.endpoint.ends_with("/api/report"));
    assert_eq!(slowest.slow_calls, 1);
    assert!(report.render().contains("dist"));
}
