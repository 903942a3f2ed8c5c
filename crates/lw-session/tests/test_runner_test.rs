use std::fs;
use std::path::{Path, PathBuf};

use lw_core::config::TestsConfig;
use lw_session::{Framework, TestRunner, TestScope};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn detects_frameworks_from_marker_files() {
    let cases: &[(&str, &str, Framework)] = &[
        ("package.json", r#"{"devDependencies": {"jest": "^29"}}"#, Framework::Jest),
        ("package.json", r#"{"scripts": {"test": "vitest run"}}"#, Framework::Vitest),
        ("package.json", r#"{"devDependencies": {"mocha": "^10"}}"#, Framework::Mocha),
        ("pyproject.toml", "[tool.pytest.ini_options]", Framework::Pytest),
        ("Cargo.toml", "[package]", Framework::Cargo),
        ("main_test.go", "package main", Framework::Go),
        ("pom.xml", "<project/>", Framework::Maven),
        ("build.gradle", "", Framework::Gradle),
    ];
    for (file, content, expected) in cases {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), file, content);
        assert_eq!(Framework::detect(dir.path()), Some(*expected), "{file}");
    }
}

#[test]
fn package_json_without_test_framework_is_not_detected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "package.json", r#"{"dependencies": {"react": "^18"}}"#);
    assert_eq!(Framework::detect(dir.path()), None);
}

#[test]
fn finds_related_test_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/utils/format.js", "");
    write(dir.path(), "src/utils/__tests__/format.test.js", "");
    write(dir.path(), "api/users.py", "");
    write(dir.path(), "api/tests/test_users.py", "");
    write(dir.path(), "svc/handler.go", "");
    write(dir.path(), "svc/handler_test.go", "");

    let runner = TestRunner::new(dir.path(), &TestsConfig::default());
    assert_eq!(
        runner.tests_for(Path::new("src/utils/format.js")),
        Some(PathBuf::from("src/utils/__tests__/format.test.js"))
    );
    assert_eq!(
        runner.tests_for(&dir.path().join("api/users.py")),
        Some(PathBuf::from("api/tests/test_users.py"))
    );
    assert_eq!(
        runner.tests_for(Path::new("svc/handler.go")),
        Some(PathBuf::from("svc/handler_test.go"))
    );
    assert_eq!(runner.tests_for(Path::new("src/unrelated.js")), None);
}

#[tokio::test]
async fn missing_framework_is_reported_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let runner = TestRunner::new(dir.path(), &TestsConfig::default());
    assert_eq!(runner.framework(), None);

    let result = runner.run(TestScope::Changed).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("No test framework detected"));
    assert_eq!(result.scope, "changed");

    let stats = runner.stats();
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.successful_runs, 0);
    assert_eq!(runner.history(10).len(), 1);
}
