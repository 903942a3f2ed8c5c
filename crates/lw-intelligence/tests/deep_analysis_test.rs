use std::sync::Arc;
use std::time::Duration;

use lw_core::config::ClassifierConfig;
use lw_core::types::{Issue, IssueType, Severity};
use lw_harness::CircuitState;
use lw_intelligence::{DeepAnalyzer, DeepOutcome, LlmError, MockProvider};

fn config(timeout_secs: u64, failure_threshold: u32) -> ClassifierConfig {
    ClassifierConfig {
        deep_timeout_secs: timeout_secs,
        deep_failure_threshold: failure_threshold,
        ..ClassifierConfig::default()
    }
}

fn critical_issue() -> Issue {
    Issue::new(IssueType::HardcodedSecret, Severity::Critical, "api.js", "secret")
        .with_line(Some(4))
}

#[tokio::test]
async fn low_severity_findings_skip_the_collaborator() {
    let mock = MockProvider::new();
    let analyzer = DeepAnalyzer::new(Arc::new(mock.clone()), &config(5, 3));
    let quick = vec![Issue::new(IssueType::TodoComment, Severity::Info, "a.js", "todo")];

    let analysis = analyzer.refine("a.js", "// TODO: x", quick).await;
    assert_eq!(analysis.deep, DeepOutcome::Skipped);
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn well_formed_answer_is_attached() {
    let mock = MockProvider::new().with_response(
        r#"{"critical_issues": ["secret"], "recommended_fixes": ["use env"], "auto_apply_safe": false}"#,
    );
    let analyzer = DeepAnalyzer::new(Arc::new(mock.clone()), &config(5, 3));
    let quick = vec![critical_issue()];

    let analysis = analyzer.refine("api.js", "const token = 'x';", quick.clone()).await;
    match &analysis.deep {
        DeepOutcome::Refined { report } => assert_eq!(report.recommended_fixes.len(), 1),
        other => panic!("expected refined outcome, got {other:?}"),
    }
    assert!(analysis.issues[0].same_finding(&quick[0]));

    let sent = mock.captured_requests();
    assert_eq!(sent.len(), 1);
    assert!(sent[0][1].content.contains("Line 4: secret (critical)"));
}

#[tokio::test]
async fn malformed_answer_falls_back_unchanged() {
    let mock = MockProvider::new().with_response("I think the code is fine.");
    let analyzer = DeepAnalyzer::new(Arc::new(mock), &config(5, 3));
    let quick = vec![critical_issue()];

    let analysis = analyzer.refine("api.js", "x", quick.clone()).await;
    assert!(matches!(analysis.deep, DeepOutcome::Fallback { .. }));
    assert_eq!(analysis.issues.len(), 1);
    assert!(analysis.issues[0].same_finding(&quick[0]));
}

#[tokio::test]
async fn provider_error_falls_back() {
    let mock = MockProvider::new().with_error(LlmError::Api {
        status: 500,
        message: "overloaded".into(),
    });
    let analyzer = DeepAnalyzer::new(Arc::new(mock), &config(5, 3));
    let analysis = analyzer.refine("api.js", "x", vec![critical_issue()]).await;
    match analysis.deep {
        DeepOutcome::Fallback { reason } => assert!(reason.contains("overloaded")),
        other => panic!("expected fallback, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_collaborator_is_cut_off_by_timeout() {
    let mock = MockProvider::new()
        .with_response(r#"{"auto_apply_safe": true}"#)
        .with_delay(Duration::from_secs(30));
    let analyzer = DeepAnalyzer::new(Arc::new(mock), &config(1, 3));

    let started = std::time::Instant::now();
    let analysis = analyzer.refine("api.js", "x", vec![critical_issue()]).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(analysis.deep, DeepOutcome::Fallback { .. }));
}

#[tokio::test]
async fn repeated_failures_open_the_circuit() {
    let mock = MockProvider::new()
        .with_error(LlmError::Timeout)
        .with_error(LlmError::Timeout);
    let analyzer = DeepAnalyzer::new(Arc::new(mock.clone()), &config(5, 2));

    for _ in 0..2 {
        analyzer.refine("api.js", "x", vec![critical_issue()]).await;
    }
    assert_eq!(analyzer.breaker_state(), CircuitState::Open);

    let analysis = analyzer.refine("api.js", "x", vec![critical_issue()]).await;
    match analysis.deep {
        DeepOutcome::Fallback { reason } => assert!(reason.starts_with("skipped")),
        other => panic!("expected fallback, got {other:?}"),
    }
    assert_eq!(mock.call_count(), 2, "open circuit must not reach the provider");
}
