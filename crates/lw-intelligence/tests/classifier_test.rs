use lw_core::types::{IssueType, Severity, Signal, SignalSource};
use lw_intelligence::Classifier;

#[test]
fn unexpected_token_maps_to_critical_syntax_error_with_line() {
    let signal = Signal::text(SignalSource::Process, "unexpected token at line 12")
        .with_file("service.src");
    let issues = Classifier::new().classify(&signal);

    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.issue_type, IssueType::SyntaxError);
    assert_eq!(issue.severity, Severity::Critical);
    assert_eq!(issue.file, "service.src");
    assert_eq!(issue.line, Some(12));
}

#[test]
fn classification_is_deterministic() {
    let content = "const token = \"abcdefgh12345\";\nconsole.log(user.profile.name);\n// TODO: remove\n";
    let signal = Signal::text(SignalSource::Filesystem, content).with_file("src/app.js");
    let c = Classifier::new();

    let first = c.classify(&signal);
    let second = c.classify(&signal);
    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert!(a.same_finding(b), "{a:?} != {b:?}");
        assert_ne!(a.id, b.id, "every detection is a fresh issue");
    }
}

#[test]
fn javascript_rules_apply_by_extension() {
    let content = [
        "export async function load() {",
        "  const res = await fetch('/api/users');",
        "  console.log(res);",
        "  return items.map(i => <li>{i.name}</li>);",
        "}",
    ]
    .join("\n");
    let signal = Signal::text(SignalSource::Filesystem, content).with_file("frontend/src/List.jsx");
    let issues = Classifier::new().classify(&signal);

    let kinds: Vec<(IssueType, Option<u32>)> = issues.iter().map(|i| (i.issue_type, i.line)).collect();
    assert!(kinds.contains(&(IssueType::MissingErrorHandling, Some(2))));
    assert!(kinds.contains(&(IssueType::DebugCode, Some(3))));
    assert!(kinds.contains(&(IssueType::MissingKeyProp, Some(4))));
}

#[test]
fn python_rules_do_not_apply_to_javascript() {
    let content = "try:\n    pass\nexcept:\n    pass\n";
    let py = Classifier::new()
        .classify(&Signal::text(SignalSource::Filesystem, content).with_file("backend/app.py"));
    assert!(py.iter().any(|i| i.issue_type == IssueType::BareExcept && i.line == Some(3)));

    let js = Classifier::new()
        .classify(&Signal::text(SignalSource::Filesystem, content).with_file("frontend/app.js"));
    assert!(js.iter().all(|i| i.issue_type != IssueType::BareExcept));
}

#[test]
fn unknown_extension_still_gets_generic_rules() {
    let content = "db_password = \"supersecret99\"\nconsole.log('x')\nbreakpoint()\n";
    let issues = Classifier::new()
        .classify(&Signal::text(SignalSource::Filesystem, content).with_file("deploy/settings.cfg"));

    assert!(issues
        .iter()
        .any(|i| i.issue_type == IssueType::HardcodedSecret && i.severity == Severity::Critical));
    assert!(issues.iter().any(|i| i.issue_type == IssueType::DebugCode && i.line == Some(3)));
    // console.log is a JavaScript rule only
    assert!(!issues.iter().any(|i| i.line == Some(2)));
}

#[test]
fn browser_report_takes_location_from_stack() {
    let payload = "Uncaught TypeError: Cannot read properties of undefined (reading 'map')\n    at UserList (http://localhost:5173/src/components/UserList.jsx:18:22)";
    let issues = Classifier::new().classify(&Signal::text(SignalSource::Browser, payload));

    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_type, IssueType::TypeError);
    assert_eq!(issues[0].line, Some(18));
    assert!(issues[0].file.ends_with("src/components/UserList.jsx"));
}

#[test]
fn unrecognised_browser_error_is_still_reported() {
    let issues = Classifier::new().classify(&Signal::text(SignalSource::Browser, "Failed to load avatar"));
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_type, IssueType::BrowserError);
    assert_eq!(issues[0].severity, Severity::High);
    assert_eq!(issues[0].file, "browser");
}

#[test]
fn multi_line_process_output_yields_one_issue_per_matching_line() {
    let output = "Compiling...\nModule not found: Can't resolve './Header'\nTypeError: foo is not a function\nDone";
    let issues = Classifier::new().classify(&Signal::text(SignalSource::Process, output));
    let kinds: Vec<IssueType> = issues.iter().map(|i| i.issue_type).collect();
    assert_eq!(kinds, vec![IssueType::ModuleNotFound, IssueType::TypeError]);
}
