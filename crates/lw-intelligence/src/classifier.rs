use lw_core::language::Language;
use lw_core::types::{Issue, IssueType, Severity, Signal, SignalSource};

use crate::rules::{self, LineContext, RuleFamily};

/// Bytes of preceding text visible to context-sensitive source rules.
const CONTEXT_WINDOW: usize = 200;

/// Lines longer than this (minified bundles, data blobs) are not scanned.
const MAX_SCANNED_LINE: usize = 2000;

/// Tier-1 classifier: a deterministic, side-effect-free mapping from one
/// [`Signal`] to zero or more [`Issue`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, signal: &Signal) -> Vec<Issue> {
        let text = signal.text_payload();
        if text.trim().is_empty() {
            return Vec::new();
        }
        match signal.source {
            SignalSource::Filesystem => {
                let file = signal.file.as_deref().unwrap_or("unknown");
                scan_source(file, text)
            }
            SignalSource::Browser => scan_browser(signal.file.as_deref(), text),
            SignalSource::Process | SignalSource::Network => {
                scan_diagnostics(signal.source, signal.file.as_deref(), text)
            }
        }
    }
}

fn scan_source(file: &str, content: &str) -> Vec<Issue> {
    let family = RuleFamily::for_language(Language::from_path(file));
    let specific = family.rules();
    let generic = rules::generic_rules();

    let mut issues = Vec::new();
    let mut offset = 0usize;
    for (idx, line) in content.split('\n').enumerate() {
        let start = offset;
        offset += line.len() + 1;
        if line.len() > MAX_SCANNED_LINE || line.trim().is_empty() {
            continue;
        }
        let ctx = LineContext {
            line,
            preceding: preceding_window(content, start),
        };
        let line_no = u32::try_from(idx + 1).ok();
        for rule in specific.iter().chain(generic) {
            if (rule.applies)(&ctx) {
                issues.push(
                    Issue::new(rule.issue_type, rule.severity, file, rule.message)
                        .with_line(line_no)
                        .with_suggestion(rule.suggestion),
                );
            }
        }
    }
    issues
}

fn preceding_window(content: &str, end: usize) -> &str {
    let mut start = end.saturating_sub(CONTEXT_WINDOW);
    while !content.is_char_boundary(start) {
        start += 1;
    }
    &content[start..end]
}

/// One issue per matching line, first rule wins.
fn scan_diagnostics(source: SignalSource, file: Option<&str>, text: &str) -> Vec<Issue> {
    text.lines()
        .filter(|l| !l.trim().is_empty() && l.len() <= MAX_SCANNED_LINE)
        .filter_map(|line| {
            let rule = rules::match_diagnostic(line)?;
            let location = rules::extract_location(line).unwrap_or_default();
            let file = location
                .file
                .or_else(|| file.map(str::to_string))
                .unwrap_or_else(|| source.to_string());
            Some(
                Issue::new(rule.issue_type, rule.severity, file, rule.message(line))
                    .with_line(location.line)
                    .with_suggestion(rule.suggestion),
            )
        })
        .collect()
}

/// A browser report is a single error: message on the first line, stack
/// after. The first matching line decides the type; the location comes from
/// the first stack frame that has one.
fn scan_browser(file: Option<&str>, text: &str) -> Vec<Issue> {
    let matched = text
        .lines()
        .find_map(|line| rules::match_diagnostic(line).map(|rule| (rule, line)));
    let location = text.lines().find_map(rules::extract_location).unwrap_or_default();
    let file = location
        .file
        .or_else(|| file.map(str::to_string))
        .unwrap_or_else(|| SignalSource::Browser.to_string());

    let issue = match matched {
        Some((rule, line)) => Issue::new(rule.issue_type, rule.severity, file, rule.message(line))
            .with_suggestion(rule.suggestion),
        None => {
            let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or(text);
            Issue::new(IssueType::BrowserError, Severity::High, file, first.trim())
                .with_suggestion("Open the browser console for the full stack trace")
        }
    };
    vec![issue.with_line(location.line)]
}
