use std::sync::Arc;
use std::time::Duration;

use lw_core::config::ClassifierConfig;
use lw_core::types::Issue;
use lw_harness::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::{LlmError, LlmMessage, LlmProvider, ModelParams};

const SYSTEM_PROMPT: &str =
    "You are a code quality expert. Analyze code and suggest improvements. Answer with JSON only.";

/// What the deep-analysis collaborator is expected to return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeepReport {
    #[serde(default)]
    pub critical_issues: Vec<serde_json::Value>,
    #[serde(default)]
    pub recommended_fixes: Vec<serde_json::Value>,
    #[serde(default)]
    pub auto_apply_safe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeepOutcome {
    /// No high or critical finding, so Tier 2 was not consulted.
    Skipped,
    Refined { report: DeepReport },
    /// Tier 2 failed; the Tier-1 issues stand unchanged.
    Fallback { reason: String },
}

/// Tier-1 issues for one file plus whatever Tier 2 contributed.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub file: String,
    pub issues: Vec<Issue>,
    pub deep: DeepOutcome,
}

/// Delegates urgent findings to an LLM, bounded by a timeout and a circuit
/// breaker so a slow or failing provider never stalls the pipeline.
pub struct DeepAnalyzer {
    provider: Arc<dyn LlmProvider>,
    params: ModelParams,
    breaker: CircuitBreaker,
    max_content_chars: usize,
}

impl DeepAnalyzer {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &ClassifierConfig) -> Self {
        let breaker = CircuitBreaker::new(
            "deep-analysis",
            CircuitBreakerConfig {
                failure_threshold: config.deep_failure_threshold.max(1),
                success_threshold: 1,
                cooldown: Duration::from_secs(config.deep_cooldown_secs),
                call_timeout: Duration::from_secs(config.deep_timeout_secs),
            },
        );
        Self {
            provider,
            params: ModelParams {
                model: config.model.clone(),
                ..ModelParams::default()
            },
            breaker,
            max_content_chars: config.deep_max_content_chars,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Tier 2 runs only when Tier 1 found something high or critical.
    pub fn should_refine(issues: &[Issue]) -> bool {
        issues.iter().any(|i| i.severity.is_urgent())
    }

    pub async fn refine(&self, file_path: &str, content: &str, quick_issues: Vec<Issue>) -> Analysis {
        if !Self::should_refine(&quick_issues) {
            return Analysis {
                file: file_path.to_string(),
                issues: quick_issues,
                deep: DeepOutcome::Skipped,
            };
        }

        let messages = [
            LlmMessage::system(SYSTEM_PROMPT),
            LlmMessage::user(build_prompt(file_path, content, &quick_issues, self.max_content_chars)),
        ];

        let result = self
            .breaker
            .call(|| async {
                let response = self.provider.complete(&messages, &self.params).await?;
                parse_report(&response.text)
            })
            .await;

        let deep = match result {
            Ok(report) => {
                debug!(file = file_path, fixes = report.recommended_fixes.len(), "deep analysis refined");
                DeepOutcome::Refined { report }
            }
            Err(e) => {
                let reason = match e {
                    CircuitBreakerError::Open { .. } => format!("skipped: {e}"),
                    other => other.to_string(),
                };
                warn!(file = file_path, reason = %reason, "deep analysis fell back to tier 1");
                DeepOutcome::Fallback { reason }
            }
        };

        Analysis {
            file: file_path.to_string(),
            issues: quick_issues,
            deep,
        }
    }
}

fn build_prompt(file_path: &str, content: &str, issues: &[Issue], max_chars: usize) -> String {
    let excerpt: String = content.chars().take(max_chars).collect();
    let findings = if issues.is_empty() {
        "None".to_string()
    } else {
        issues
            .iter()
            .map(|i| match i.line {
                Some(line) => format!("- Line {line}: {} ({})", i.message, i.severity),
                None => format!("- {} ({})", i.message, i.severity),
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Analyze this code file for potential improvements.\n\n\
         File: {file_path}\n\n\
         Quick scan found these issues:\n{findings}\n\n\
         Code:\n```\n{excerpt}\n```\n\n\
         Respond with JSON:\n\
         {{\"critical_issues\": [...], \"recommended_fixes\": [...], \"auto_apply_safe\": true|false}}"
    )
}

/// Parse the model's answer, tolerating a Markdown code fence around it.
pub fn parse_report(text: &str) -> Result<DeepReport, LlmError> {
    let trimmed = text.trim();
    let body = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(LlmError::Malformed("no JSON object in response".into())),
    };
    serde_json::from_str(body).map_err(|e| LlmError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let text = "```json\n{\"critical_issues\": [], \"recommended_fixes\": [{\"line\": 3}], \"auto_apply_safe\": true}\n```";
        let report = parse_report(text).unwrap();
        assert!(report.auto_apply_safe);
        assert_eq!(report.recommended_fixes.len(), 1);
    }

    #[test]
    fn missing_fields_default() {
        let report = parse_report("{\"critical_issues\": [\"x\"]}").unwrap();
        assert_eq!(report.critical_issues.len(), 1);
        assert!(!report.auto_apply_safe);
    }

    #[test]
    fn rejects_prose_and_wrong_shapes() {
        assert!(parse_report("Looks fine to me!").is_err());
        assert!(parse_report("{\"auto_apply_safe\": \"maybe\"}").is_err());
    }

    #[test]
    fn prompt_truncates_content() {
        let content = "~".repeat(5000);
        let prompt = build_prompt("a.js", &content, &[], 2000);
        assert!(prompt.contains("Quick scan found these issues:\nNone"));
        assert_eq!(prompt.matches('~').count(), 2000);
    }
}
