//! Issue classification for live mode.
//!
//! Tier 1 is a deterministic pattern scan over signal text ([`rules`],
//! [`classifier`]). Tier 2 hands high-severity findings to an LLM for
//! refinement ([`deep_analysis`]) and degrades to Tier 1 on any failure.

pub mod classifier;
pub mod deep_analysis;
pub mod llm;
pub mod rules;

pub use classifier::Classifier;
pub use deep_analysis::{Analysis, DeepAnalyzer, DeepOutcome, DeepReport};
pub use llm::{AnthropicProvider, Completion, LlmError, LlmMessage, LlmProvider, MockProvider, ModelParams, Role};
