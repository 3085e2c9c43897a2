//! Explanation phase: asks an external collaborator why the chosen module
//! makes sense. Strictly optional: any failure leaves the decision intact and
//! the engine substitutes the deterministic fallback reason.
//!
//! `DecisionEngine` holds an `Option<Arc<dyn Explainer>>`; `LlmExplainer` is
//! the production backend.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::prompts::EXPLANATION_PROMPT_TEMPLATE;
use crate::engine::signals::{SignalKind, SignalVector};
use crate::llm_client::prompts::{DECISION_IS_FINAL_INSTRUCTION, PLAIN_TEXT_SYSTEM};
use crate::llm_client::{LlmClient, LlmError};
use crate::models::module::LearningModule;
use crate::services::circuit_breaker::Rejected;

/// Explanations are cut to this many sentences.
pub const MAX_SENTENCES: usize = 2;

#[derive(Debug, Error)]
pub enum ExplanationError {
    #[error("explanation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Unavailable(#[from] Rejected),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("explanation was empty")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct ExplanationRequest {
    pub module: LearningModule,
    pub signals: SignalVector,
    pub score: f64,
    pub depth: u32,
    pub dominant: SignalKind,
}

#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, request: &ExplanationRequest) -> Result<String, ExplanationError>;
}

pub struct LlmExplainer(pub LlmClient);

#[async_trait]
impl Explainer for LlmExplainer {
    async fn explain(&self, request: &ExplanationRequest) -> Result<String, ExplanationError> {
        let prompt = build_prompt(request);
        let system = format!("{PLAIN_TEXT_SYSTEM} {DECISION_IS_FINAL_INSTRUCTION}");
        let text = self.0.call_text(&prompt, &system).await?;
        let text = first_sentences(&text, MAX_SENTENCES);
        if text.is_empty() {
            return Err(ExplanationError::Empty);
        }
        Ok(text)
    }
}

pub fn build_prompt(request: &ExplanationRequest) -> String {
    let skill = request
        .module
        .owning_skill()
        .map(|s| s.label())
        .unwrap_or("the fundamentals of the program");
    let signals = SignalKind::ALL
        .iter()
        .map(|k| format!("- {}: {:.2}", k.name(), request.signals.get(*k)))
        .collect::<Vec<_>>()
        .join("\n");

    EXPLANATION_PROMPT_TEMPLATE
        .replace("{module}", request.module.label())
        .replace("{skill}", skill)
        .replace("{depth}", &request.depth.to_string())
        .replace("{score}", &format!("{:.2}", request.score))
        .replace("{dominant}", request.dominant.name())
        .replace("{signals}", &signals)
}

/// Keeps at most `max` sentences of `text`, collapsing whitespace.
pub fn first_sentences(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::new();
    let mut count = 0;
    let mut chars = collapsed.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            count += 1;
            if count >= max {
                break;
            }
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ExplanationRequest {
        ExplanationRequest {
            module: LearningModule::ScalabilityLab,
            signals: SignalVector {
                weakness: 0.9,
                ..SignalVector::NEUTRAL
            },
            score: 0.66,
            depth: 2,
            dominant: SignalKind::Weakness,
        }
    }

    #[test]
    fn test_prompt_fills_every_placeholder() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("Scalability Lab"));
        assert!(prompt.contains("scalability"));
        assert!(prompt.contains("routing number 2"));
        assert!(prompt.contains("- weakness: 0.90"));
        assert!(prompt.contains("0.66"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_first_sentences_truncates() {
        let text = "One is here. Two follows!  Three is dropped. Four too.";
        assert_eq!(first_sentences(text, 2), "One is here. Two follows!");
    }

    #[test]
    fn test_first_sentences_ignores_inline_periods() {
        let text = "Score is 0.90 today. Next.";
        assert_eq!(first_sentences(text, 1), "Score is 0.90 today.");
    }

    #[test]
    fn test_first_sentences_keeps_unterminated_text() {
        assert_eq!(first_sentences("  no period here  ", 2), "no period here");
        assert_eq!(first_sentences("   ", 2), "");
    }
}
