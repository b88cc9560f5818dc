//! Retrieval-augmented answer generation.
//!
//! [`AnswerGenerator`] turns a query plus retrieved [`KnowledgeMatch`]es into
//! a grounded answer by calling a [`TextGenerator`]. The prompt is a fixed
//! system instruction followed by the context chunks, each labeled
//! `[n] source_path`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::KnowledgeMatch;

/// Instruction sent as the system message on every answer request.
pub const SYSTEM_INSTRUCTION: &str = "You are an operations knowledge base assistant. \
Answer the user's question using only the context provided below. \
Cite the sources you rely on by their [n] label and source path. \
If the context does not contain enough information to answer, say so plainly \
instead of guessing.";

const EMPTY_CONTEXT_NOTE: &str =
    "No context was found in the knowledge base for this question.";

/// One chat-style generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Token accounting reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Provider output for a [`GenerationRequest`].
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// A text-generation backend.
///
/// Implementations report non-success responses as
/// [`KbError::GenerationProvider`](crate::KbError::GenerationProvider) and do
/// not retry.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn model_name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;
}

/// A grounded answer.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub confidence: f64,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Render the context block that follows the system instruction.
pub fn build_context_prompt(context: &[KnowledgeMatch]) -> String {
    if context.is_empty() {
        return format!("Context:\n{}", EMPTY_CONTEXT_NOTE);
    }

    let mut out = String::from("Context:\n");
    for (i, m) in context.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] {}\n{}\n",
            i + 1,
            m.chunk.source_path,
            m.chunk.content.trim()
        ));
    }
    out
}

/// Mean similarity over the matches that carry a score; `0.0` when none do.
pub fn confidence(context: &[KnowledgeMatch]) -> f64 {
    let scores: Vec<f64> = context.iter().filter_map(|m| m.similarity).collect();
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Distinct source paths, first occurrence order.
pub fn distinct_sources(context: &[KnowledgeMatch]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for m in context {
        if !sources.iter().any(|s| s == &m.chunk.source_path) {
            sources.push(m.chunk.source_path.clone());
        }
    }
    sources
}

pub struct AnswerGenerator {
    generator: Arc<dyn TextGenerator>,
    temperature: f32,
    max_tokens: u32,
}

impl AnswerGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            generator,
            temperature,
            max_tokens,
        }
    }

    pub async fn answer(&self, query: &str, context: &[KnowledgeMatch]) -> Result<Answer> {
        let request = GenerationRequest {
            system: format!("{}\n\n{}", SYSTEM_INSTRUCTION, build_context_prompt(context)),
            user: query.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            provider = self.generator.name(),
            model = self.generator.model_name(),
            context_chunks = context.len(),
            "generating answer"
        );
        let generation = self.generator.generate(&request).await?;

        Ok(Answer {
            answer: generation.text,
            confidence: confidence(context),
            sources: distinct_sources(context),
            usage: generation.usage,
        })
    }
}
