//! Draft generation and query refinement over an LLM client.

use crate::types::RetrievalCandidate;
use dossier_core::{AppError, AppResult};
use dossier_llm::{LlmClient, LlmRequest};
use std::sync::Arc;
use tracing::{debug, instrument};

const DRAFT_MAX_TOKENS: u32 = 2000;
const REFINE_MAX_TOKENS: u32 = 200;
const REFINE_TEMPERATURE: f32 = 0.5;

/// Produces answer drafts and refined queries.
#[async_trait::async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Draft an answer to the query grounded in the candidate chunks.
    async fn draft(&self, query: &str, candidates: &[RetrievalCandidate]) -> AppResult<String>;

    /// Rewrite the query to address the issues raised in a critique.
    async fn refine(&self, query: &str, critique: &str) -> AppResult<String>;
}

/// Drafter backed by a text-completion LLM.
pub struct LlmDrafter {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmDrafter {
    pub fn new(client: Arc<dyn LlmClient>, model: String) -> Self {
        Self { client, model }
    }
}

/// Format candidates as a labeled context block. The critique prompt uses
/// the same block so the critic sees exactly what the drafter saw.
pub(crate) fn context_block(candidates: &[RetrievalCandidate]) -> String {
    candidates
        .iter()
        .map(|c| {
            let section = c
                .chunk
                .section
                .as_deref()
                .map(|s| format!(", Section: {}", s))
                .unwrap_or_default();
            format!(
                "[{}, Page {}{}]\n{}",
                c.chunk.id, c.chunk.page, section, c.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait::async_trait]
impl AnswerGenerator for LlmDrafter {
    #[instrument(skip(self, query, candidates), fields(candidates = candidates.len()))]
    async fn draft(&self, query: &str, candidates: &[RetrievalCandidate]) -> AppResult<String> {
        let context = context_block(candidates);

        let prompt = format!(
            "You are an assistant answering questions from a corpus of documents.\n\
             \n\
             Context from documents:\n\
             {context}\n\
             \n\
             Query: {query}\n\
             \n\
             IMPORTANT: You MUST cite a source for every fact or claim, using exactly\n\
             this format: [id, Page N] or [id, Page N, Section: title], where id is a\n\
             chunk id shown in the context above. Do not use square brackets for\n\
             anything other than citations.\n\
             \n\
             Example: \"The decision was issued on March 15 [case-42-c3, Page 2, Section: Decision].\"\n\
             \n\
             Provide a comprehensive answer based only on the context. If the context\n\
             does not contain the answer, say so plainly."
        );

        let request = LlmRequest::new(prompt, self.model.clone()).with_max_tokens(DRAFT_MAX_TOKENS);
        let response = self.client.complete(&request).await?;

        if response.content.trim().is_empty() {
            return Err(AppError::Generation("model returned an empty draft".to_string()));
        }

        debug!("Drafted {} chars", response.content.len());
        Ok(response.content)
    }

    #[instrument(skip(self, query, critique))]
    async fn refine(&self, query: &str, critique: &str) -> AppResult<String> {
        let prompt = format!(
            "Based on this critique, refine the search query to get better results:\n\
             \n\
             Original Query: {query}\n\
             \n\
             Critique: {critique}\n\
             \n\
             Respond with only the refined query, nothing else."
        );

        let request = LlmRequest::new(prompt, self.model.clone())
            .with_max_tokens(REFINE_MAX_TOKENS)
            .with_temperature(REFINE_TEMPERATURE);
        let response = self.client.complete(&request).await?;

        let refined = response.content.trim().to_string();
        if refined.is_empty() {
            return Err(AppError::Generation("model returned an empty refined query".to_string()));
        }
        Ok(refined)
    }
}
