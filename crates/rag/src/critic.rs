//! Critique pass: a second LLM call validates the draft against the
//! retrieved chunks.

use crate::drafter::context_block;
use crate::types::{Citation, RetrievalCandidate};
use dossier_core::{AppError, AppResult};
use dossier_llm::{LlmClient, LlmRequest};
use std::sync::Arc;
use tracing::{debug, instrument};

const CRITIQUE_MAX_TOKENS: u32 = 500;
const CRITIQUE_TEMPERATURE: f32 = 0.3;

/// The critic's ruling on a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Revise,
}

/// A critique outcome: the decision plus the critic's prose, which feeds
/// query refinement on the revise path.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub decision: Decision,
    pub critique: String,
}

/// Validates a draft answer against the query it claims to answer and the
/// chunks it was drafted from. The candidates are the critic's ground
/// truth for the hallucination check.
#[async_trait::async_trait]
pub trait CritiqueValidator: Send + Sync {
    async fn critique(
        &self,
        query: &str,
        draft: &str,
        citations: &[Citation],
        candidates: &[RetrievalCandidate],
    ) -> AppResult<Verdict>;
}

/// Critic backed by a text-completion LLM.
pub struct LlmCritic {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmCritic {
    pub fn new(client: Arc<dyn LlmClient>, model: String) -> Self {
        Self { client, model }
    }
}

/// Read a decision out of free-form critique text. ACCEPT wins only when
/// the critic says it without also flagging problems.
fn parse_decision(critique: &str) -> Decision {
    let upper = critique.to_uppercase();
    if upper.contains("REVISE") || upper.contains("ISSUE") || upper.contains("PROBLEM") {
        Decision::Revise
    } else if upper.contains("ACCEPT") {
        Decision::Accept
    } else {
        // An inconclusive critique is treated as a revise signal.
        Decision::Revise
    }
}

/// Build the critique prompt. The draft is judged against the same context
/// block the drafter was given.
fn critique_prompt(
    query: &str,
    draft: &str,
    citations: &[Citation],
    candidates: &[RetrievalCandidate],
) -> String {
    format!(
        "You are an expert reviewing an AI-generated answer.\n\
         \n\
         Original Query: {query}\n\
         \n\
         Source Chunks:\n\
         {context}\n\
         \n\
         Draft Answer:\n\
         {draft}\n\
         \n\
         Citations Found: {count}\n\
         \n\
         Please critique this answer. Check:\n\
         1. Does the answer cite sources properly? (Look for [id, Page N] format)\n\
         2. Are there any conflicts or contradictions between different sources?\n\
         3. Is the answer accurate and complete?\n\
         4. Are there any hallucinations (facts not in the source chunks above)?\n\
         \n\
         Provide your critique. If the answer is good, say \"ACCEPT\". If there\n\
         are issues, say \"REVISE\" and explain why.",
        context = context_block(candidates),
        count = citations.len()
    )
}

#[async_trait::async_trait]
impl CritiqueValidator for LlmCritic {
    #[instrument(skip_all)]
    async fn critique(
        &self,
        query: &str,
        draft: &str,
        citations: &[Citation],
        candidates: &[RetrievalCandidate],
    ) -> AppResult<Verdict> {
        let prompt = critique_prompt(query, draft, citations, candidates);

        let request = LlmRequest::new(prompt, self.model.clone())
            .with_max_tokens(CRITIQUE_MAX_TOKENS)
            .with_temperature(CRITIQUE_TEMPERATURE);

        let response = self
            .client
            .complete(&request)
            .await
            .map_err(|e| AppError::Generation(format!("critique call failed: {}", e)))?;

        let critique = response.content.trim().to_string();
        let decision = parse_decision(&critique);
        debug!(?decision, "Critique complete");

        Ok(Verdict { decision, critique })
    }
}
