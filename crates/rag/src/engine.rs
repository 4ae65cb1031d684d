//! Answer engine: the bounded critique-and-revise pipeline.
//!
//! One query runs through an explicit state machine:
//! RETRIEVE -> RERANK -> DRAFT -> CRITIQUE -> ACCEPT, with CRITIQUE able
//! to route back through REVISE -> RETRIEVE up to `MAX_REVISIONS` times.
//! Citation violations found after drafting skip the critique call and go
//! straight to REVISE. Exhausting the revision budget forces an accept
//! with `degraded_confidence` set. Queries run concurrently up to a
//! configured limit; stages within one query are strictly sequential.

use crate::archive::AnswerArchive;
use crate::citation::{resolve_citations, salvage_citations, CitationViolation};
use crate::critic::{CritiqueValidator, Decision};
use crate::drafter::AnswerGenerator;
use crate::embeddings::EmbeddingProvider;
use crate::rerank::{rerank_candidates, Reranker};
use crate::retrieval::Retriever;
use crate::store::ChunkStore;
use crate::types::{Answer, AnswerRecord, Citation, RetrievalCandidate, ScopeFilter};
use chrono::Utc;
use dossier_core::{AppError, AppResult, EngineConfig};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Upper bound on REVISE transitions within one query run.
pub const MAX_REVISIONS: u32 = 3;

/// Initial backoff duration in milliseconds
const INITIAL_BACKOFF_MS: u64 = 100;

const INSUFFICIENT_INFORMATION: &str =
    "No relevant information was found in the selected documents.";

/// Pipeline stages. `Accept` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Retrieve,
    Rerank,
    Draft,
    Critique,
    Revise,
    Accept,
    Failed,
}

/// Events that drive stage transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Retrieved,
    RetrievalExhausted,
    Reranked,
    DraftValid,
    DraftCiteViolation,
    GenerationExhausted,
    VerdictAccept,
    VerdictRevise,
    QueryRefined,
    BudgetExhausted,
}

/// Pure transition function for the pipeline state machine.
///
/// `Event::BudgetExhausted` is the forced-accept path: a revise signal
/// arriving with no revision budget left terminates in `Accept`, never in
/// `Failed`.
fn next_stage(stage: Stage, event: Event) -> Stage {
    match (stage, event) {
        (Stage::Retrieve, Event::Retrieved) => Stage::Rerank,
        (Stage::Retrieve, Event::RetrievalExhausted) => Stage::Failed,
        (Stage::Rerank, Event::Reranked) => Stage::Draft,
        (Stage::Draft, Event::DraftValid) => Stage::Critique,
        (Stage::Draft, Event::DraftCiteViolation) => Stage::Revise,
        (Stage::Draft, Event::GenerationExhausted) => Stage::Failed,
        (Stage::Draft, Event::BudgetExhausted) => Stage::Accept,
        (Stage::Critique, Event::VerdictAccept) => Stage::Accept,
        (Stage::Critique, Event::VerdictRevise) => Stage::Revise,
        (Stage::Critique, Event::GenerationExhausted) => Stage::Failed,
        (Stage::Critique, Event::BudgetExhausted) => Stage::Accept,
        (Stage::Revise, Event::QueryRefined) => Stage::Retrieve,
        (terminal @ (Stage::Accept | Stage::Failed), _) => terminal,
        (stage, event) => {
            // Unreachable by construction of the run loop.
            debug_assert!(false, "invalid transition {:?} on {:?}", stage, event);
            stage
        }
    }
}

/// Mutable state threaded through one query run.
#[derive(Debug)]
struct PipelineState {
    stage: Stage,
    query: String,
    revision_count: u32,
    candidates: Vec<RetrievalCandidate>,
    draft: String,
    citations: Vec<Citation>,
    seen_chunk_ids: BTreeSet<String>,
    degraded_confidence: bool,
}

impl PipelineState {
    fn new(query: &str) -> Self {
        Self {
            stage: Stage::Retrieve,
            query: query.to_string(),
            revision_count: 0,
            candidates: Vec::new(),
            draft: String::new(),
            citations: Vec::new(),
            seen_chunk_ids: BTreeSet::new(),
            degraded_confidence: false,
        }
    }

    fn apply(&mut self, event: Event) {
        self.stage = next_stage(self.stage, event);
    }
}

/// Per-query options.
#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {
    /// Restrict retrieval to these documents; `None` searches everything.
    pub scope: ScopeFilter,

    /// Overall deadline for the run. Exceeding it cancels any in-flight
    /// provider call and surfaces as a cancellation error.
    pub deadline: Option<Duration>,
}

/// The query-answering engine.
pub struct AnswerEngine {
    retriever: Retriever,
    reranker: Option<Arc<dyn Reranker>>,
    drafter: Arc<dyn AnswerGenerator>,
    critic: Arc<dyn CritiqueValidator>,
    archive: Option<Arc<dyn AnswerArchive>>,
    config: EngineConfig,
    permits: Semaphore,
}

impl AnswerEngine {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
        reranker: Option<Arc<dyn Reranker>>,
        drafter: Arc<dyn AnswerGenerator>,
        critic: Arc<dyn CritiqueValidator>,
        archive: Option<Arc<dyn AnswerArchive>>,
        config: EngineConfig,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent_queries.max(1));
        Self {
            retriever: Retriever::new(embeddings, store, config.clone()),
            reranker,
            drafter,
            critic,
            archive,
            config,
            permits,
        }
    }

    /// Answer a query, honoring the concurrency limit and optional deadline.
    #[instrument(skip(self, query, options), fields(query_len = query.len()))]
    pub async fn answer_query(&self, query: &str, options: AnswerOptions) -> AppResult<Answer> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::Cancelled("engine shut down".to_string()))?;

        let run = self.run_pipeline(query, &options.scope);
        let (answer, retrieved_chunk_ids) = match options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, run)
                .await
                .map_err(|_| AppError::Cancelled("query deadline exceeded".to_string()))??,
            None => run.await?,
        };

        self.persist(query, &answer, retrieved_chunk_ids).await;
        Ok(answer)
    }

    async fn run_pipeline(
        &self,
        query: &str,
        scope: &ScopeFilter,
    ) -> AppResult<(Answer, Vec<String>)> {
        let mut state = PipelineState::new(query);

        loop {
            match state.stage {
                Stage::Retrieve => self.do_retrieve(&mut state, scope).await?,
                Stage::Rerank => self.do_rerank(&mut state).await,
                Stage::Draft => self.do_draft(&mut state).await?,
                Stage::Critique => self.do_critique(&mut state).await?,
                Stage::Revise => do_revise(&mut state),
                Stage::Accept => {
                    info!(
                        revisions = state.revision_count,
                        degraded = state.degraded_confidence,
                        "Answer accepted"
                    );
                    let answer = Answer {
                        answer: state.draft,
                        citations: state.citations,
                        retrieved_count: state.candidates.len() as u32,
                        revision_count: state.revision_count,
                        degraded_confidence: state.degraded_confidence,
                    };
                    return Ok((answer, state.seen_chunk_ids.into_iter().collect()));
                }
                Stage::Failed => {
                    // Failure paths return early with the causing error.
                    return Err(AppError::Other("pipeline failed without cause".to_string()));
                }
            }

            // Empty candidate set is a valid terminal outcome, not an error.
            if state.stage == Stage::Rerank && state.candidates.is_empty() {
                debug!("No candidates in scope, short-circuiting");
                let answer = Answer {
                    answer: INSUFFICIENT_INFORMATION.to_string(),
                    citations: Vec::new(),
                    retrieved_count: 0,
                    revision_count: state.revision_count,
                    degraded_confidence: false,
                };
                return Ok((answer, state.seen_chunk_ids.into_iter().collect()));
            }
        }
    }

    async fn do_retrieve(&self, state: &mut PipelineState, scope: &ScopeFilter) -> AppResult<()> {
        match self.retriever.retrieve(&state.query, scope).await {
            Ok(candidates) => {
                state.candidates = candidates;
                state.apply(Event::Retrieved);
                Ok(())
            }
            Err(e) => {
                state.apply(Event::RetrievalExhausted);
                Err(e)
            }
        }
    }

    async fn do_rerank(&self, state: &mut PipelineState) {
        let candidates = std::mem::take(&mut state.candidates);
        state.candidates = rerank_candidates(
            self.reranker.as_deref(),
            &state.query,
            candidates,
            self.config.top_k,
            Duration::from_secs(self.config.call_timeout_secs),
        )
        .await;
        for candidate in &state.candidates {
            state.seen_chunk_ids.insert(candidate.chunk.id.clone());
        }
        state.apply(Event::Reranked);
    }

    async fn do_draft(&self, state: &mut PipelineState) -> AppResult<()> {
        let query = &state.query;
        let candidates = &state.candidates;
        let draft = match self
            .call_with_retries("draft", || self.drafter.draft(query, candidates))
            .await
        {
            Ok(draft) => draft,
            Err(e) => {
                state.apply(Event::GenerationExhausted);
                return Err(e);
            }
        };
        state.draft = draft;

        match resolve_citations(&state.draft, &state.candidates) {
            Ok(citations) => {
                state.citations = citations;
                state.apply(Event::DraftValid);
            }
            Err(violations) => {
                if state.revision_count >= MAX_REVISIONS {
                    self.force_accept(state, Some(&violations));
                } else {
                    warn!(
                        violations = violations.len(),
                        "Citation violations in draft, revising without critique"
                    );
                    state.query = revision_query_for_violations(&state.query, &violations);
                    state.apply(Event::DraftCiteViolation);
                }
            }
        }
        Ok(())
    }

    async fn do_critique(&self, state: &mut PipelineState) -> AppResult<()> {
        let query = &state.query;
        let draft = &state.draft;
        let citations = &state.citations;
        let candidates = &state.candidates;
        let verdict = match self
            .call_with_retries("critique", || {
                self.critic.critique(query, draft, citations, candidates)
            })
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                state.apply(Event::GenerationExhausted);
                return Err(e);
            }
        };

        match verdict.decision {
            Decision::Accept => state.apply(Event::VerdictAccept),
            Decision::Revise => {
                if state.revision_count >= MAX_REVISIONS {
                    self.force_accept(state, None);
                } else {
                    debug!("Critique requested revision: {}", verdict.critique);
                    let query = &state.query;
                    let critique = &verdict.critique;
                    match self
                        .call_with_retries("query refinement", || {
                            self.drafter.refine(query, critique)
                        })
                        .await
                    {
                        Ok(refined) => state.query = refined,
                        Err(e) => {
                            warn!("Query refinement failed, rewriting locally: {}", e);
                            state.query =
                                revision_query_for_critique(&state.query, &verdict.critique);
                        }
                    }
                    state.apply(Event::VerdictRevise);
                }
            }
        }
        Ok(())
    }

    /// Revision budget spent: accept the current draft with degraded
    /// confidence, keeping only citations that resolve.
    fn force_accept(&self, state: &mut PipelineState, violations: Option<&[CitationViolation]>) {
        if let Some(violations) = violations {
            warn!(
                violations = violations.len(),
                "Revision budget exhausted with citation violations, forcing accept"
            );
            state.citations = salvage_citations(&state.draft, &state.candidates);
        } else {
            warn!("Revision budget exhausted, forcing accept");
        }
        state.degraded_confidence = true;
        state.apply(Event::BudgetExhausted);
    }

    /// Run a generation call under the per-call timeout, retrying transient
    /// failures with exponential backoff. Timeouts count as transport
    /// errors.
    async fn call_with_retries<T, Fut, F>(&self, what: &str, mut call: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.config.max_retries {
            let outcome = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Generation(format!("{} call timed out", what))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                        warn!(
                            "{} failed (attempt {}/{}), retrying in {}ms",
                            what, attempt, self.config.max_retries, backoff_ms
                        );
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }

        let cause = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        Err(AppError::Generation(format!(
            "{} failed after {} attempts: {}",
            what, self.config.max_retries, cause
        )))
    }

    /// Archive the completed run. Best effort: a write failure is logged
    /// and does not take the answer down with it.
    async fn persist(&self, original_query: &str, answer: &Answer, retrieved_chunk_ids: Vec<String>) {
        let Some(archive) = &self.archive else {
            return;
        };
        let record = AnswerRecord {
            id: Uuid::new_v4().to_string(),
            query: original_query.to_string(),
            answer: answer.answer.clone(),
            citations: answer.citations.clone(),
            revision_count: answer.revision_count,
            retrieved_chunk_ids,
            created_at: Utc::now(),
        };
        if let Err(e) = archive.record(&record).await {
            warn!("Failed to archive answer: {}", e);
        }
    }
}

fn do_revise(state: &mut PipelineState) {
    state.revision_count += 1;
    state.candidates.clear();
    state.citations.clear();
    state.apply(Event::QueryRefined);
}

/// Local query rewrite used when a draft cites outside the candidate set.
/// No model call is spent; the hint steers the next draft toward the
/// grammar without changing the information need.
fn revision_query_for_violations(query: &str, violations: &[CitationViolation]) -> String {
    let detail = violations
        .first()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "invalid citation".to_string());
    format!("{}{}{})", base_query(query), REVISION_HINT, detail)
}

/// Fallback rewrite when the refinement call itself fails: append the
/// salient critique reason to the original query so the revision is still
/// derived from the critique.
fn revision_query_for_critique(query: &str, critique: &str) -> String {
    let reason = critique
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("REVISE").trim_start_matches(':').trim())
        .filter(|line| !line.is_empty())
        .unwrap_or("the previous draft was rejected");
    let reason: String = reason.chars().take(MAX_HINT_CHARS).collect();
    format!("{}{}{})", base_query(query), CRITIQUE_HINT, reason)
}

/// Strip any hint a previous revision appended, so repeated revisions
/// rewrite the original query instead of stacking hints.
fn base_query(query: &str) -> &str {
    let q = query.split(REVISION_HINT).next().unwrap_or(query);
    q.split(CRITIQUE_HINT).next().unwrap_or(q)
}

const REVISION_HINT: &str = " (cite only the provided sources; previous attempt had ";
const CRITIQUE_HINT: &str = " (address this critique: ";
const MAX_HINT_CHARS: usize = 120;
