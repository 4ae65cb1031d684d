//! Retrieval service: query embedding plus hybrid search.
//!
//! Over-fetches candidates from the chunk store and optionally blends a
//! keyword-overlap signal into the vector distance. Embedding and store
//! calls are retried with exponential backoff inside a per-call timeout;
//! exhausting the budget surfaces as a retrieval error.

use crate::embeddings::EmbeddingProvider;
use crate::store::ChunkStore;
use crate::types::{RetrievalCandidate, ScopeFilter};
use dossier_core::{AppError, AppResult, EngineConfig};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Initial backoff duration in milliseconds
const INITIAL_BACKOFF_MS: u64 = 100;

/// How strongly keyword overlap pulls a candidate forward in hybrid mode.
/// A full-overlap chunk has its distance scaled by (1 - weight).
const OVERLAP_WEIGHT: f32 = 0.3;

/// Retrieval service over an embedding provider and a chunk store.
pub struct Retriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
    config: EngineConfig,
}

impl Retriever {
    /// Create a retriever with the given providers and tuning knobs.
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            config,
        }
    }

    /// Retrieve an over-fetched candidate set for the query.
    ///
    /// Returns candidates ordered by ascending (possibly keyword-blended)
    /// distance, ties broken by ascending chunk id. An empty result is a
    /// valid "no information available" outcome, not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        scope: &ScopeFilter,
    ) -> AppResult<Vec<RetrievalCandidate>> {
        let query_embedding = self
            .with_retries("query embedding", || self.embeddings.embed(query))
            .await?;

        let scored = self
            .with_retries("vector search", || {
                self.store.search(&query_embedding, self.config.fetch_k, scope)
            })
            .await?;

        let mut candidates: Vec<RetrievalCandidate> = scored
            .into_iter()
            .map(|(chunk, distance)| RetrievalCandidate {
                chunk,
                distance,
                rerank_score: None,
            })
            .collect();

        if self.config.hybrid {
            blend_keyword_overlap(query, &mut candidates);
        }

        tracing::debug!(
            "Retrieved {} candidates (fetch_k = {}, hybrid = {})",
            candidates.len(),
            self.config.fetch_k,
            self.config.hybrid
        );

        Ok(candidates)
    }

    /// Run a provider call under the per-call timeout, retrying transient
    /// failures with exponential backoff. Timeouts count as transport
    /// errors.
    async fn with_retries<T, Fut, F>(&self, what: &str, mut call: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.config.max_retries {
            let outcome = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Retrieval(format!("{} timed out", what))),
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
        Err(AppError::Retrieval(format!(
            "{} failed after {} attempts: {}",
            what, self.config.max_retries, cause
        )))
    }
}

/// Blend a keyword-overlap signal into candidate distances and re-rank.
///
/// Overlap is the fraction of distinct query terms (3+ chars) present in
/// the chunk text; full overlap scales the distance by (1 - OVERLAP_WEIGHT).
/// Ordering stays deterministic: ties break by ascending chunk id.
fn blend_keyword_overlap(query: &str, candidates: &mut Vec<RetrievalCandidate>) {
    let query_terms: HashSet<String> = terms_of(query);
    if query_terms.is_empty() {
        return;
    }

    for candidate in candidates.iter_mut() {
        let chunk_terms = terms_of(&candidate.chunk.text);
        let matched = query_terms
            .iter()
            .filter(|term| chunk_terms.contains(*term))
            .count();
        let overlap = matched as f32 / query_terms.len() as f32;
        candidate.distance *= 1.0 - OVERLAP_WEIGHT * overlap;
    }

    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

fn terms_of(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_string())
        .collect()
}
