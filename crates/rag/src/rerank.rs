//! Candidate reranking with a remote cross-encoder and a local fallback.
//!
//! The reranker is advisory: when the remote service is unreachable or
//! returns garbage, candidates fall back to their retrieval distance
//! ordering. Rerank failure never fails a query.

use crate::types::RetrievalCandidate;
use dossier_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A single reranked entry: index into the submitted candidate list plus
/// the cross-encoder relevance score (higher is more relevant).
#[derive(Debug, Clone)]
pub struct RerankResult {
    pub index: usize,
    pub score: f32,
}

/// Scores a candidate document list against a query.
#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String]) -> AppResult<Vec<RerankResult>>;
}

/// Reranker backed by a `/v1/rerank` HTTP endpoint (Cohere-style wire shape).
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankEntry>,
}

#[derive(Deserialize)]
struct RerankEntry {
    index: usize,
    relevance_score: f32,
}

impl HttpReranker {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url,
            model,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl Reranker for HttpReranker {
    #[instrument(skip(self, query, documents), fields(documents = documents.len()))]
    async fn rerank(&self, query: &str, documents: &[String]) -> AppResult<Vec<RerankResult>> {
        let url = format!("{}/v1/rerank", self.base_url.trim_end_matches('/'));
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: documents.len(),
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Retrieval(format!("rerank request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Retrieval(format!(
                "rerank service returned {}",
                response.status()
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| AppError::Retrieval(format!("invalid rerank response: {}", e)))?;

        let results: Vec<RerankResult> = parsed
            .results
            .into_iter()
            .map(|entry| RerankResult {
                index: entry.index,
                score: entry.relevance_score,
            })
            .collect();

        if results.iter().any(|r| r.index >= documents.len()) {
            return Err(AppError::Retrieval(
                "rerank response references out-of-range document".to_string(),
            ));
        }

        Ok(results)
    }
}

/// Rerank candidates down to `top_k`, falling back to distance order if the
/// reranker is absent, fails, or does not respond within `timeout`.
///
/// On the rerank path, candidates are ordered by descending score with
/// ascending chunk id breaking ties; each kept candidate carries its score
/// in `rerank_score`. On the fallback path, ordering is ascending distance
/// with the same id tie-break and `rerank_score` stays `None`.
pub async fn rerank_candidates(
    reranker: Option<&dyn Reranker>,
    query: &str,
    mut candidates: Vec<RetrievalCandidate>,
    top_k: usize,
    timeout: Duration,
) -> Vec<RetrievalCandidate> {
    if candidates.is_empty() || top_k == 0 {
        candidates.truncate(top_k);
        return candidates;
    }

    if let Some(reranker) = reranker {
        let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        // A hung reranker must not stall the pipeline; elapse falls back
        // like any other rerank failure.
        let outcome = tokio::time::timeout(timeout, reranker.rerank(query, &documents))
            .await
            .unwrap_or_else(|_| Err(AppError::Retrieval("rerank call timed out".to_string())));
        match outcome {
            Ok(results) if results.iter().all(|r| r.index < candidates.len()) => {
                for result in &results {
                    candidates[result.index].rerank_score = Some(result.score);
                }
                candidates.sort_by(|a, b| {
                    let sa = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
                    let sb = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
                    sb.partial_cmp(&sa)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
                });
                candidates.truncate(top_k);
                debug!("Reranked to {} candidates", candidates.len());
                return candidates;
            }
            Ok(_) => {
                warn!("Reranker returned out-of-range indices, falling back to distance order");
                for candidate in candidates.iter_mut() {
                    candidate.rerank_score = None;
                }
            }
            Err(e) => {
                warn!("Reranker unavailable, falling back to distance order: {}", e);
                for candidate in candidates.iter_mut() {
                    candidate.rerank_score = None;
                }
            }
        }
    }

    fallback_order(&mut candidates);
    candidates.truncate(top_k);
    candidates
}

/// Deterministic fallback: ascending distance, ties by ascending chunk id.
fn fallback_order(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;

    const CALL_TIMEOUT: Duration = Duration::from_secs(5);

    fn candidate(id: &str, distance: f32) -> RetrievalCandidate {
        RetrievalCandidate {
            chunk: Chunk {
                id: id.to_string(),
                document_id: "doc".to_string(),
                document_version: 1,
                position: 0,
                page: 1,
                section: None,
                text: format!("text of {}", id),
                embedding: None,
            },
            distance,
            rerank_score: None,
        }
    }

    struct ScriptedReranker {
        results: Vec<RerankResult>,
    }

    #[async_trait::async_trait]
    impl Reranker for ScriptedReranker {
        async fn rerank(&self, _query: &str, _documents: &[String]) -> AppResult<Vec<RerankResult>> {
            Ok(self
                .results
                .iter()
                .map(|r| RerankResult {
                    index: r.index,
                    score: r.score,
                })
                .collect())
        }
    }

    struct BrokenReranker;

    #[async_trait::async_trait]
    impl Reranker for BrokenReranker {
        async fn rerank(&self, _query: &str, _documents: &[String]) -> AppResult<Vec<RerankResult>> {
            Err(AppError::Retrieval("service unavailable".to_string()))
        }
    }

    struct HungReranker;

    #[async_trait::async_trait]
    impl Reranker for HungReranker {
        async fn rerank(&self, _query: &str, _documents: &[String]) -> AppResult<Vec<RerankResult>> {
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_rerank_orders_by_descending_score() {
        let reranker = ScriptedReranker {
            results: vec![
                RerankResult { index: 0, score: 0.2 },
                RerankResult { index: 1, score: 0.9 },
                RerankResult { index: 2, score: 0.5 },
            ],
        };
        let candidates = vec![candidate("a", 0.1), candidate("b", 0.2), candidate("c", 0.3)];

        let out = rerank_candidates(Some(&reranker), "q", candidates, 2, CALL_TIMEOUT).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.id, "b");
        assert_eq!(out[0].rerank_score, Some(0.9));
        assert_eq!(out[1].chunk.id, "c");
    }

    #[tokio::test]
    async fn test_rerank_ties_break_by_chunk_id() {
        let reranker = ScriptedReranker {
            results: vec![
                RerankResult { index: 0, score: 0.5 },
                RerankResult { index: 1, score: 0.5 },
            ],
        };
        let candidates = vec![candidate("z", 0.1), candidate("a", 0.2)];

        let out = rerank_candidates(Some(&reranker), "q", candidates, 2, CALL_TIMEOUT).await;

        assert_eq!(out[0].chunk.id, "a");
        assert_eq!(out[1].chunk.id, "z");
    }

    #[tokio::test]
    async fn test_broken_reranker_falls_back_to_distance_order() {
        let candidates = vec![candidate("b", 0.3), candidate("a", 0.1), candidate("c", 0.2)];

        let out = rerank_candidates(Some(&BrokenReranker), "q", candidates, 2, CALL_TIMEOUT).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.id, "a");
        assert_eq!(out[1].chunk.id, "c");
        assert!(out.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_hung_reranker_times_out_to_fallback_order() {
        let candidates = vec![candidate("b", 0.3), candidate("a", 0.1)];

        let out = rerank_candidates(
            Some(&HungReranker),
            "q",
            candidates,
            2,
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.id, "a");
        assert!(out.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_no_reranker_uses_distance_order() {
        let candidates = vec![candidate("b", 0.3), candidate("a", 0.1)];

        let out = rerank_candidates(None, "q", candidates, 3, CALL_TIMEOUT).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.id, "a");
    }

    #[tokio::test]
    async fn test_equal_distance_fallback_ties_break_by_id() {
        let candidates = vec![candidate("b", 0.5), candidate("a", 0.5)];

        let out = rerank_candidates(None, "q", candidates, 2, CALL_TIMEOUT).await;

        assert_eq!(out[0].chunk.id, "a");
    }
}
