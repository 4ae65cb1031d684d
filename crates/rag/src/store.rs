//! Chunk store abstraction and in-memory backend.
//!
//! The store is read-mostly from the engine's perspective: ingestion appends
//! a new document version and deactivates the prior version's chunks, so
//! concurrent readers never observe a torn write.

use crate::types::{Chunk, Document, ScopeFilter};
use dossier_core::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Store statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    /// Distinct documents (any version)
    pub documents: u32,

    /// Chunks in the active search set
    pub active_chunks: u32,

    /// All chunks, including superseded versions kept for audit
    pub total_chunks: u32,
}

/// Trait for chunk store backends.
///
/// Distance contract: `search` returns cosine distance, where lower
/// distance means higher relevance. The rerank fallback relies on this
/// ordering; a backend with a different metric must adapt at this boundary.
#[async_trait::async_trait]
pub trait ChunkStore: Send + Sync {
    /// Search active chunks nearest to the query embedding.
    ///
    /// Results are ordered by ascending distance, ties broken by ascending
    /// chunk id. An empty scope yields an empty list, not an error.
    /// `k` must be at least 1.
    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        scope: &ScopeFilter,
    ) -> AppResult<Vec<(Chunk, f32)>>;

    /// Append a document version with its chunks, superseding any prior
    /// version. Old chunks are retained but excluded from active search.
    async fn upsert_document(&self, document: &Document, chunks: Vec<Chunk>) -> AppResult<()>;

    /// Currently active version of a document, if any.
    async fn active_version(&self, document_id: &str) -> AppResult<Option<u32>>;

    /// Get statistics about the store.
    async fn stats(&self) -> AppResult<StoreStats>;
}

/// Cosine distance between two vectors (1 - cosine similarity).
///
/// Mismatched or zero-norm vectors yield the maximum distance of 1.0 so they
/// sort last instead of failing the search.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot_product / (norm_a * norm_b)
}

/// Rank scored chunks: ascending distance, ties by ascending chunk id.
pub(crate) fn rank_scored(mut scored: Vec<(Chunk, f32)>, k: usize) -> Vec<(Chunk, f32)> {
    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    scored.truncate(k);
    scored
}

/// In-memory chunk store, used by tests and small demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    chunks: Vec<Chunk>,
    active_versions: HashMap<String, u32>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChunkStore for MemoryStore {
    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        scope: &ScopeFilter,
    ) -> AppResult<Vec<(Chunk, f32)>> {
        if k == 0 {
            return Err(AppError::Store("search requires k >= 1".to_string()));
        }

        let inner = self
            .inner
            .read()
            .map_err(|_| AppError::Store("store lock poisoned".to_string()))?;

        let scored: Vec<(Chunk, f32)> = inner
            .chunks
            .iter()
            .filter(|chunk| {
                inner.active_versions.get(&chunk.document_id) == Some(&chunk.document_version)
            })
            .filter(|chunk| scope.matches(chunk))
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                Some((chunk.clone(), cosine_distance(query_embedding, embedding)))
            })
            .collect();

        Ok(rank_scored(scored, k))
    }

    async fn upsert_document(&self, document: &Document, chunks: Vec<Chunk>) -> AppResult<()> {
        for chunk in &chunks {
            if chunk.document_id != document.id || chunk.document_version != document.version {
                return Err(AppError::Store(format!(
                    "Chunk {} does not belong to document {} v{}",
                    chunk.id, document.id, document.version
                )));
            }
            if chunk.embedding.is_none() {
                return Err(AppError::Store(format!("Chunk {} missing embedding", chunk.id)));
            }
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| AppError::Store("store lock poisoned".to_string()))?;

        inner.chunks.extend(chunks);
        inner
            .active_versions
            .insert(document.id.clone(), document.version);

        Ok(())
    }

    async fn active_version(&self, document_id: &str) -> AppResult<Option<u32>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| AppError::Store("store lock poisoned".to_string()))?;
        Ok(inner.active_versions.get(document_id).copied())
    }

    async fn stats(&self) -> AppResult<StoreStats> {
        let inner = self
            .inner
            .read()
            .map_err(|_| AppError::Store("store lock poisoned".to_string()))?;

        let active_chunks = inner
            .chunks
            .iter()
            .filter(|chunk| {
                inner.active_versions.get(&chunk.document_id) == Some(&chunk.document_version)
            })
            .count() as u32;

        Ok(StoreStats {
            documents: inner.active_versions.len() as u32,
            active_chunks,
            total_chunks: inner.chunks.len() as u32,
        })
    }
}
