//! Embedding provider trait.

use crate::embeddings::normalize;
use crate::types::ChunkSpan;
use dossier_core::{AppError, AppResult};

/// Characters of surrounding document text included on each side of a chunk
/// span when encoding it with context.
const CONTEXT_WINDOW_CHARS: usize = 1000;

/// Blend weight of the span's context-window encoding; the remainder comes
/// from the whole-document encoding.
const SPAN_WEIGHT: f32 = 0.7;

/// Trait for embedding providers.
///
/// Providers expose plain text encoding plus a late-chunking operation that
/// embeds chunk spans with full-document context. The default late-chunking
/// implementation encodes a window around each span and blends it with a
/// whole-document encoding (0.7 window, 0.3 document), which approximates
/// span pooling for providers that only return pooled text embeddings.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "ollama")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Generate embeddings for multiple texts in a batch.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| AppError::Retrieval("No embedding returned".to_string()))
    }

    /// Embed chunk spans with full-document context (late chunking).
    ///
    /// Returns one vector per span, in span order. Each vector is derived
    /// from the document encoding restricted to the span's neighborhood,
    /// never from the span text in isolation.
    async fn embed_chunks_with_context(
        &self,
        document_text: &str,
        spans: &[ChunkSpan],
    ) -> AppResult<Vec<Vec<f32>>> {
        if spans.is_empty() {
            return Ok(vec![]);
        }

        let document_embedding = self.embed(document_text).await?;

        let windows: Vec<String> = spans
            .iter()
            .map(|span| context_window(document_text, span))
            .collect();
        let window_embeddings = self.embed_batch(&windows).await?;

        if window_embeddings.len() != spans.len() {
            return Err(AppError::Retrieval(format!(
                "Provider returned {} embeddings for {} spans",
                window_embeddings.len(),
                spans.len()
            )));
        }

        let mut result = Vec::with_capacity(spans.len());
        for window_embedding in window_embeddings {
            let mut blended: Vec<f32> = window_embedding
                .iter()
                .zip(document_embedding.iter())
                .map(|(w, d)| SPAN_WEIGHT * w + (1.0 - SPAN_WEIGHT) * d)
                .collect();
            normalize(&mut blended);
            result.push(blended);
        }

        Ok(result)
    }
}

/// Extract the context window around a span, clamped to char boundaries.
fn context_window(document_text: &str, span: &ChunkSpan) -> String {
    let start = floor_char_boundary(
        document_text,
        span.start.saturating_sub(CONTEXT_WINDOW_CHARS),
    );
    let end = ceil_char_boundary(
        document_text,
        (span.end + CONTEXT_WINDOW_CHARS).min(document_text.len()),
    );
    document_text[start..end].to_string()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockProvider;

    fn span(start: usize, end: usize) -> ChunkSpan {
        ChunkSpan {
            start,
            end,
            position: 0,
            page: 1,
            section: None,
        }
    }

    #[test]
    fn test_context_window_clamps_to_document() {
        let text = "short document";
        let window = context_window(text, &span(0, 5));
        assert_eq!(window, text);
    }

    #[test]
    fn test_char_boundary_clamping() {
        // Multi-byte char at the boundary must not split
        let text = "aé".repeat(600);
        let window = context_window(&text, &span(1201, 1205));
        assert!(!window.is_empty());
    }

    #[tokio::test]
    async fn test_late_chunking_differs_from_isolated_embedding() {
        let provider = MockProvider::new(64);
        let doc = format!(
            "{}\n\n{}",
            "The applicant filed an appeal against the decision.",
            "It was rejected on procedural grounds."
        );
        let second_start = doc.find("It was").unwrap();
        let spans = vec![span(second_start, doc.len())];

        let contextual = provider
            .embed_chunks_with_context(&doc, &spans)
            .await
            .unwrap();
        let isolated = provider.embed("It was rejected on procedural grounds.").await.unwrap();

        assert_eq!(contextual.len(), 1);
        assert_eq!(contextual[0].len(), 64);
        // Document context must leave a trace in the chunk vector
        assert_ne!(contextual[0], isolated);
    }

    #[tokio::test]
    async fn test_empty_spans_short_circuit() {
        let provider = MockProvider::new(16);
        let result = provider.embed_chunks_with_context("doc", &[]).await.unwrap();
        assert!(result.is_empty());
    }
}
