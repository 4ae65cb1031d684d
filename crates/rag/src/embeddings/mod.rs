//! Embedding generation with a late-chunking strategy.
//!
//! Chunk embeddings are derived with full-document context: the provider
//! encodes a window of the document around each chunk span and blends it
//! with a whole-document encoding, so cross-chunk references and definitions
//! survive in the per-chunk vectors. Query embeddings are plain single-text
//! encodings.

pub mod provider;
pub mod providers;

pub use provider::EmbeddingProvider;
pub use providers::{MockProvider, OllamaProvider};

/// Normalize a vector to unit length in place. Zero vectors are left as-is.
pub(crate) fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
