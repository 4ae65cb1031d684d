//! Data model for the answering engine.
//!
//! Chunks, citations, and answer records are strongly-typed with explicit
//! optional fields rather than open-ended metadata maps, so the engine's
//! invariants can be checked by plain code instead of ad hoc inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ingested source document.
///
/// A new version supersedes prior chunks but never mutates them; chunks of
/// older versions are retained for audit and excluded from active search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable document identifier (e.g., case file reference)
    pub id: String,

    /// Cleaned full text
    pub text: String,

    /// Page count of the original document
    pub page_count: u32,

    /// Monotonically increasing version, starting at 1
    pub version: u32,
}

/// A span of a document's text, the pre-embedding shape of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    /// Byte offset of the span start within the document text
    pub start: usize,

    /// Byte offset one past the span end
    pub end: usize,

    /// Position index within the document
    pub position: u32,

    /// Page the span falls on
    pub page: u32,

    /// Section or clause label, when one was detected
    pub section: Option<String>,
}

/// A bounded span of a document's text, the unit of retrieval and citation.
///
/// Immutable once created; re-embedded only via a new document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier
    pub id: String,

    /// Owning document
    pub document_id: String,

    /// Document version this chunk belongs to
    pub document_version: u32,

    /// Position index within the document
    pub position: u32,

    /// Page number within the original document
    pub page: u32,

    /// Optional section title or clause label
    pub section: Option<String>,

    /// Chunk text content
    pub text: String,

    /// Embedding vector (normalized)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Metadata constraint limiting retrieval to a subset of chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeFilter {
    /// Restrict to these documents; `None` means unscoped
    pub document_ids: Option<Vec<String>>,
}

impl ScopeFilter {
    /// Unscoped filter matching every active chunk.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict retrieval to the given documents.
    pub fn documents(ids: Vec<String>) -> Self {
        Self {
            document_ids: Some(ids),
        }
    }

    /// Whether a chunk satisfies this filter.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match &self.document_ids {
            None => true,
            Some(ids) => ids.iter().any(|id| id == &chunk.document_id),
        }
    }
}

/// A scored chunk produced by one retrieval iteration.
///
/// Exists only within that iteration; the revise transition discards the
/// whole candidate set.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    /// The retrieved chunk
    pub chunk: Chunk,

    /// Cosine distance from the query embedding (lower is closer)
    pub distance: f32,

    /// Relevance score assigned by the reranker, when it ran
    pub rerank_score: Option<f32>,
}

/// A structured reference tying a claim in an answer to a specific chunk.
///
/// Always references a chunk from the same iteration's candidate set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Cited chunk identifier
    pub chunk_id: String,

    /// Page number within the source document
    pub page: u32,

    /// Optional section title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// The public result of an answered query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Final answer text
    pub answer: String,

    /// Citations backing the answer, in order of appearance
    pub citations: Vec<Citation>,

    /// Candidate count of the final iteration (0 when nothing matched)
    pub retrieved_count: u32,

    /// Revise iterations consumed (0..=3)
    pub revision_count: u32,

    /// True when the revision budget forced acceptance of an
    /// incompletely-validated draft
    pub degraded_confidence: bool,
}

/// Persisted record of a completed run, kept for audit and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Unique record identifier
    pub id: String,

    /// Original query text, before any refinement
    pub query: String,

    /// Final answer text
    pub answer: String,

    /// Citations backing the answer
    pub citations: Vec<Citation>,

    /// Revise iterations consumed
    pub revision_count: u32,

    /// Union of chunk ids retrieved across all iterations of the run
    pub retrieved_chunk_ids: Vec<String>,

    /// When the run completed
    pub created_at: DateTime<Utc>,
}
