//! Retrieval-augmented answering engine for case documents.
//!
//! Given a natural-language question scoped to previously-ingested document
//! chunks, the engine retrieves relevant passages, drafts a grounded answer
//! with inline citations, and validates the draft through a bounded
//! critique-and-revise loop before returning it. Every citation in a
//! returned answer resolves to a chunk retrieved in the same iteration.
//!
//! The pipeline is a finite-state machine
//! (`RETRIEVE → RERANK → DRAFT → CRITIQUE → ACCEPT | REVISE`); all external
//! services (embedding, chunk store, reranker, drafting, critique) are
//! injected as trait objects so each can be replaced with a deterministic
//! test double.

pub mod archive;
pub mod citation;
pub mod critic;
pub mod drafter;
pub mod embeddings;
pub mod engine;
pub mod index;
pub mod ingest;
pub mod rerank;
pub mod retrieval;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use archive::{AnswerArchive, SqliteArchive};
pub use critic::{CritiqueValidator, Decision, LlmCritic, Verdict};
pub use drafter::{AnswerGenerator, LlmDrafter};
pub use embeddings::{EmbeddingProvider, MockProvider, OllamaProvider};
pub use engine::{AnswerEngine, AnswerOptions, MAX_REVISIONS};
pub use index::SqliteStore;
pub use ingest::Ingestor;
pub use rerank::{HttpReranker, Reranker};
pub use retrieval::Retriever;
pub use store::{ChunkStore, MemoryStore, StoreStats};
pub use types::{
    Answer, AnswerRecord, Chunk, ChunkSpan, Citation, Document, RetrievalCandidate, ScopeFilter,
};
