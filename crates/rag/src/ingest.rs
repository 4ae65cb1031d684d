//! Document ingestion: splitting cleaned text into chunks and embedding
//! them with full-document context.
//!
//! Input is cleaned text where pages are separated by form feeds. Chunks
//! are paragraphs; a short heading line sets the section label for the
//! paragraphs that follow it on the same page. Each ingest appends a new
//! document version and supersedes the prior one in active search.

use crate::embeddings::EmbeddingProvider;
use crate::store::ChunkStore;
use crate::types::{Chunk, ChunkSpan, Document};
use dossier_core::{AppError, AppResult};
use std::sync::Arc;
use tracing::{info, instrument};

const PAGE_BREAK: char = '\u{000C}';
const MAX_HEADING_CHARS: usize = 80;

/// Split cleaned document text into chunk spans.
///
/// Pages are delimited by form feeds; paragraphs by blank lines. A heading
/// line (short, no sentence-ending punctuation, or `NAME:` style) is folded
/// into the next paragraph's section label rather than emitted as a chunk.
/// Span offsets index into the original text so late chunking can pool the
/// surrounding context.
pub fn split_into_spans(text: &str) -> Vec<ChunkSpan> {
    let mut spans = Vec::new();
    let mut position = 0u32;
    let mut offset = 0usize;

    for (page_index, page_text) in text.split(PAGE_BREAK).enumerate() {
        let page = page_index as u32 + 1;
        let mut section: Option<String> = None;

        for paragraph in paragraphs_of(page_text) {
            let start = offset + paragraph.start;
            let end = offset + paragraph.end;
            let body = &text[start..end];

            if let Some(heading) = heading_of(body) {
                section = Some(heading);
                continue;
            }

            spans.push(ChunkSpan {
                start,
                end,
                position,
                page,
                section: section.clone(),
            });
            position += 1;
        }

        // +1 for the form feed between pages
        offset += page_text.len() + 1;
    }

    spans
}

struct ParagraphRange {
    start: usize,
    end: usize,
}

fn paragraphs_of(page_text: &str) -> Vec<ParagraphRange> {
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    let mut cursor = 0;

    for line in page_text.split_inclusive('\n') {
        let line_start = cursor;
        cursor += line.len();

        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                ranges.push(ParagraphRange {
                    start: s,
                    end: line_start,
                });
            }
        } else if start.is_none() {
            start = Some(line_start);
        }
    }
    if let Some(s) = start {
        ranges.push(ParagraphRange {
            start: s,
            end: page_text.len(),
        });
    }

    // Trim trailing whitespace out of each range
    for range in ranges.iter_mut() {
        let body = &page_text[range.start..range.end];
        range.end = range.start + body.trim_end().len();
        let trimmed = body.len() - body.trim_start().len();
        range.start += trimmed.min(range.end - range.start);
    }
    ranges.retain(|r| r.start < r.end);
    ranges
}

/// Detect a heading paragraph and return its section label.
fn heading_of(paragraph: &str) -> Option<String> {
    if paragraph.contains('\n') || paragraph.len() > MAX_HEADING_CHARS {
        return None;
    }
    let trimmed = paragraph.trim();
    if trimmed.is_empty() {
        return None;
    }

    let label = trimmed.trim_end_matches(':');
    let ends_like_sentence = trimmed.ends_with('.') || trimmed.ends_with('!') || trimmed.ends_with('?');
    let is_upper = label
        .chars()
        .filter(|c| c.is_alphabetic())
        .all(|c| c.is_uppercase())
        && label.chars().any(|c| c.is_alphabetic());

    if trimmed.ends_with(':') || (is_upper && !ends_like_sentence) {
        Some(title_case(label))
    } else {
        None
    }
}

fn title_case(label: &str) -> String {
    label
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ingestion service: splits, embeds with document context, and appends a
/// new document version to the store.
pub struct Ingestor {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
}

impl Ingestor {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, store: Arc<dyn ChunkStore>) -> Self {
        Self { embeddings, store }
    }

    /// Ingest cleaned text as the next version of `document_id`.
    ///
    /// Returns the stored document. Embedding failure is fatal to the
    /// ingest; nothing is written in that case.
    #[instrument(skip(self, text))]
    pub async fn ingest_document(&self, document_id: &str, text: &str) -> AppResult<Document> {
        let spans = split_into_spans(text);
        if spans.is_empty() {
            return Err(AppError::Store(format!(
                "document '{}' produced no chunks",
                document_id
            )));
        }

        let version = match self.store.active_version(document_id).await? {
            Some(current) => current + 1,
            None => 1,
        };
        let page_count = spans.iter().map(|s| s.page).max().unwrap_or(1);

        let embeddings = self
            .embeddings
            .embed_chunks_with_context(text, &spans)
            .await?;

        let document = Document {
            id: document_id.to_string(),
            text: text.to_string(),
            page_count,
            version,
        };

        let chunks: Vec<Chunk> = spans
            .iter()
            .zip(embeddings)
            .map(|(span, embedding)| Chunk {
                id: format!("{}-v{}-c{}", document_id, version, span.position),
                document_id: document_id.to_string(),
                document_version: version,
                position: span.position,
                page: span.page,
                section: span.section.clone(),
                text: text[span.start..span.end].to_string(),
                embedding: Some(embedding),
            })
            .collect();

        let chunk_count = chunks.len();
        self.store.upsert_document(&document, chunks).await?;
        info!(
            "Ingested '{}' v{}: {} chunks over {} pages",
            document_id, version, chunk_count, page_count
        );
        Ok(document)
    }
}
