//! Citation grammar: parsing, validation, and resolution.
//!
//! Drafts cite sources inline as `[id, Page N]` or
//! `[id, Page N, Section: title]`. Every bracketed token in a draft must
//! parse under this grammar and resolve against the retrieved candidate
//! set; any miss is a violation that routes the draft back for revision
//! without spending a critique call.

use crate::types::{Citation, RetrievalCandidate};

/// A citation problem found while validating a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum CitationViolation {
    /// A bracketed token that does not parse under the citation grammar.
    Malformed { token: String },
    /// A well-formed citation whose id matches no retrieved chunk or document.
    UnknownSource { token: String, id: String },
    /// A well-formed citation whose page does not match the cited source.
    PageMismatch {
        token: String,
        id: String,
        cited_page: u32,
    },
}

impl std::fmt::Display for CitationViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CitationViolation::Malformed { token } => {
                write!(f, "malformed citation {}", token)
            }
            CitationViolation::UnknownSource { token, id } => {
                write!(f, "citation {} references unknown source '{}'", token, id)
            }
            CitationViolation::PageMismatch {
                token,
                id,
                cited_page,
            } => {
                write!(
                    f,
                    "citation {} cites page {} which does not exist in '{}'",
                    token, cited_page, id
                )
            }
        }
    }
}

/// A parsed but not yet resolved citation token.
#[derive(Debug, Clone, PartialEq)]
struct RawCitation {
    id: String,
    page: u32,
    section: Option<String>,
}

/// Extract every bracketed token from the text, in order of appearance.
/// Nested brackets do not occur in the grammar; an unclosed `[` is
/// returned as-is so it surfaces as a malformed token.
fn bracketed_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        match after.find(']') {
            Some(close) => {
                tokens.push(format!("[{}]", &after[..close]));
                rest = &after[close + 1..];
            }
            None => {
                tokens.push(rest[open..].to_string());
                break;
            }
        }
    }
    tokens
}

/// Parse one bracketed token under the citation grammar.
///
/// Shape: `[<id>, Page <N>]` or `[<id>, Page <N>, Section: <title>]`.
/// The id may not contain commas; `Page` and `Section:` keywords are
/// case-sensitive; N must be a positive integer.
fn parse_token(token: &str) -> Option<RawCitation> {
    let inner = token.strip_prefix('[')?.strip_suffix(']')?;
    let mut parts = inner.splitn(3, ',');

    let id = parts.next()?.trim();
    if id.is_empty() {
        return None;
    }

    let page_part = parts.next()?.trim();
    let page_str = page_part.strip_prefix("Page ")?;
    let page: u32 = page_str.parse().ok()?;
    if page == 0 {
        return None;
    }

    let section = match parts.next() {
        Some(section_part) => {
            let title = section_part.trim().strip_prefix("Section:")?.trim();
            if title.is_empty() {
                return None;
            }
            Some(title.to_string())
        }
        None => None,
    };

    Some(RawCitation {
        id: id.to_string(),
        page,
        section,
    })
}

/// Validate every bracketed token in `draft` and resolve the citations
/// against the candidate set.
///
/// On success, returns the resolved citations in order of first
/// appearance, deduplicated by chunk id, each canonicalized to the cited
/// chunk's stored page and section. On failure, returns every violation
/// found so a revision pass can fix them all at once.
///
/// An id resolves either directly to a candidate chunk id, or to a
/// document id, in which case it binds to the highest-ranked candidate
/// from that document whose page matches.
pub fn resolve_citations(
    draft: &str,
    candidates: &[RetrievalCandidate],
) -> Result<Vec<Citation>, Vec<CitationViolation>> {
    let mut citations: Vec<Citation> = Vec::new();
    let mut violations = Vec::new();

    for token in bracketed_tokens(draft) {
        let raw = match parse_token(&token) {
            Some(raw) => raw,
            None => {
                violations.push(CitationViolation::Malformed { token });
                continue;
            }
        };

        match resolve_one(&raw, candidates) {
            Resolution::Chunk(citation) => {
                if !citations.iter().any(|c| c.chunk_id == citation.chunk_id) {
                    citations.push(citation);
                }
            }
            Resolution::UnknownSource => {
                violations.push(CitationViolation::UnknownSource {
                    token,
                    id: raw.id,
                });
            }
            Resolution::PageMismatch => {
                violations.push(CitationViolation::PageMismatch {
                    token,
                    id: raw.id,
                    cited_page: raw.page,
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(citations)
    } else {
        Err(violations)
    }
}

enum Resolution {
    Chunk(Citation),
    UnknownSource,
    PageMismatch,
}

fn resolve_one(raw: &RawCitation, candidates: &[RetrievalCandidate]) -> Resolution {
    // Direct chunk-id match takes precedence.
    if let Some(candidate) = candidates.iter().find(|c| c.chunk.id == raw.id) {
        return if candidate.chunk.page == raw.page {
            Resolution::Chunk(Citation {
                chunk_id: candidate.chunk.id.clone(),
                page: candidate.chunk.page,
                section: candidate.chunk.section.clone(),
            })
        } else {
            Resolution::PageMismatch
        };
    }

    // Document-id citation: bind to the highest-ranked candidate from that
    // document whose page matches the citation.
    let mut saw_document = false;
    for candidate in candidates {
        if candidate.chunk.document_id == raw.id {
            saw_document = true;
            if candidate.chunk.page == raw.page {
                return Resolution::Chunk(Citation {
                    chunk_id: candidate.chunk.id.clone(),
                    page: candidate.chunk.page,
                    section: candidate.chunk.section.clone(),
                });
            }
        }
    }

    if saw_document {
        Resolution::PageMismatch
    } else {
        Resolution::UnknownSource
    }
}

/// Strip citations that do not resolve, keeping those that do. Used on the
/// forced-accept path where a draft is published despite violations.
pub fn salvage_citations(draft: &str, candidates: &[RetrievalCandidate]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for token in bracketed_tokens(draft) {
        if let Some(raw) = parse_token(&token) {
            if let Resolution::Chunk(citation) = resolve_one(&raw, candidates) {
                if !citations.iter().any(|c| c.chunk_id == citation.chunk_id) {
                    citations.push(citation);
                }
            }
        }
    }
    citations
}
