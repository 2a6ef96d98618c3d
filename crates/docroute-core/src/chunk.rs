//! Sentence-boundary text chunker.
//!
//! Splits document text into [`Chunk`]s no larger than `max_tokens`,
//! breaking only between sentences when a sentence boundary exists within
//! the limit.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Segment text into sentences (Unicode sentence boundaries, UAX #29;
//!    paragraph breaks always end a sentence).
//! 3. Accumulate sentences into a buffer until adding the next one would
//!    exceed `max_chars`, then flush the buffer as a chunk.
//! 4. With `overlap_tokens > 0`, the trailing whole sentences of the flushed
//!    chunk (up to the overlap budget) seed the next buffer.
//! 5. A single sentence longer than `max_chars` is hard-split at the last
//!    whitespace before the limit, or at the limit itself.
//!
//! # Example
//!
//! ```rust
//! use docroute_core::chunk::chunk_document;
//!
//! let chunks = chunk_document("doc-1", "Hello world. Second sentence.", 1024, 0);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into sentence-aligned chunks.
///
/// Returns an empty vector for whitespace-only text. Chunk indices are
/// contiguous from 0 and `position` equals `chunk_index`; the catalog
/// renumbers positions across a multi-document collection.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    let mut pieces: Vec<String> = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut buf_len = 0usize;

    for sentence in text.split_sentence_bounds() {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if sentence.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(buf.join(" "));
                buf.clear();
                buf_len = 0;
            }
            pieces.extend(hard_split(sentence, max_chars));
            continue;
        }

        let would_be = if buf.is_empty() {
            sentence.len()
        } else {
            buf_len + 1 + sentence.len()
        };

        if would_be > max_chars {
            pieces.push(buf.join(" "));
            let carried = overlap_tail(&buf, overlap_chars, max_chars - sentence.len());
            buf.drain(..buf.len() - carried);
            buf_len = joined_len(&buf);
        }

        buf_len = if buf.is_empty() {
            sentence.len()
        } else {
            buf_len + 1 + sentence.len()
        };
        buf.push(sentence);
    }

    if !buf.is_empty() {
        pieces.push(buf.join(" "));
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(document_id, i, text))
        .collect()
}

/// Number of trailing sentences to carry over into the next chunk.
///
/// Carried text stays within `overlap_chars`, and leaves room (`room`
/// chars, separator included) for the sentence that triggered the flush.
fn overlap_tail(buf: &[&str], overlap_chars: usize, room: usize) -> usize {
    if overlap_chars == 0 {
        return 0;
    }
    let mut carried = 0;
    let mut len = 0;
    for sentence in buf.iter().rev() {
        let next = len + sentence.len() + 1;
        if next > overlap_chars || next >= room {
            break;
        }
        len = next;
        carried += 1;
    }
    // Never carry the whole buffer, or the next chunk would repeat it.
    carried.min(buf.len().saturating_sub(1))
}

fn joined_len(parts: &[&str]) -> usize {
    if parts.is_empty() {
        return 0;
    }
    parts.iter().map(|p| p.len()).sum::<usize>() + parts.len() - 1
}

/// Split an oversized sentence at whitespace, falling back to the raw limit.
fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = sentence;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining.to_string());
            break;
        }
        let limit = snap_to_char_boundary(remaining, max_chars);
        let limit = if limit == 0 { first_char_len(remaining) } else { limit };
        let split_at = remaining[..limit]
            .rfind(char::is_whitespace)
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }
    out
}

fn first_char_len(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(document_id: &str, index: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        position: index,
        text,
        hash,
        embedding: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document("doc1", "Hello, world!", 1024, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_whitespace_only_yields_nothing() {
        assert!(chunk_document("doc1", "", 1024, 0).is_empty());
        assert!(chunk_document("doc1", "  \n\n\t ", 1024, 0).is_empty());
    }

    #[test]
    fn test_splits_between_sentences() {
        // 3 tokens = 12 chars: each sentence fits alone, no two fit together.
        let text = "Alpha one. Beta two. Gamma 3.";
        let chunks = chunk_document("doc1", text, 3, 0);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Alpha one.", "Beta two.", "Gamma 3."]);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.position, i);
        }
    }

    #[test]
    fn test_never_splits_mid_sentence_when_boundary_fits() {
        let text = "Short one. This second sentence is quite a bit longer.";
        let chunks = chunk_document("doc1", text, 12, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Short one.");
        assert_eq!(chunks[1].text, "This second sentence is quite a bit longer.");
    }

    #[test]
    fn test_oversized_sentence_is_hard_split_within_limit() {
        let text = "word ".repeat(40);
        let chunks = chunk_document("doc1", &text, 5, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 20, "chunk too long: {:?}", c.text);
            assert!(!c.text.starts_with(' ') && !c.text.ends_with(' '));
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐ │ Hello world │ └──────────────────┘";
        let chunks = chunk_document("doc1", text, 3, 0);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_overlap_carries_trailing_sentence() {
        let text = "One a. Two b. Three c. Four d.";
        let chunks = chunk_document("doc1", text, 4, 2);
        assert!(chunks.len() >= 2);
        assert!(chunks[1].text.starts_with("Two b."));
    }

    #[test]
    fn test_paragraph_break_is_a_boundary() {
        let text = "Heading without period\n\nBody sentence here.";
        let chunks = chunk_document("doc1", text, 6, 0);
        assert_eq!(chunks[0].text, "Heading without period");
    }

    #[test]
    fn test_deterministic_text_and_hash() {
        let text = "Alpha. Beta. Gamma. Delta.";
        let c1 = chunk_document("doc1", text, 2, 0);
        let c2 = chunk_document("doc1", text, 2, 0);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
        }
    }
}
