//! Paragraph-boundary text chunker.
//!
//! Splits document text into retrievable chunks that respect a
//! configurable `max_tokens` limit. Splitting occurs on paragraph
//! boundaries (`\n\n`) to preserve semantic coherence; an oversized
//! single paragraph is hard-split at line or word boundaries.

use crate::error::Result;
use crate::reader::Document;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

pub trait Chunker: Send + Sync {
    fn chunk(&self, document: &Document) -> Result<Vec<String>>;
}

pub struct ParagraphChunker {
    max_tokens: usize,
}

impl ParagraphChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<String>> {
        Ok(chunk_text(&document.content, self.max_tokens))
    }
}

/// Split text into chunks on paragraph boundaries, respecting
/// `max_tokens`. Whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    if text.trim().is_empty() {
        return Vec::new();
    }

    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut chunks = Vec::new();
    let mut current_buf = String::new();

    for para in paragraphs {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len() // +2 for \n\n separator
        };

        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(std::mem::take(&mut current_buf));
        }

        // A single paragraph over the limit is hard-split
        if trimmed.len() > max_chars {
            if !current_buf.is_empty() {
                chunks.push(std::mem::take(&mut current_buf));
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                chunks.push(remaining[..actual_split].trim().to_string());
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(current_buf);
    }

    chunks.retain(|c| !c.is_empty());
    chunks
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 700);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_text("", 700).is_empty());
        assert!(chunk_text("  \n\n  ", 700).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 700);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text(text, 5);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let text = "word ".repeat(100);
        let chunks = chunk_text(&text, 5);
        assert!(chunks.len() > 1);
        // max_chars = 20, plus a trimmed boundary word
        assert!(chunks.iter().all(|c| c.len() <= 20));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        assert_eq!(chunk_text(text, 5), chunk_text(text, 5));
    }

    #[test]
    fn test_chunker_trait_wiring() {
        let doc = crate::reader::Document::new("one\n\ntwo".to_string());
        let chunks = ParagraphChunker::new(700).chunk(&doc).unwrap();
        assert_eq!(chunks.len(), 1);
    }
}
