//! Fixed-size, overlapping text chunker.
//!
//! Splits extracted document text into windows of `size` characters. Each
//! window starts `size - overlap` characters after the previous one, so
//! consecutive chunks share `overlap` characters of context.
//!
//! # Algorithm
//!
//! 1. Reject `overlap >= size` (the step would be zero or negative).
//! 2. Emit `text[start..start + size]` for `start = 0, step, 2 * step, ...`
//!    while `start < len(text)`. The last window may be shorter.
//! 3. Positions are counted in `char`s, so multi-byte text is never split
//!    inside a code point.
//!
//! Empty text produces no chunks.
//!
//! # Example
//!
//! ```rust
//! use docqa::chunk::chunk_text;
//!
//! let chunks = chunk_text("abcdefghij", 4, 1).unwrap();
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["abcd", "defg", "ghij", "j"]);
//! ```

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Split `text` into overlapping windows of `size` characters.
///
/// Returns chunks with contiguous indices starting at 0.
///
/// # Errors
///
/// [`RagError::Configuration`] when `size == 0` or `overlap >= size`.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if size == 0 || overlap >= size {
        return Err(RagError::Configuration(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, size
        )));
    }
    let step = size - overlap;

    // Byte offset of every char boundary, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let len = bounds.len();
    bounds.push(text.len());

    let mut chunks = Vec::with_capacity(len.div_ceil(step));
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        chunks.push(Chunk {
            chunk_index: chunks.len(),
            text: text[bounds[start]..bounds[end]].to_string(),
        });
        start += step;
    }

    Ok(chunks)
}

/// [`chunk_text`] with the configured size and overlap.
pub fn chunk_with(config: &ChunkingConfig, text: &str) -> Result<Vec<Chunk>> {
    chunk_text(text, config.size, config.overlap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    /// Undo the overlap: keep the first chunk whole, drop the shared prefix of the rest.
    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_example_windows() {
        let chunks = chunk_text("abcdefghij", 4, 1).unwrap();
        assert_eq!(texts(&chunks), ["abcd", "defg", "ghij", "j"]);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("", 500, 50).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 500, 50).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_overlap_not_smaller_than_size_fails_fast() {
        assert!(matches!(
            chunk_text("abc", 4, 4),
            Err(RagError::Configuration(_))
        ));
        assert!(matches!(
            chunk_text("abc", 4, 9),
            Err(RagError::Configuration(_))
        ));
        assert!(matches!(
            chunk_text("abc", 0, 0),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_overlap_partitions_text() {
        let chunks = chunk_text("abcdefgh", 3, 0).unwrap();
        assert_eq!(texts(&chunks), ["abc", "def", "gh"]);
    }

    #[test]
    fn test_reconstruction_and_count() {
        let samples = [
            "a",
            "abcdefghij",
            "The quick brown fox jumps over the lazy dog.",
            "ünïcödé — text with multi-byte characters: 日本語のテキスト",
        ];
        let params = [(1, 0), (2, 1), (4, 1), (5, 2), (7, 3), (10, 0), (500, 50)];

        for text in samples {
            let len = text.chars().count();
            for (size, overlap) in params {
                let chunks = chunk_text(text, size, overlap).unwrap();
                assert_eq!(
                    reconstruct(&chunks, overlap),
                    text,
                    "size={} overlap={}",
                    size,
                    overlap
                );
                assert_eq!(chunks.len(), len.div_ceil(size - overlap));
                for (i, c) in chunks.iter().enumerate() {
                    assert_eq!(c.chunk_index, i);
                    assert!(!c.text.is_empty());
                    assert!(c.text.chars().count() <= size);
                }
            }
        }
    }

    #[test]
    fn test_multibyte_boundaries() {
        let chunks = chunk_text("日本語テキスト", 3, 1).unwrap();
        assert_eq!(texts(&chunks), ["日本語", "語テキ", "キスト", "ト"]);
    }

    #[test]
    fn test_chunk_with_config() {
        let cfg = ChunkingConfig {
            size: 4,
            overlap: 1,
        };
        assert_eq!(chunk_with(&cfg, "abcdefghij").unwrap().len(), 4);
    }
}
