//! Context assembly for the answer prompt.
//!
//! Concatenates retrieved chunk text in ranked order, one chunk per line,
//! and caps the result at a fixed number of characters so a large `top_k`
//! or oversized chunks cannot blow up the prompt.

use crate::models::QueryMatch;

/// Join the chunk text of `matches` in the order given, each followed by
/// `"\n"`, truncated to at most `max_chars` characters.
///
/// Truncation is silent and always lands on a character boundary.
pub fn assemble(matches: &[QueryMatch], max_chars: usize) -> String {
    let mut context = String::new();
    let mut remaining = max_chars;

    for m in matches {
        if remaining == 0 {
            break;
        }
        for piece in [m.metadata.chunk.as_str(), "\n"] {
            let taken = take_chars(piece, remaining);
            context.push_str(taken);
            remaining -= taken.chars().count();
            if remaining == 0 {
                break;
            }
        }
    }

    context
}

/// Longest prefix of `s` with at most `n` characters.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn hit(chunk: &str, score: f32) -> QueryMatch {
        QueryMatch {
            id: format!("id-{}", chunk),
            score,
            metadata: ChunkMetadata::new(1, 1, "doc.pdf", chunk).unwrap(),
        }
    }

    #[test]
    fn test_chunks_joined_in_received_order() {
        let ctx = assemble(&[hit("second", 0.2), hit("first", 0.9)], 1000);
        assert_eq!(ctx, "second\nfirst\n");
    }

    #[test]
    fn test_no_matches_is_empty_context() {
        assert_eq!(assemble(&[], 1000), "");
    }

    #[test]
    fn test_truncates_to_cap() {
        let ctx = assemble(&[hit("abcdef", 0.9), hit("ghij", 0.5)], 9);
        assert_eq!(ctx, "abcdef\ngh");
        assert_eq!(ctx.chars().count(), 9);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let ctx = assemble(&[hit("日本語テキスト", 0.9)], 3);
        assert_eq!(ctx, "日本語");
    }

    #[test]
    fn test_cap_exactly_at_chunk_end_drops_newline() {
        let ctx = assemble(&[hit("abc", 0.9), hit("def", 0.8)], 3);
        assert_eq!(ctx, "abc");
    }
}
