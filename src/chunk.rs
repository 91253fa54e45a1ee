//! Overlapping text chunker.
//!
//! Splits page text into [`Chunk`]s of at most `chunk_size` characters,
//! preferring to break on paragraph boundaries, then lines, then words, and
//! only hard-splitting inside a word when nothing else fits. Consecutive
//! chunks share up to `chunk_overlap` characters of trailing context so a
//! clause that straddles a boundary is still retrievable as a whole.
//!
//! Lengths are measured in `char`s, never bytes, so multi-byte text is never
//! split inside a code point.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::models::{Chunk, Page};

/// Separators tried in order, coarsest first.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// Chunk every page of a document. Indices are contiguous across pages,
/// starting at 0. Pages with no visible text produce no chunks.
pub fn chunk_pages(source: &str, pages: &[Page], chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;
    for page in pages {
        for piece in split_text(&page.text, chunk_size, overlap) {
            chunks.push(make_chunk(source, page.number, index, &piece));
            index += 1;
        }
    }
    chunks
}

/// Split text into trimmed, non-empty pieces of at most `chunk_size` chars.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(trimmed) <= chunk_size {
        return vec![trimmed.to_string()];
    }

    let mut atoms = Vec::new();
    split_atoms(trimmed, chunk_size, SEPARATORS, &mut atoms);
    merge_atoms(&atoms, chunk_size, overlap)
}

/// Break `text` into pieces no longer than `chunk_size`, keeping separators
/// attached to the end of each piece.
fn split_atoms<'a>(text: &'a str, chunk_size: usize, seps: &[&str], out: &mut Vec<&'a str>) {
    if char_len(text) <= chunk_size {
        out.push(text);
        return;
    }

    let Some((sep, rest)) = seps
        .iter()
        .position(|s| text.contains(s))
        .map(|i| (seps[i], &seps[i + 1..]))
    else {
        hard_split(text, chunk_size, out);
        return;
    };

    for piece in text.split_inclusive(sep) {
        if char_len(piece) <= chunk_size {
            out.push(piece);
        } else {
            split_atoms(piece, chunk_size, rest, out);
        }
    }
}

fn hard_split<'a>(text: &'a str, chunk_size: usize, out: &mut Vec<&'a str>) {
    let mut start = 0;
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == chunk_size {
            out.push(&text[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
}

/// Greedily pack atoms into windows, carrying at most `overlap` chars of
/// trailing atoms into the next window.
fn merge_atoms(atoms: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut window_len = 0usize;

    for &atom in atoms {
        let len = char_len(atom);
        if window_len + len > chunk_size && !window.is_empty() {
            push_piece(&window, &mut pieces);
            // Drop leading atoms until the carried tail fits the overlap
            // budget and leaves room for the incoming atom.
            while !window.is_empty() && (window_len > overlap || window_len + len > chunk_size) {
                if let Some(front) = window.pop_front() {
                    window_len -= char_len(front);
                }
            }
        }
        window.push_back(atom);
        window_len += len;
    }

    if !window.is_empty() {
        push_piece(&window, &mut pieces);
    }

    pieces
}

fn push_piece(window: &VecDeque<&str>, pieces: &mut Vec<String>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        pieces.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source: &str, page: Option<i64>, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        chunk_index: index,
        source: source.to_string(),
        page,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: i64, text: &str) -> Page {
        Page {
            number: Some(n),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 1000, 100);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_text("", 1000, 100).is_empty());
        assert!(split_text("  \n\n \t", 1000, 100).is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..200)
            .map(|i| format!("Clause {} applies to all members.", i))
            .collect::<Vec<_>>()
            .join("\n");
        for piece in split_text(&text, 120, 20) {
            assert!(piece.chars().count() <= 120, "piece too long: {}", piece);
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = (0..40)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pieces = split_text(&text, 30, 10);
        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(
                pair[1].starts_with(last_word) || pair[1].contains(last_word),
                "expected '{}' carried into '{}'",
                last_word,
                pair[1]
            );
        }
    }

    #[test]
    fn test_zero_overlap_has_no_repeats() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let pieces = split_text(text, 12, 0);
        let rejoined = pieces.join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_long_word_hard_split() {
        let text = "x".repeat(25);
        let pieces = split_text(&text, 10, 0);
        assert_eq!(pieces, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn test_multibyte_safe() {
        let text = "é".repeat(30);
        let pieces = split_text(&text, 7, 2);
        assert!(pieces.iter().all(|p| p.chars().count() <= 7));
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = "Section 1: General Coverage.\n\nSection 2: Special Procedures.";
        let pieces = split_text(text, 35, 0);
        assert_eq!(
            pieces,
            vec![
                "Section 1: General Coverage.".to_string(),
                "Section 2: Special Procedures.".to_string()
            ]
        );
    }

    #[test]
    fn test_chunk_indices_contiguous_across_pages() {
        let pages = vec![
            page(1, &"Page one words. ".repeat(20)),
            page(2, ""),
            page(3, &"Page three words. ".repeat(20)),
        ];
        let chunks = chunk_pages("policy.pdf", &pages, 60, 10);
        assert!(chunks.len() > 2);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.source, "policy.pdf");
            assert_ne!(c.page, Some(2));
        }
        assert_eq!(chunks.first().unwrap().page, Some(1));
        assert_eq!(chunks.last().unwrap().page, Some(3));
    }

    #[test]
    fn test_deterministic() {
        let pages = vec![page(1, "Alpha\n\nBeta\n\nGamma\n\nDelta")];
        let c1 = chunk_pages("doc", &pages, 8, 2);
        let c2 = chunk_pages("doc", &pages, 8, 2);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}
