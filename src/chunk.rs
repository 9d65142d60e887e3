//! Fixed-size sliding-window text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `size` characters. Each
//! chunk after the first starts `overlap` characters before the end of the
//! previous one, so a sentence cut at a boundary still appears whole in one
//! of the two neighbouring chunks.
//!
//! Sizes count Unicode scalar values, never bytes, so a span can never
//! split a character.
//!
//! # Algorithm
//!
//! 1. Collect the byte offset of every character boundary.
//! 2. Emit `text[start..start + size]` (clamped to the end of the text).
//! 3. Stop once a chunk reaches the end; otherwise advance `start` by
//!    `size - overlap` and repeat.
//!
//! Dropping the first `overlap` characters of every chunk except the first
//! and concatenating the rest reproduces the input exactly.
//!
//! # Example
//!
//! ```rust
//! use documind::chunk::Chunker;
//!
//! let chunker = Chunker::new(10, 4);
//! let chunks = chunker.split("abcdefghijklmnop");
//! assert_eq!(chunks, vec!["abcdefghij", "ghijklmnop"]);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Default maximum chunk length, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive chunks, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Splits text into overlapping windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker {
    /// Create a chunker. `size` is raised to at least 1 and `overlap` is
    /// clamped below `size` so the window always advances.
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        let overlap = overlap.min(size - 1);
        Self { size, overlap }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into ordered chunk texts. Empty input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = bounds.len() - 1;
        let step = self.size - self.overlap;

        let mut chunks = Vec::with_capacity(char_count / step + 1);
        let mut start = 0;
        loop {
            let end = (start + self.size).min(char_count);
            chunks.push(text[bounds[start]..bounds[end]].to_string());
            if end == char_count {
                break;
            }
            start += step;
        }
        chunks
    }

    /// Split a document's text into [`Chunk`]s with contiguous indices
    /// starting at 0, each carrying the SHA-256 of its text.
    pub fn chunk_document(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(i, piece)| make_chunk(document_id, i as i64, piece))
            .collect()
    }
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, index: i64, text: String) -> Chunk {
    Chunk {
        document_id: document_id.to_string(),
        chunk_index: index,
        hash: content_hash(&text),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(c);
            } else {
                out.extend(c.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_empty_text() {
        assert!(Chunker::default().split("").is_empty());
        assert!(Chunker::default().chunk_document("doc1", "").is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = Chunker::default().split("Hello, world!");
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_exact_size_single_chunk() {
        let text = "x".repeat(1000);
        assert_eq!(Chunker::default().split(&text).len(), 1);
    }

    #[test]
    fn test_2500_chars_yields_three_chunks() {
        let text: String = (0..2500).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let chunks = Chunker::new(1000, 200).split(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks[1].chars().count(), 1000);
        assert_eq!(chunks[2].chars().count(), 900);
    }

    #[test]
    fn test_overlap_matches_previous_tail() {
        let text: String = (0..3000).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
        let chunker = Chunker::new(1000, 200);
        let chunks = chunker.split(&text);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().skip(800).collect();
            let head: String = pair[1].chars().take(200).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_reassembly_reconstructs_text() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(97);
        for (size, overlap) in [(1000, 200), (50, 10), (7, 3), (2, 1), (1, 0), (13, 0)] {
            let chunker = Chunker::new(size, overlap);
            let chunks = chunker.split(&text);
            assert_eq!(reassemble(&chunks, overlap), text, "size={size} overlap={overlap}");
            for c in &chunks {
                assert!(c.chars().count() <= size);
            }
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Héllo wörld ✓    │\n└──────────────────┘";
        let chunker = Chunker::new(5, 2);
        let chunks = chunker.split(text);
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks, 2), text);
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let chunker = Chunker::new(4, 10);
        assert_eq!(chunker.overlap(), 3);
        let chunks = chunker.split("abcdefgh");
        assert_eq!(reassemble(&chunks, 3), "abcdefgh");
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = "Paragraph number. ".repeat(200);
        let chunks = Chunker::new(100, 20).chunk_document("doc1", &text);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.document_id, "doc1");
            assert_eq!(c.hash, content_hash(&c.text));
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta".repeat(40);
        let chunker = Chunker::new(64, 16);
        let c1 = chunker.chunk_document("doc1", &text);
        let c2 = chunker.chunk_document("doc1", &text);
        assert_eq!(c1, c2);
    }
}
