//! Sliding-window chunking of page text.
//!
//! Windows are measured in bytes over the original string and widened to the
//! next UTF-8 character boundary, so slicing never splits a character. Each
//! window is whitespace-trimmed by index before being yielded; nothing is
//! copied until a caller asks for an owned [`Chunk`].

use crate::models::Chunk;
use std::ops::Range;
use tracing::warn;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    /// Builds a usable config from raw settings, correcting bad values
    /// instead of failing. Every correction is logged and returned as a
    /// human-readable warning.
    pub fn corrected(chunk_size: i64, overlap: i64) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();

        let chunk_size = if chunk_size <= 0 {
            warnings.push(format!(
                "chunk size {chunk_size} is not positive, using {DEFAULT_CHUNK_SIZE}"
            ));
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size as usize
        };

        let mut overlap = if overlap < 0 {
            warnings.push(format!(
                "chunk overlap {overlap} is negative, using {DEFAULT_CHUNK_OVERLAP}"
            ));
            DEFAULT_CHUNK_OVERLAP
        } else {
            overlap as usize
        };

        if overlap >= chunk_size {
            let fallback = chunk_size / 4;
            warnings.push(format!(
                "chunk overlap {overlap} is not smaller than chunk size {chunk_size}, using {fallback}"
            ));
            overlap = fallback;
        }

        for message in &warnings {
            warn!("{message}");
        }

        (Self { chunk_size, overlap }, warnings)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Raw (untrimmed) window ranges over `text`.
#[derive(Debug, Clone)]
pub struct WindowSpans<'a> {
    text: &'a str,
    config: ChunkingConfig,
    cursor: usize,
    done: bool,
}

impl<'a> WindowSpans<'a> {
    pub fn new(text: &'a str, config: ChunkingConfig) -> Self {
        Self {
            text,
            config,
            cursor: 0,
            done: text.is_empty(),
        }
    }
}

impl Iterator for WindowSpans<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.text.len();
        if self.done || self.cursor >= len {
            return None;
        }

        let start = self.cursor;
        let span = self.config.chunk_size.min(len - start).max(1);
        let mut end = start + span;
        while !self.text.is_char_boundary(end) {
            end += 1;
        }

        if end >= len {
            // The window reached the end of the text; a further window would
            // only repeat the overlap tail.
            self.done = true;
        } else {
            let mut next = end.saturating_sub(self.config.overlap);
            while !self.text.is_char_boundary(next) {
                next -= 1;
            }
            if next <= start {
                next = end;
            }
            self.cursor = next;
        }

        Some(start..end)
    }
}

/// Trimmed, non-empty windows numbered from zero.
#[derive(Debug, Clone)]
pub struct SlidingChunks<'a> {
    spans: WindowSpans<'a>,
    next_index: u32,
}

impl<'a> Iterator for SlidingChunks<'a> {
    type Item = (u32, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.spans.text;
        for range in self.spans.by_ref() {
            let trimmed = text[range].trim();
            if trimmed.is_empty() {
                continue;
            }
            let index = self.next_index;
            self.next_index += 1;
            return Some((index, trimmed));
        }
        None
    }
}

pub fn sliding_chunks(text: &str, config: ChunkingConfig) -> SlidingChunks<'_> {
    SlidingChunks {
        spans: WindowSpans::new(text, config),
        next_index: 0,
    }
}

/// Chunks of one page, with owned text ready to be batched.
pub fn chunk_page(
    page_number: u32,
    text: &str,
    config: ChunkingConfig,
) -> impl Iterator<Item = Chunk> + '_ {
    sliding_chunks(text, config).map(move |(chunk_index, chunk)| Chunk {
        page_number,
        chunk_index,
        text: chunk.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
        }
    }

    fn texts(text: &str, config: ChunkingConfig) -> Vec<&str> {
        sliding_chunks(text, config).map(|(_, chunk)| chunk).collect()
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn overlapping_windows_advance_by_span_minus_overlap() {
        let spans: Vec<_> = WindowSpans::new("0123456789", config(4, 1)).collect();
        assert_eq!(spans, vec![0..4, 3..7, 6..10]);
        assert_eq!(
            texts("0123456789", config(4, 1)),
            vec!["0123", "3456", "6789"]
        );
    }

    #[test]
    fn fifteen_hundred_chars_make_two_chunks() {
        let page = "a".repeat(1_500);
        let spans: Vec<_> = WindowSpans::new(&page, config(1_000, 200)).collect();
        assert_eq!(spans, vec![0..1_000, 800..1_500]);
    }

    #[test]
    fn empty_and_blank_text_yield_nothing() {
        assert_eq!(sliding_chunks("", config(10, 2)).count(), 0);
        assert_eq!(sliding_chunks(" \n\t  ", config(2, 0)).count(), 0);
    }

    #[test]
    fn chunks_are_trimmed_and_numbered_sequentially() {
        let chunks: Vec<_> = sliding_chunks("ab      cd", config(4, 0)).collect();
        assert_eq!(chunks, vec![(0, "ab"), (1, "cd")]);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let first: Vec<_> = sliding_chunks(&text, config(97, 13)).collect();
        let second: Vec<_> = sliding_chunks(&text, config(97, 13)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn windows_always_progress_and_cover_the_text() {
        let text = "lorem ipsum dolor sit amet ".repeat(7);
        for chunk_size in 1..40 {
            for overlap in 0..chunk_size {
                let spans: Vec<_> = WindowSpans::new(&text, config(chunk_size, overlap)).collect();
                assert!(spans.windows(2).all(|pair| pair[0].start < pair[1].start));
                assert_eq!(spans.last().map(|span| span.end), Some(text.len()));
            }
        }
    }

    #[test]
    fn windows_never_split_multibyte_characters() {
        let text = "ação é útil ".repeat(20);
        for chunk_size in 1..12 {
            let spans: Vec<_> = WindowSpans::new(&text, config(chunk_size, chunk_size / 2)).collect();
            for span in &spans {
                assert!(text.is_char_boundary(span.start) && text.is_char_boundary(span.end));
            }
            assert_eq!(spans.last().map(|span| span.end), Some(text.len()));
        }
    }

    #[test]
    fn invalid_parameters_are_corrected_with_warnings() {
        let (corrected, warnings) = ChunkingConfig::corrected(0, 0);
        assert_eq!(corrected.chunk_size, 1_000);
        assert_eq!(warnings.len(), 1);
        assert_eq!(texts("abcdef", corrected), texts("abcdef", config(1_000, 100)));

        let (corrected, warnings) = ChunkingConfig::corrected(500, -1);
        assert_eq!(corrected, config(500, 100));
        assert_eq!(warnings.len(), 1);

        let (corrected, warnings) = ChunkingConfig::corrected(40, 40);
        assert_eq!(corrected, config(40, 10));
        assert_eq!(warnings.len(), 1);

        let (corrected, warnings) = ChunkingConfig::corrected(3, 5);
        assert_eq!(corrected, config(3, 0));
        assert_eq!(warnings.len(), 1);

        let (_, warnings) = ChunkingConfig::corrected(1_000, 200);
        assert!(warnings.is_empty());
    }

    #[test]
    fn chunk_page_keeps_page_location() {
        let chunks: Vec<_> = chunk_page(7, "abcdefgh", config(4, 0)).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].page_number, 7);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].text, "efgh");
    }
}
