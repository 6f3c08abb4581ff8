use crate::error::IngestError;
use crate::models::{DocumentPage, TextChunk};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub separator: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_024,
            overlap_chars: 100,
            separator: " ".to_string(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        if self.separator.is_empty() {
            return Err(IngestError::InvalidChunkConfig(
                "separator must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits `text` on the separator and greedily packs the pieces into chunks of
/// at most `max_chars`. Consecutive chunks share trailing pieces totalling at
/// most `overlap_chars`. A single piece longer than `max_chars` becomes its own
/// oversized chunk rather than being cut mid-word.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let separator = config.separator.as_str();
    let separator_len = char_len(separator);
    let pieces = text.split(separator).filter(|piece| !piece.is_empty());

    let mut chunks = Vec::new();
    let mut window: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for piece in pieces {
        let piece_len = char_len(piece);
        let joiner = |window: &Vec<&str>| if window.is_empty() { 0 } else { separator_len };

        if total + piece_len + joiner(&window) > config.max_chars {
            if total > config.max_chars {
                warn!(
                    chunk_len = total,
                    max_chars = config.max_chars,
                    "created a chunk longer than the configured size"
                );
            }

            if !window.is_empty() {
                push_joined(&mut chunks, &window, separator);

                while total > config.overlap_chars
                    || (total > 0 && total + piece_len + joiner(&window) > config.max_chars)
                {
                    let dropped = char_len(window[0]) + if window.len() > 1 { separator_len } else { 0 };
                    total -= dropped;
                    window.remove(0);
                }
            }
        }

        window.push(piece);
        total += piece_len + if window.len() > 1 { separator_len } else { 0 };
    }

    push_joined(&mut chunks, &window, separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, window: &[&str], separator: &str) {
    let joined = window.join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Chunks every page, tagging each chunk with its page's source.
///
/// `chunk_index` counts across the whole batch. The chunk id depends only on
/// the source, page, position within the page and text, so re-ingesting a
/// file yields the same ids whatever else was in the batch.
pub fn chunk_pages(
    pages: &[DocumentPage],
    config: &ChunkingConfig,
) -> Result<Vec<TextChunk>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for page in pages {
        let normalized = normalize_whitespace(&page.text);
        for (position, text) in split_text(&normalized, config).into_iter().enumerate() {
            chunks.push(TextChunk {
                chunk_id: make_chunk_id(&page.source, page.page, position as u64, &text),
                source: page.source.clone(),
                page: page.page,
                chunk_index: cursor,
                text,
            });
            cursor = cursor.saturating_add(1);
        }
    }

    debug!(pages = pages.len(), chunks = chunks.len(), "split pages into chunks");
    Ok(chunks)
}

fn make_chunk_id(source: &str, page: u32, position: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(position.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
