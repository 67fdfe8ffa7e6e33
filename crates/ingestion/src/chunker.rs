//! Text chunking module
//!
//! Splits normalized document text into bounded, overlapping chunks.
//! Offsets are character offsets into the normalized text.

use ragforge_common::config::{check_chunking, ChunkingStrategy, PipelineConfig};
use ragforge_common::errors::ConfigError;
use ragforge_common::models::{Chunk, Document};
use regex_lite::Regex;
use std::sync::OnceLock;
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Configuration for text chunking
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,
    pub strategy: ChunkingStrategy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from_pipeline(&PipelineConfig::default())
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            strategy: ChunkingStrategy::SlidingWindow,
        }
    }

    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            strategy: config.chunking_strategy,
        }
    }

    /// `chunk_overlap < chunk_size`, both positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_chunking(self.chunk_size, self.chunk_overlap)
    }
}

/// Collapse whitespace runs and line-ending variants
pub fn normalize_text(text: &str) -> String {
    static SPACES: OnceLock<Option<Regex>> = OnceLock::new();
    static BLANK_LINES: OnceLock<Option<Regex>> = OnceLock::new();

    let mut text = text.replace("\r\n", "\n").replace('\r', "\n");
    if let Some(spaces) = SPACES.get_or_init(|| Regex::new(r"[ \t]+").ok()) {
        text = spaces.replace_all(&text, " ").into_owned();
    }
    if let Some(blank_lines) = BLANK_LINES.get_or_init(|| Regex::new(r"\n{3,}").ok()) {
        text = blank_lines.replace_all(&text, "\n\n").into_owned();
    }
    text.trim().to_string()
}

/// Chunk `document` with a sliding window of `chunk_size` / `chunk_overlap`
pub fn chunk(
    document: &Document,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>, ConfigError> {
    chunk_document(document, &ChunkingConfig::new(chunk_size, chunk_overlap))
}

/// Chunk `document` with the configured strategy.
///
/// Fails with `ConfigError` before touching the text if the overlap is not
/// smaller than the chunk size.
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Result<Vec<Chunk>, ConfigError> {
    config.validate()?;

    let text = normalize_text(&document.text);
    let spans = match config.strategy {
        ChunkingStrategy::SlidingWindow => {
            sliding_window(text.chars().count(), config.chunk_size, config.chunk_overlap)
        }
        ChunkingStrategy::Semantic => semantic_spans(&text, config)?,
    };

    let chars: Vec<char> = text.chars().collect();
    let derived_from_image = document.format.is_image();
    let chunks: Vec<Chunk> = spans
        .into_iter()
        .enumerate()
        .map(|(position, (start, end))| Chunk {
            id: Chunk::chunk_id(document.id, position),
            document_id: document.id,
            position,
            text: chars[start..end].iter().collect(),
            start,
            end,
            derived_from_image,
        })
        .collect();

    debug!(
        document = %document.source_name,
        input_chars = chars.len(),
        chunk_count = chunks.len(),
        chunk_size = config.chunk_size,
        "Text chunked"
    );

    Ok(chunks)
}

/// Windows `[start, end)` over `total` characters; consecutive windows
/// share exactly `overlap` characters and the last one ends at `total`.
fn sliding_window(total: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    if total == 0 {
        return spans;
    }

    let mut start = 0;
    loop {
        let end = (start + size).min(total);
        spans.push((start, end));
        if end == total {
            break;
        }
        start = end - overlap;
    }
    spans
}

/// Boundary-aware spans (paragraphs, sentences, words) no longer than the
/// chunk size. Overlap is an upper bound here, not exact.
fn semantic_spans(text: &str, config: &ChunkingConfig) -> Result<Vec<(usize, usize)>, ConfigError> {
    let chunk_config = ChunkConfig::new(config.chunk_size)
        .with_overlap(config.chunk_overlap)
        .map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;
    let splitter = TextSplitter::new(chunk_config);

    let byte_offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let to_char = |byte: usize| byte_offsets.partition_point(|&b| b < byte);

    Ok(splitter
        .chunk_indices(text)
        .map(|(byte_start, piece)| {
            let start = to_char(byte_start);
            (start, start + piece.chars().count())
        })
        .collect())
}
