use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Window parameters for the chunker, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkConfig {
    /// Create a window configuration; `overlap` must be smaller than `chunk_size`
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, chunk_size
            )));
        }
        Ok(ChunkConfig {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of two consecutive windows
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Number of chunks produced for a text of `len` characters
    pub fn expected_chunks(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        len.saturating_sub(self.overlap).div_ceil(self.step()).max(1)
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Metadata stored alongside every chunk in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Base filename of the source document
    pub filename: String,
    /// Character offset of the chunk in the source document
    pub start_offset: usize,
    /// Position of the chunk within its document
    pub chunk_index: usize,
}

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Identifier of the document this chunk belongs to
    pub document_id: String,
    /// 0-based position within the parent document
    pub index: usize,
    /// The actual text content of this chunk
    pub text: String,
    /// Starting character position of this chunk in the original document
    pub start_offset: usize,
    pub metadata: ChunkMetadata,
}

impl TextChunk {
    /// Deterministic index id, so re-ingesting a file overwrites its entries
    pub fn entry_id(&self) -> String {
        entry_id(&self.metadata.filename, self.index)
    }
}

pub fn entry_id(filename: &str, chunk_index: usize) -> String {
    format!("{}#{}", filename, chunk_index)
}

/// Split text into overlapping fixed-size windows.
///
/// Windows start at `0, step, 2 * step, ...` where `step = chunk_size - overlap`.
/// The final window is truncated to the remaining text. Offsets count
/// characters, so multi-byte text is never split inside a code point.
pub fn split_into_chunks(text: &str, filename: &str, config: &ChunkConfig) -> Result<Vec<TextChunk>> {
    if filename.trim().is_empty() {
        return Err(RagError::InvalidDocument(
            "chunks require a source filename".to_string(),
        ));
    }

    // Byte position of every character boundary, including the end of text
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;

    let mut chunks = Vec::with_capacity(config.expected_chunks(char_count));
    let mut start = 0;

    while start < char_count {
        let end = (start + config.chunk_size).min(char_count);
        let index = chunks.len();

        chunks.push(TextChunk {
            document_id: filename.to_string(),
            index,
            text: text[bounds[start]..bounds[end]].to_string(),
            start_offset: start,
            metadata: ChunkMetadata {
                filename: filename.to_string(),
                start_offset: start,
                chunk_index: index,
            },
        });

        if end == char_count {
            break;
        }
        start += config.step();
    }

    Ok(chunks)
}
