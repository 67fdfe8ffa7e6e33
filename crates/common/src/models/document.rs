//! Documents, chunks, and embedding records

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Source format of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Text,
    Markdown,
    Pdf,
    Docx,
    Csv,
    Json,
    Code,
    Notebook,
    Image,
    Other,
}

impl DocumentFormat {
    /// Guess the format from a file extension (without the dot)
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "txt" | "text" | "log" => DocumentFormat::Text,
            "md" | "markdown" => DocumentFormat::Markdown,
            "pdf" => DocumentFormat::Pdf,
            "docx" => DocumentFormat::Docx,
            "csv" | "tsv" => DocumentFormat::Csv,
            "json" | "jsonl" => DocumentFormat::Json,
            "ipynb" => DocumentFormat::Notebook,
            "jpg" | "jpeg" | "png" => DocumentFormat::Image,
            "py" | "rs" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" | "rb" | "sh" => {
                DocumentFormat::Code
            }
            _ => DocumentFormat::Other,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, DocumentFormat::Image)
    }
}

/// A parsed document ready for chunking.
///
/// Text extraction happens upstream; `text` is already plain UTF-8.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,

    /// File name or other human-readable origin
    pub source_name: String,

    pub format: DocumentFormat,

    pub text: String,
}

impl Document {
    /// Document with a fresh random id
    pub fn new(source_name: impl Into<String>, format: DocumentFormat, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_name: source_name.into(),
            format,
            text: text.into(),
        }
    }

    /// Document whose id is derived from `source_key` (e.g. a canonical path).
    ///
    /// Loading the same source again yields the same id, so its chunk ids
    /// match and re-ingestion overwrites the earlier points.
    pub fn from_source(
        source_key: &str,
        source_name: impl Into<String>,
        format: DocumentFormat,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Self::source_id(source_key),
            ..Self::new(source_name, format, text)
        }
    }

    pub fn source_id(source_key: &str) -> Uuid {
        digest_uuid(format!("source:{}", source_key).as_bytes())
    }
}

fn digest_uuid(input: &[u8]) -> Uuid {
    let digest = Sha256::digest(input);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Bounded contiguous slice of a document's normalized text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,

    pub document_id: Uuid,

    /// Position within the document, starting at 0
    pub position: usize,

    pub text: String,

    /// Character offset (inclusive) in the normalized document text
    pub start: usize,

    /// Character offset (exclusive) in the normalized document text
    pub end: usize,

    /// Text came from an image description
    pub derived_from_image: bool,
}

impl Chunk {
    /// Deterministic chunk id, so re-ingesting a document overwrites its points
    pub fn chunk_id(document_id: Uuid, position: usize) -> Uuid {
        digest_uuid(format!("{}:{}", document_id, position).as_bytes())
    }

    /// Hex SHA-256 of the chunk text
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Vector produced for one chunk; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_id: Uuid,
    pub vector: Vec<f32>,
    pub model: String,
}

impl EmbeddingRecord {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        let doc = Uuid::new_v4();
        assert_eq!(Chunk::chunk_id(doc, 3), Chunk::chunk_id(doc, 3));
        assert_ne!(Chunk::chunk_id(doc, 3), Chunk::chunk_id(doc, 4));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_extension("PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_extension("py"), DocumentFormat::Code);
        assert!(DocumentFormat::from_extension("jpeg").is_image());
        assert_eq!(DocumentFormat::from_extension("xyz"), DocumentFormat::Other);
    }

    #[test]
    fn test_source_documents_share_ids() {
        let first = Document::from_source("/data/a.txt", "a.txt", DocumentFormat::Text, "one");
        let again = Document::from_source("/data/a.txt", "a.txt", DocumentFormat::Text, "one, edited");
        let other = Document::from_source("/other/a.txt", "a.txt", DocumentFormat::Text, "one");

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, other.id);
        assert_ne!(
            Document::new("a.txt", DocumentFormat::Text, "one").id,
            Document::new("a.txt", DocumentFormat::Text, "one").id
        );
    }
}
