//! Assembled context, citations, and conversation turns

use super::query::RetrievedChunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator placed between chunk texts in the rendered context
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Reference to a source document that contributed to an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Citation index (1-based)
    pub index: usize,

    pub document_id: Uuid,

    pub source_name: String,

    /// Best score among the document's included chunks
    pub score: f32,

    /// Included chunks from this document, in context order
    pub chunk_ids: Vec<Uuid>,

    /// Leading excerpt of the first included chunk
    pub snippet: String,
}

/// Ordered, size-bounded context handed to the response generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Included chunks, in ranked order
    pub chunks: Vec<RetrievedChunk>,

    /// One per distinct source document, first-seen order, capped
    pub citations: Vec<Citation>,

    /// Documents present in `chunks` that received no citation slot
    pub uncited_documents: Vec<Uuid>,

    /// Characters in the rendered context, separators included
    pub total_chars: usize,

    /// Ranked chunks left out because they did not fit
    pub skipped: usize,
}

impl ContextBundle {
    /// Render the chunk texts joined by `CONTEXT_SEPARATOR`
    pub fn text(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// One question/answer exchange in a chat session; never edited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Chunks included in the context for this turn
    pub context_chunks: usize,
    pub timestamp: DateTime<Utc>,
}
