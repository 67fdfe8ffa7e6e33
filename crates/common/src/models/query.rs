//! Queries, query variants, and retrieved chunks

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw user question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,

    pub text: String,

    /// Index of the conversation turn this query follows up on
    pub previous_turn: Option<usize>,

    /// Question asked in that turn, used as rewrite context
    pub previous_question: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            previous_turn: None,
            previous_question: None,
        }
    }

    /// A query that continues an earlier turn
    pub fn follow_up(
        text: impl Into<String>,
        previous_turn: usize,
        previous_question: impl Into<String>,
    ) -> Self {
        Self {
            previous_turn: Some(previous_turn),
            previous_question: Some(previous_question.into()),
            ..Self::new(text)
        }
    }
}

/// Retrieval-oriented rephrasing of a query; rank 0 is the verbatim query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryVariant {
    pub id: Uuid,
    pub query_id: Uuid,
    pub text: String,
    pub rank: usize,
}

impl QueryVariant {
    pub fn new(query_id: Uuid, text: impl Into<String>, rank: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            query_id,
            text: text.into(),
            rank,
        }
    }

    pub fn is_original(&self) -> bool {
        self.rank == 0
    }
}

/// Chunk returned by vector search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,

    pub document_id: Uuid,

    pub source_name: String,

    pub text: String,

    /// Chunk position within its document
    pub position: usize,

    /// Order in which the source document was ingested
    pub document_seq: u64,

    pub derived_from_image: bool,

    /// Similarity score (higher is more relevant)
    pub score: f32,

    /// Ranks of the query variants that retrieved this chunk, ascending
    pub variant_ranks: Vec<usize>,
}

impl RetrievedChunk {
    /// Length of the chunk text in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}
