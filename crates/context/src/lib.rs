//! RagForge Context
//!
//! Question answering over ingested documents:
//! - `ContextAssembler` packs ranked chunks into a size-bounded context
//! - `ResponseGenerator` prompts the generation service
//! - `ChatSession` ties ingestion, retrieval, and generation to one conversation

pub mod assembler;
pub mod errors;
pub mod generator;
pub mod session;

pub use assembler::{assemble, ContextAssembler};
pub use errors::ChatError;
pub use generator::{QueryType, ResponseGenerator};
pub use session::{ChatAnswer, ChatSession};
