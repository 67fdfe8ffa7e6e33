//! RagForge Ingestion
//!
//! Turns parsed documents and images into indexed, embedded chunks.

pub mod chunker;
pub mod errors;
pub mod pipeline;
pub mod sources;

pub use chunker::{chunk, chunk_document, normalize_text, ChunkingConfig};
pub use errors::IngestionError;
pub use pipeline::IngestionPipeline;
pub use sources::{load_paths, Sources};
