//! Multi-variant retrieval
//!
//! - Query expansion into ranked variants (LLM or keyword rewriting)
//! - Concurrent per-variant vector search
//! - Max-score fusion with deterministic tie-breaking

mod enhancer;
mod fusion;
mod orchestrator;

pub use enhancer::{KeywordRewriter, LlmRewriter, QueryEnhancer, QueryRewriter};
pub use fusion::fuse;
pub use orchestrator::RetrievalOrchestrator;
