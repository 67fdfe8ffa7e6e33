//! RagForge Search
//!
//! Turns a user query into fused, ranked chunks:
//! 1. `QueryEnhancer` expands the query into variants
//! 2. `RetrievalOrchestrator` searches every variant concurrently
//! 3. `fuse` deduplicates and ranks the hits

pub mod errors;
pub mod retrieval;

pub use errors::RetrievalError;
pub use retrieval::{
    fuse, KeywordRewriter, LlmRewriter, QueryEnhancer, QueryRewriter, RetrievalOrchestrator,
};
