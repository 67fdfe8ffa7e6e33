//! Size-bounded context assembly
//!
//! Chunks are taken greedily in ranked order and included whole or not at
//! all. The budget counts characters of the rendered context, separators
//! included, so `ContextBundle::text()` never exceeds `max_chars`.
//!
//! Citations cover at most `max_sources` documents. A document whose chunks
//! made it into the context after the citation slots ran out is listed in
//! `uncited_documents` instead of being dropped silently.

use ragforge_common::config::RetrievalConfig;
use ragforge_common::models::{Citation, ContextBundle, RetrievedChunk, CONTEXT_SEPARATOR};
use tracing::{debug, warn};

/// Characters of chunk text kept in a citation snippet
pub const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAssembler {
    max_chars: usize,
    max_sources: usize,
}

impl ContextAssembler {
    pub fn new(max_chars: usize, max_sources: usize) -> Self {
        Self {
            max_chars,
            max_sources,
        }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.max_context_chars, config.max_sources)
    }

    pub fn assemble(&self, ranked: &[RetrievedChunk]) -> ContextBundle {
        assemble(ranked, self.max_chars, self.max_sources)
    }
}

/// Build a context bundle from ranked chunks
pub fn assemble(ranked: &[RetrievedChunk], max_chars: usize, max_sources: usize) -> ContextBundle {
    let separator_chars = CONTEXT_SEPARATOR.chars().count();
    let mut bundle = ContextBundle::default();

    for chunk in ranked {
        let separator = if bundle.chunks.is_empty() { 0 } else { separator_chars };
        let cost = separator + chunk.char_len();
        if bundle.total_chars + cost > max_chars {
            bundle.skipped += 1;
            continue;
        }
        bundle.total_chars += cost;
        bundle.chunks.push(chunk.clone());
    }

    for chunk in &bundle.chunks {
        if let Some(citation) = bundle
            .citations
            .iter_mut()
            .find(|c| c.document_id == chunk.document_id)
        {
            citation.chunk_ids.push(chunk.chunk_id);
            citation.score = citation.score.max(chunk.score);
        } else if bundle.citations.len() < max_sources {
            bundle.citations.push(Citation {
                index: bundle.citations.len() + 1,
                document_id: chunk.document_id,
                source_name: chunk.source_name.clone(),
                score: chunk.score,
                chunk_ids: vec![chunk.chunk_id],
                snippet: chunk.text.chars().take(SNIPPET_CHARS).collect(),
            });
        } else if !bundle.uncited_documents.contains(&chunk.document_id) {
            bundle.uncited_documents.push(chunk.document_id);
        }
    }

    if !bundle.uncited_documents.is_empty() {
        warn!(
            uncited = bundle.uncited_documents.len(),
            max_sources,
            "Context includes documents beyond the citation limit"
        );
    }
    debug!(
        included = bundle.chunks.len(),
        skipped = bundle.skipped,
        chars = bundle.total_chars,
        citations = bundle.citations.len(),
        "Context assembled"
    );
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chunk(id: u128, document: u128, len: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: Uuid::from_u128(id),
            document_id: Uuid::from_u128(document),
            source_name: format!("doc-{}.md", document),
            text: "x".repeat(len),
            position: id as usize,
            document_seq: document as u64,
            derived_from_image: false,
            score: 1.0 - id as f32 / 100.0,
            variant_ranks: vec![0],
        }
    }

    #[test]
    fn test_budget_of_500_takes_first_two_of_three() {
        let ranked = vec![chunk(1, 10, 200), chunk(2, 20, 200), chunk(3, 30, 200)];

        let bundle = assemble(&ranked, 500, 5);

        assert_eq!(bundle.chunks.len(), 2);
        assert_eq!(bundle.total_chars, 402);
        assert_eq!(bundle.skipped, 1);
        assert_eq!(bundle.text().chars().count(), bundle.total_chars);
        let cited: Vec<Uuid> = bundle.citations.iter().map(|c| c.document_id).collect();
        assert_eq!(cited, vec![Uuid::from_u128(10), Uuid::from_u128(20)]);
        assert!(bundle.uncited_documents.is_empty());
    }

    #[test]
    fn test_chunks_included_whole_and_budget_never_exceeded() {
        let ranked = vec![chunk(1, 1, 120), chunk(2, 1, 400), chunk(3, 2, 50), chunk(4, 3, 10)];

        let bundle = assemble(&ranked, 200, 5);

        let ids: Vec<u128> = bundle.chunks.iter().map(|c| c.chunk_id.as_u128()).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert!(bundle.total_chars <= 200);
        for chunk in &bundle.chunks {
            assert_eq!(chunk.char_len(), ranked.iter().find(|r| r.chunk_id == chunk.chunk_id).unwrap().char_len());
        }
    }

    #[test]
    fn test_removing_any_chunk_stays_within_budget() {
        let ranked: Vec<RetrievedChunk> = (0..8).map(|i| chunk(i, i % 3, 30 + (i as usize * 17) % 90)).collect();
        let bundle = assemble(&ranked, 250, 5);

        for skip in 0..bundle.chunks.len() {
            let remaining: Vec<RetrievedChunk> = bundle
                .chunks
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, c)| c.clone())
                .collect();
            let rendered = remaining.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(CONTEXT_SEPARATOR);
            assert!(rendered.chars().count() <= 250);
        }
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let ranked: Vec<RetrievedChunk> = (0..6).map(|i| chunk(i, i % 2, 80)).collect();
        assert_eq!(assemble(&ranked, 300, 1), assemble(&ranked, 300, 1));
    }

    #[test]
    fn test_citation_cap_reports_uncited_documents() {
        let ranked = vec![chunk(1, 10, 20), chunk(2, 20, 20), chunk(3, 10, 20), chunk(4, 30, 20), chunk(5, 30, 20)];

        let bundle = assemble(&ranked, 1_000, 2);

        assert_eq!(bundle.chunks.len(), 5);
        assert_eq!(bundle.citations.len(), 2);
        assert_eq!(bundle.citations[0].index, 1);
        assert_eq!(
            bundle.citations[0].chunk_ids,
            vec![Uuid::from_u128(1), Uuid::from_u128(3)]
        );
        assert_eq!(bundle.uncited_documents, vec![Uuid::from_u128(30)]);
    }

    #[test]
    fn test_snippet_is_truncated() {
        let bundle = assemble(&[chunk(1, 1, 500)], 1_000, 5);
        assert_eq!(bundle.citations[0].snippet.chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn test_nothing_fits() {
        let bundle = assemble(&[chunk(1, 1, 50)], 10, 5);
        assert!(bundle.is_empty());
        assert_eq!(bundle.skipped, 1);
        assert!(bundle.citations.is_empty());
    }
}
