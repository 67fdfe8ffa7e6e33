//! Max-score fusion of per-variant search results
//!
//! A chunk retrieved by several variants appears once, scored by the best
//! variant. Output order is fully determined by the input set:
//! - Score, descending
//! - Ingestion order of the source document
//! - Chunk position within the document
//! - Chunk id, as a final total order

use ragforge_common::models::RetrievedChunk;
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// Fuse results from any number of variants into at most `top_k` chunks
/// scoring at least `threshold`
pub fn fuse(
    results: impl IntoIterator<Item = RetrievedChunk>,
    top_k: usize,
    threshold: f32,
) -> Vec<RetrievedChunk> {
    let mut by_id: HashMap<Uuid, RetrievedChunk> = HashMap::new();

    for chunk in results {
        match by_id.get_mut(&chunk.chunk_id) {
            Some(existing) => {
                existing.variant_ranks.extend_from_slice(&chunk.variant_ranks);
                if chunk.score > existing.score {
                    existing.score = chunk.score;
                }
            }
            None => {
                by_id.insert(chunk.chunk_id, chunk);
            }
        }
    }

    let mut fused: Vec<RetrievedChunk> = by_id
        .into_values()
        .filter(|chunk| chunk.score >= threshold)
        .map(|mut chunk| {
            chunk.variant_ranks.sort_unstable();
            chunk.variant_ranks.dedup();
            chunk
        })
        .collect();

    fused.sort_by(rank_order);
    fused.truncate(top_k);
    fused
}

fn rank_order(a: &RetrievedChunk, b: &RetrievedChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.document_seq.cmp(&b.document_seq))
        .then(a.position.cmp(&b.position))
        .then(a.chunk_id.cmp(&b.chunk_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;

    fn make_chunk(id: u128, seq: u64, position: usize, score: f32, rank: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: Uuid::from_u128(id),
            document_id: Uuid::from_u128(1000 + seq as u128),
            source_name: format!("doc-{}", seq),
            text: format!("chunk {}", id),
            position,
            document_seq: seq,
            derived_from_image: false,
            score,
            variant_ranks: vec![rank],
        }
    }

    fn ids(chunks: &[RetrievedChunk]) -> Vec<u128> {
        chunks.iter().map(|c| c.chunk_id.as_u128()).collect()
    }

    #[test]
    fn test_chunk_from_three_variants_fused_once_with_max_score() {
        // "What is X?", "Define X", "Explain X" all hit c4
        let results = vec![
            make_chunk(4, 0, 3, 0.8, 0),
            make_chunk(1, 0, 0, 0.6, 0),
            make_chunk(4, 0, 3, 0.75, 1),
            make_chunk(4, 0, 3, 0.9, 2),
        ];

        let fused = fuse(results, 10, 0.0);

        assert_eq!(ids(&fused), vec![4, 1]);
        assert_eq!(fused[0].score, 0.9);
        assert_eq!(fused[0].variant_ranks, vec![0, 1, 2]);
    }

    #[test]
    fn test_threshold_applies_to_fused_score() {
        let results = vec![
            make_chunk(1, 0, 0, 0.2, 0),
            make_chunk(1, 0, 0, 0.5, 1),
            make_chunk(2, 0, 1, 0.29, 0),
        ];

        let fused = fuse(results, 10, 0.3);

        assert_eq!(ids(&fused), vec![1]);
        assert_eq!(fused[0].score, 0.5);
    }

    #[test]
    fn test_ties_break_by_ingestion_order_then_position() {
        let results = vec![
            make_chunk(30, 2, 0, 0.7, 0),
            make_chunk(21, 1, 4, 0.7, 0),
            make_chunk(20, 1, 1, 0.7, 1),
            make_chunk(99, 5, 0, 0.95, 1),
        ];

        let fused = fuse(results, 10, 0.0);

        assert_eq!(ids(&fused), vec![99, 20, 21, 30]);
    }

    #[test]
    fn test_top_k_applies_after_fusion() {
        let mut results = Vec::new();
        for rank in 0..3 {
            for id in 0..5u128 {
                results.push(make_chunk(id, 0, id as usize, 0.5 + id as f32 / 10.0, rank));
            }
        }

        let fused = fuse(results, 3, 0.0);

        assert_eq!(ids(&fused), vec![4, 3, 2]);
    }

    #[test]
    fn test_empty_input() {
        assert!(fuse(Vec::new(), 5, 0.0).is_empty());
    }

    #[test]
    fn test_fusion_idempotent_and_order_independent() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut results = Vec::new();
            for rank in 0..3 {
                for _ in 0..15 {
                    let id = rng.gen_range(0..12u128);
                    let score = (rng.gen_range(0..20) as f32) / 20.0;
                    results.push(make_chunk(id, (id % 4) as u64, id as usize, score, rank));
                }
            }

            let once = fuse(results.clone(), 8, 0.25);
            let twice = fuse(once.clone(), 8, 0.25);
            assert_eq!(once, twice);

            results.shuffle(&mut rng);
            assert_eq!(fuse(results, 8, 0.25), once);

            let unique: std::collections::HashSet<_> = once.iter().map(|c| c.chunk_id).collect();
            assert_eq!(unique.len(), once.len());
        }
    }
}
