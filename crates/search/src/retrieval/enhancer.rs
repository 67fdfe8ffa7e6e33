//! Query expansion
//!
//! Variant 0 is always the verbatim query. Additional variants come from a
//! `QueryRewriter`; a failing rewriter degrades retrieval to the verbatim
//! query and never fails the request.

use async_trait::async_trait;
use ragforge_common::config::{ExpansionMode, RetrievalConfig};
use ragforge_common::errors::GenerationError;
use ragforge_common::metrics::record_expansion_fallback;
use ragforge_common::models::{Query, QueryVariant};
use ragforge_common::Generator;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Produces alternate phrasings of a query
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    /// Up to `count` rephrasings, best first. May return fewer.
    async fn rewrite(&self, query: &Query, count: usize) -> Result<Vec<String>, GenerationError>;
}

/// Asks the generation service for rephrasings, one per line
pub struct LlmRewriter {
    generator: Arc<dyn Generator>,
}

impl LlmRewriter {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    fn prompt(query: &Query, count: usize) -> String {
        let mut prompt = format!(
            "Rewrite the search query below into {} alternative phrasings that would help \
             retrieve relevant passages from a document collection. Keep the meaning. \
             Write one phrasing per line with no numbering or commentary.\n\n",
            count
        );
        if let Some(previous) = &query.previous_question {
            prompt.push_str(&format!(
                "The query follows up on this earlier question: {}\n\n",
                previous
            ));
        }
        prompt.push_str(&format!("Query: {}\n\nPhrasings:", query.text));
        prompt
    }
}

#[async_trait]
impl QueryRewriter for LlmRewriter {
    async fn rewrite(&self, query: &Query, count: usize) -> Result<Vec<String>, GenerationError> {
        let response = self.generator.generate(&Self::prompt(query, count)).await?;
        let phrasings = response
            .lines()
            .map(strip_list_marker)
            .filter(|line| !line.is_empty() && !line.ends_with(':'))
            .map(str::to_string)
            .collect();
        Ok(dedupe(&query.text, phrasings, count))
    }
}

/// Offline heuristics: drop the leading question word, and pull the topic
/// out of "explain ..." / "describe ..." requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordRewriter;

const QUESTION_WORDS: &[&str] = &["what", "how", "why", "when", "where", "who", "which"];
const AUXILIARIES: &[&str] = &["is", "are", "was", "were", "does", "do", "did", "can", "should"];
const TOPIC_VERBS: &[&str] = &["explain", "describe"];

impl KeywordRewriter {
    fn candidates(text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut candidates = Vec::new();

        let is_question = words
            .first()
            .is_some_and(|w| QUESTION_WORDS.contains(&normalize_word(w).as_str()));
        if is_question {
            let mut rest = &words[1..];
            if rest
                .first()
                .is_some_and(|w| AUXILIARIES.contains(&normalize_word(w).as_str()))
            {
                rest = &rest[1..];
            }
            candidates.push(join_terms(rest));
        }

        let mentions_topic_verb = words
            .iter()
            .any(|w| TOPIC_VERBS.contains(&normalize_word(w).as_str()));
        if mentions_topic_verb {
            let topic: Vec<&str> = words
                .iter()
                .copied()
                .filter(|w| !TOPIC_VERBS.contains(&normalize_word(w).as_str()))
                .collect();
            candidates.push(join_terms(&topic));
        }

        candidates
    }
}

#[async_trait]
impl QueryRewriter for KeywordRewriter {
    async fn rewrite(&self, query: &Query, count: usize) -> Result<Vec<String>, GenerationError> {
        Ok(dedupe(&query.text, Self::candidates(&query.text), count))
    }
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

fn join_terms(words: &[&str]) -> String {
    words
        .join(" ")
        .trim_end_matches(|c: char| matches!(c, '?' | '.' | '!'))
        .trim()
        .to_string()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line
        .trim()
        .trim_start_matches(|c: char| matches!(c, '-' | '*' | '•'))
        .trim_start();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let line = if digits > 0 {
        let rest = &line[digits..];
        rest.strip_prefix('.')
            .or_else(|| rest.strip_prefix(')'))
            .map(str::trim_start)
            .unwrap_or(line)
    } else {
        line
    };
    line.trim_matches('"').trim()
}

/// Drop blanks, repeats, and phrasings equal to the original (case-insensitive)
fn dedupe(original: &str, phrasings: Vec<String>, count: usize) -> Vec<String> {
    let mut seen = vec![original.trim().to_lowercase()];
    let mut kept = Vec::new();
    for phrasing in phrasings {
        let key = phrasing.trim().to_lowercase();
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        kept.push(phrasing.trim().to_string());
        if kept.len() == count {
            break;
        }
    }
    kept
}

/// Expands a query into ranked variants
#[derive(Clone)]
pub struct QueryEnhancer {
    rewriter: Arc<dyn QueryRewriter>,
}

impl QueryEnhancer {
    pub fn new(rewriter: Arc<dyn QueryRewriter>) -> Self {
        Self { rewriter }
    }

    /// Pick the rewriter named by `config.expansion`
    pub fn from_config(config: &RetrievalConfig, generator: Arc<dyn Generator>) -> Self {
        match config.expansion {
            ExpansionMode::Llm => Self::new(Arc::new(LlmRewriter::new(generator))),
            ExpansionMode::Keyword => Self::new(Arc::new(KeywordRewriter)),
        }
    }

    /// At most `max(n, 1)` variants; variant 0 is always the verbatim query,
    /// so `n == 0` still yields it
    #[instrument(skip_all, fields(query_id = %query.id, n))]
    pub async fn expand(&self, query: &Query, n: usize) -> Vec<QueryVariant> {
        let mut variants = vec![QueryVariant::new(query.id, query.text.clone(), 0)];
        if n <= 1 {
            return variants;
        }

        match self.rewriter.rewrite(query, n - 1).await {
            Ok(phrasings) => {
                let phrasings = dedupe(&query.text, phrasings, n - 1);
                debug!(extra = phrasings.len(), "Query expanded");
                variants.extend(
                    phrasings
                        .into_iter()
                        .enumerate()
                        .map(|(i, text)| QueryVariant::new(query.id, text, i + 1)),
                );
            }
            Err(err) => {
                warn!(error = %err, "Query rewrite failed; searching with the verbatim query only");
                record_expansion_fallback();
            }
        }
        variants
    }
}
