//! Answer generation from assembled context
//!
//! Builds one prompt from the recent conversation, the numbered context
//! chunks, and the question, then calls the generation service once. A
//! failure is terminal for the turn; there is no partial answer.

use ragforge_common::errors::GenerationError;
use ragforge_common::models::{ContextBundle, ConversationTurn};
use ragforge_common::Generator;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Kind of answer the question asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Summary,
    Comparison,
    Explanation,
    Factual,
}

impl QueryType {
    pub fn detect(question: &str) -> Self {
        let lower = question.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if any_word(&words, &["summarize", "summarise", "summary", "overview"])
            || lower.contains("main points")
        {
            QueryType::Summary
        } else if any_word(
            &words,
            &["compare", "comparison", "difference", "differences", "versus", "vs"],
        ) {
            QueryType::Comparison
        } else if any_word(&words, &["how", "why", "explain"]) {
            QueryType::Explanation
        } else {
            QueryType::Factual
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            QueryType::Summary => "Summarize the key points found in the context.",
            QueryType::Comparison => {
                "Compare the aspects the context describes, noting similarities and differences."
            }
            QueryType::Explanation => {
                "Explain the answer step by step, breaking complex ideas into simpler parts."
            }
            QueryType::Factual => "Answer the question directly from the context.",
        }
    }
}

fn any_word(words: &[&str], candidates: &[&str]) -> bool {
    words.iter().any(|w| candidates.contains(w))
}

#[derive(Clone)]
pub struct ResponseGenerator {
    generator: Arc<dyn Generator>,
    history_window: usize,
}

impl ResponseGenerator {
    pub fn new(generator: Arc<dyn Generator>, history_window: usize) -> Self {
        Self {
            generator,
            history_window,
        }
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Prompt with the last `history_window` turns, numbered chunks, and the question
    pub fn build_prompt(
        &self,
        question: &str,
        context: &ContextBundle,
        history: &[ConversationTurn],
    ) -> String {
        let mut prompt = String::from(
            "You are an assistant that answers questions about the user's documents.\n\n",
        );

        let recent = &history[history.len().saturating_sub(self.history_window)..];
        if !recent.is_empty() {
            prompt.push_str("Previous conversation:\n");
            for turn in recent {
                prompt.push_str(&format!("User: {}\nAssistant: {}\n\n", turn.query, turn.answer));
            }
        }

        prompt.push_str("Context from documents:\n");
        if context.is_empty() {
            prompt.push_str("No relevant context found.\n");
        } else {
            for (i, chunk) in context.chunks.iter().enumerate() {
                prompt.push_str(&format!("[{}] ({})\n{}\n\n", i + 1, chunk.source_name, chunk.text));
            }
        }

        prompt.push_str(&format!(
            "\nQuestion: {}\n\nTask: {}\n\n\
             Guidelines:\n\
             - Base the answer on the context and say what is missing when it is insufficient.\n\
             - Refer to context passages by their [n] numbers.\n\
             - Connect the answer to the previous conversation when it follows up on it.\n\n\
             Answer:",
            question,
            QueryType::detect(question).instruction()
        ));
        prompt
    }

    #[instrument(skip_all, fields(chunks = context.chunks.len(), history = history.len()))]
    pub async fn generate(
        &self,
        question: &str,
        context: &ContextBundle,
        history: &[ConversationTurn],
    ) -> Result<String, GenerationError> {
        let prompt = self.build_prompt(question, context, history);
        debug!(prompt_chars = prompt.chars().count(), "Generating answer");
        let answer = self.generator.generate(&prompt).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(answer.to_string())
    }
}
