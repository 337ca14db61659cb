//! # Context builder
//!
//! Turns a user query into a block of relevant codex entries for an LLM
//! prompt. Retrieval is best-effort: a failed search and an empty result both
//! come back as `Ok(String::new())`, which callers must read as "no relevant
//! context" and carry on unaugmented.
//!
//! ## Output shape
//!
//! ```text
//! RELEVANT CODEX ENTRIES (ordered by relevance):
//!
//! --- Entry Start ---
//! Type: Character
//! Name: Aria
//! Content:
//! A wandering mage.
//! (Relevance Score: 0.87)
//! --- Entry End ---
//! ```
//!
//! Further entries follow, each preceded by a blank line.
//!
//! ## Token budget
//! With `max_context_tokens` set, the rendered block is measured with the
//! `cl100k_base` encoding and the lowest-ranked entries are dropped until it
//! fits.

use std::sync::Arc;

use tiktoken_rs::cl100k_base;
use tracing::{debug, warn};

use crate::config::ContextConfig;
use crate::error::Result;
use crate::search::{SearchResult, SemanticSearch};

pub const DEFAULT_MAX_ENTRIES: i64 = 10;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.4;

const HEADER: &str = "RELEVANT CODEX ENTRIES (ordered by relevance):\n";

pub struct ContextBuilder {
    search: Arc<dyn SemanticSearch>,
    max_entries: i64,
    similarity_threshold: f64,
    max_context_tokens: Option<usize>,
}

impl ContextBuilder {
    pub fn new(search: Arc<dyn SemanticSearch>) -> Self {
        Self {
            search,
            max_entries: DEFAULT_MAX_ENTRIES,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_context_tokens: None,
        }
    }

    /// Builder seeded from the `context` section of the config. Out-of-range
    /// values fall back to the defaults, as the setters do.
    pub fn from_config(search: Arc<dyn SemanticSearch>, config: &ContextConfig) -> Self {
        let mut builder = Self::new(search);
        builder.set_max_entries(config.max_entries);
        builder.set_similarity_threshold(config.similarity_threshold);
        builder.set_max_context_tokens(config.max_context_tokens);
        builder
    }

    pub fn max_entries(&self) -> i64 {
        self.max_entries
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// Ignored unless `max_entries > 0`.
    pub fn set_max_entries(&mut self, max_entries: i64) {
        if max_entries > 0 {
            self.max_entries = max_entries;
        } else {
            debug!("Ignoring max_entries {}", max_entries);
        }
    }

    /// Ignored unless `threshold` lies in `[0, 1]`.
    pub fn set_similarity_threshold(&mut self, threshold: f64) {
        if (0.0..=1.0).contains(&threshold) {
            self.similarity_threshold = threshold;
        } else {
            debug!("Ignoring similarity threshold {}", threshold);
        }
    }

    pub fn set_max_context_tokens(&mut self, budget: Option<usize>) {
        self.max_context_tokens = budget;
    }

    /// Relevant entries for `query`, rendered for a prompt.
    ///
    /// Never fails because retrieval failed; the `Result` is kept so the
    /// signature can grow hard errors without breaking callers.
    pub async fn build_context_for_query(&self, query: &str) -> Result<String> {
        let results = match self
            .search
            .find_similar_entries(query, self.max_entries)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!("Context search failed, continuing without context: {}", e);
                return Ok(String::new());
            }
        };

        let relevant: Vec<&SearchResult> = results
            .iter()
            .filter(|r| r.score >= self.similarity_threshold)
            .collect();
        debug!(
            "{} of {} results meet threshold {}",
            relevant.len(),
            results.len(),
            self.similarity_threshold
        );

        Ok(self.render(&relevant))
    }

    fn render(&self, results: &[&SearchResult]) -> String {
        let mut blocks: Vec<String> = results.iter().map(|r| render_block(r)).collect();

        if let Some(budget) = self.max_context_tokens {
            match cl100k_base() {
                Ok(bpe) => {
                    while !blocks.is_empty()
                        && bpe.encode_with_special_tokens(&assemble(&blocks)).len() > budget
                    {
                        blocks.pop();
                    }
                    if blocks.len() < results.len() {
                        debug!(
                            "Token budget {} kept {} of {} entries",
                            budget,
                            blocks.len(),
                            results.len()
                        );
                    }
                }
                Err(e) => warn!("Tokenizer unavailable, context budget not applied: {}", e),
            }
        }

        assemble(&blocks)
    }
}

fn render_block(result: &SearchResult) -> String {
    format!(
        "--- Entry Start ---\nType: {}\nName: {}\nContent:\n{}\n(Relevance Score: {:.2})\n--- Entry End ---\n",
        result.entry.entry_type, result.entry.name, result.entry.content, result.score
    )
}

fn assemble(blocks: &[String]) -> String {
    if blocks.is_empty() {
        return String::new();
    }
    let mut out = String::from(HEADER);
    for block in blocks {
        out.push('\n');
        out.push_str(block);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoreError;
    use crate::models::CodexEntry;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct CannedSearch {
        scores: Vec<(&'static str, f64)>,
        seen_limits: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl SemanticSearch for CannedSearch {
        async fn find_similar_entries(&self, _query: &str, limit: i64) -> Result<Vec<SearchResult>> {
            self.seen_limits.lock().unwrap().push(limit);
            let now = Utc::now().naive_utc();
            Ok(self
                .scores
                .iter()
                .enumerate()
                .map(|(i, (name, score))| SearchResult {
                    entry: CodexEntry {
                        id: i as i64 + 1,
                        name: name.to_string(),
                        entry_type: "Character".into(),
                        content: format!("About {name}."),
                        created_at: now,
                        updated_at: now,
                    },
                    score: *score,
                })
                .collect())
        }
    }

    struct BrokenSearch;

    #[async_trait]
    impl SemanticSearch for BrokenSearch {
        async fn find_similar_entries(&self, _query: &str, _limit: i64) -> Result<Vec<SearchResult>> {
            Err(LoreError::Provider("connection reset".into()))
        }
    }

    fn canned(scores: Vec<(&'static str, f64)>) -> Arc<CannedSearch> {
        Arc::new(CannedSearch {
            scores,
            seen_limits: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_defaults_and_ignored_setters() {
        let mut builder = ContextBuilder::new(Arc::new(BrokenSearch));
        assert_eq!(builder.max_entries(), 10);
        assert_eq!(builder.similarity_threshold(), 0.4);

        builder.set_similarity_threshold(1.5);
        builder.set_similarity_threshold(-0.1);
        builder.set_max_entries(0);
        assert_eq!(builder.similarity_threshold(), 0.4);
        assert_eq!(builder.max_entries(), 10);

        builder.set_similarity_threshold(1.0);
        builder.set_max_entries(3);
        assert_eq!(builder.similarity_threshold(), 1.0);
        assert_eq!(builder.max_entries(), 3);
    }

    #[tokio::test]
    async fn test_threshold_keeps_order_and_format() {
        let search = canned(vec![("Aria", 0.9), ("Bram", 0.6), ("Cole", 0.3)]);
        let mut builder = ContextBuilder::new(search.clone());
        builder.set_similarity_threshold(0.5);
        builder.set_max_entries(7);

        let context = builder.build_context_for_query("mage").await.unwrap();

        assert_eq!(*search.seen_limits.lock().unwrap(), vec![7]);
        assert_eq!(
            context,
            "RELEVANT CODEX ENTRIES (ordered by relevance):\n\
             \n\
             --- Entry Start ---\nType: Character\nName: Aria\nContent:\nAbout Aria.\n(Relevance Score: 0.90)\n--- Entry End ---\n\
             \n\
             --- Entry Start ---\nType: Character\nName: Bram\nContent:\nAbout Bram.\n(Relevance Score: 0.60)\n--- Entry End ---\n"
        );
        assert!(!context.contains("Cole"));
    }

    #[tokio::test]
    async fn test_score_equal_to_threshold_is_kept() {
        let mut builder = ContextBuilder::new(canned(vec![("Aria", 0.5)]));
        builder.set_similarity_threshold(0.5);
        let context = builder.build_context_for_query("q").await.unwrap();
        assert!(context.contains("Name: Aria"));
    }

    #[tokio::test]
    async fn test_search_failure_degrades_to_empty() {
        let builder = ContextBuilder::new(Arc::new(BrokenSearch));
        assert_eq!(builder.build_context_for_query("q").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_nothing_above_threshold_is_empty() {
        let builder = ContextBuilder::new(canned(vec![("Aria", 0.2), ("Bram", 0.1)]));
        assert_eq!(builder.build_context_for_query("q").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_token_budget_drops_lowest_ranked() {
        let search = canned(vec![("Aria", 0.9), ("Bram", 0.8), ("Cole", 0.7)]);
        let mut builder = ContextBuilder::new(search.clone());

        let full = builder.build_context_for_query("q").await.unwrap();
        let bpe = cl100k_base().unwrap();
        let full_tokens = bpe.encode_with_special_tokens(&full).len();

        builder.set_max_context_tokens(Some(full_tokens - 1));
        let trimmed = builder.build_context_for_query("q").await.unwrap();
        assert!(trimmed.contains("Name: Aria"));
        assert!(trimmed.contains("Name: Bram"));
        assert!(!trimmed.contains("Name: Cole"));

        builder.set_max_context_tokens(Some(1));
        assert_eq!(builder.build_context_for_query("q").await.unwrap(), "");
    }
}
