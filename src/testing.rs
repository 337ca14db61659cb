//! Deterministic providers shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::database::Database;
use crate::embedding_store::EmbeddingService;
use crate::error::{LoreError, Result};
use crate::provider::EmbeddingProvider;

const CONCEPTS: &[&[&str]] = &[
    &["mage", "sorcerer", "wizard", "magic", "spell"],
    &["wandering", "traveling", "travelling", "roaming", "wanderer"],
    &["city", "town", "capital", "village"],
    &["sword", "blade", "weapon"],
    &["dragon", "wyrm", "beast"],
    &["king", "queen", "ruler", "throne"],
];

/// Maps words onto concept buckets, so synonyms land on the same axis.
pub struct KeywordProvider {
    pub calls: AtomicUsize,
}

impl KeywordProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(LoreError::InvalidInput("empty".into()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; CONCEPTS.len()];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            for (axis, words) in CONCEPTS.iter().enumerate() {
                if words.contains(&word) {
                    vector[axis] += 1.0;
                }
            }
        }
        Ok(vector)
    }

    fn model_identifier(&self) -> String {
        "test:keywords".into()
    }
}

/// Returns a preset vector per exact input text.
pub struct FixedProvider {
    vectors: HashMap<String, Vec<f32>>,
    tag: String,
}

impl FixedProvider {
    pub fn new(tag: &str, pairs: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: pairs
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            tag: tag.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| LoreError::Provider(format!("no fixed vector for {text:?}")))
    }

    fn model_identifier(&self) -> String {
        self.tag.clone()
    }
}

/// Always fails.
pub struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    async fn create_embedding(&self, _text: &str) -> Result<Vec<f32>> {
        Err(LoreError::Provider("upstream unavailable".into()))
    }

    fn model_identifier(&self) -> String {
        "test:failing".into()
    }
}

/// Sleeps before answering.
pub struct SlowProvider(pub Duration);

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn create_embedding(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.0).await;
        Ok(vec![1.0, 0.0])
    }

    fn model_identifier(&self) -> String {
        "test:slow".into()
    }
}

pub fn service_with(db: &Database, provider: Arc<dyn EmbeddingProvider>) -> Arc<EmbeddingService> {
    Arc::new(EmbeddingService::new(
        db.clone(),
        Some(provider),
        Duration::from_secs(5),
    ))
}

pub fn setup() {
    let _ = tracing_subscriber::fmt::try_init();
}
