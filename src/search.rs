//! # Similarity search
//!
//! Brute-force nearest neighbours over the vault: embed the query, scan every
//! entry left-joined with its current-version embedding, score each vector by
//! cosine similarity and rank. A personal codex holds hundreds to a few
//! thousand entries, so a linear scan (parallelised with `rayon` on the blocking
//! pool) is the whole index.
//!
//! Entries without an embedding are skipped rather than scored as zero, and a
//! row with a corrupt payload is skipped with a warning.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::codec::decode_vector;
use crate::embedding_store::EmbeddingService;
use crate::error::{LoreError, Result};
use crate::models::CodexEntry;
use crate::schema::{codex_embeddings, codex_entries};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub entry: CodexEntry,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f64,
}

/// Anything that can answer "which entries are closest to this text".
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Ranked matches for `query`, best first; `limit <= 0` means no limit.
    async fn find_similar_entries(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>>;
}

/// Cosine similarity of two vectors, accumulated in `f64` and clamped to `[-1, 1]`.
///
/// Mismatched or empty inputs and zero-norm vectors score `0.0` (with a
/// warning) instead of producing `NaN`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        warn!(
            "Cannot compare vectors of length {} and {}; scoring 0",
            a.len(),
            b.len()
        );
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        warn!("Zero-norm vector in cosine similarity; scoring 0");
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Sort best-first (NaN last, ties keep their order) and apply `limit`.
pub fn rank_results(results: &mut Vec<SearchResult>, limit: i64) {
    results.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
    });
    if limit > 0 {
        results.truncate(limit as usize);
    }
}

fn score_rows(rows: Vec<(CodexEntry, Option<Vec<u8>>)>, query: &[f32]) -> Vec<SearchResult> {
    rows.into_par_iter()
        .filter_map(|(entry, payload)| {
            let bytes = payload?;
            match decode_vector(&bytes) {
                Ok(vector) => Some(SearchResult {
                    score: cosine_similarity(query, &vector),
                    entry,
                }),
                Err(e) => {
                    warn!("Skipping entry {} in search: {}", entry.id, e);
                    None
                }
            }
        })
        .collect()
}

/// Linear-scan search backed by an [`EmbeddingService`].
#[derive(Clone)]
pub struct SimilaritySearch {
    service: Arc<EmbeddingService>,
}

impl SimilaritySearch {
    pub fn new(service: Arc<EmbeddingService>) -> Self {
        Self { service }
    }

    /// Every entry with its current-version payload, if any, in id order.
    fn scan(&self, version: &str) -> Result<Vec<(CodexEntry, Option<Vec<u8>>)>> {
        self.service.database().with_conn(|conn| {
            Ok(codex_entries::table
                .left_join(
                    codex_embeddings::table.on(codex_embeddings::entry_id
                        .eq(codex_entries::id)
                        .and(codex_embeddings::model_version.eq(version))),
                )
                .order(codex_entries::id.asc())
                .select((CodexEntry::as_select(), codex_embeddings::vector.nullable()))
                .load(conn)?)
        })
    }
}

#[async_trait]
impl SemanticSearch for SimilaritySearch {
    async fn find_similar_entries(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>> {
        if !self.service.is_configured() {
            return Err(LoreError::Configuration(
                "semantic search needs an embedding provider".into(),
            ));
        }

        let query_vector = self.service.create_embedding(query).await?;

        // The scan and the scoring are blocking work; keep them off the runtime.
        let search = self.clone();
        let (mut results, scanned) = tokio::task::spawn_blocking(move || {
            let rows = search.scan(search.service.model_identifier())?;
            let scanned = rows.len();
            Ok::<_, LoreError>((score_rows(rows, &query_vector), scanned))
        })
        .await
        .map_err(|e| LoreError::TaskFailed(format!("similarity scan: {e}")))??;

        debug!(
            "Scored {} of {} entries for query ({} chars)",
            results.len(),
            scanned,
            query.len()
        );
        rank_results(&mut results, limit);
        Ok(results)
    }
}
