//! # Missing-embedding sweep
//!
//! Catch-up for entries that have no embedding under the current model
//! version: entries written before a provider was configured, everything after
//! a model change, and items the worker queue dropped under backpressure.
//!
//! The sweep is idempotent and sequential, pausing between items. It reads the
//! entry text fresh for every item, so an entry deleted after enumeration is
//! simply skipped.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::embedding_store::EmbeddingService;
use crate::entries::{EntryStore, canonical_text};
use crate::error::{LoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Entries found missing at the start.
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    /// Entries that disappeared before they could be embedded.
    pub skipped: usize,
}

impl SweepReport {
    pub fn done(&self) -> usize {
        self.processed + self.failed + self.skipped
    }
}

/// Embed every entry lacking a current-version row.
///
/// `progress` is called after each item with the running report.
///
/// # Errors
/// [`LoreError::Configuration`] without a provider, and storage errors while
/// enumerating. Per-item failures are counted, not returned.
pub async fn generate_missing_embeddings(
    service: &EmbeddingService,
    entries: &EntryStore,
    pacing: Duration,
    mut progress: Option<&mut (dyn FnMut(&SweepReport) + Send)>,
) -> Result<SweepReport> {
    if !service.is_configured() {
        return Err(LoreError::Configuration(
            "cannot generate embeddings without a provider".into(),
        ));
    }

    let version = service.model_identifier().to_string();
    let missing = entries.list_entries_missing_embedding(&version)?;
    let mut report = SweepReport {
        total: missing.len(),
        ..Default::default()
    };
    info!("{} entries missing {} embeddings", report.total, version);

    for (i, stub) in missing.iter().enumerate() {
        if i > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }

        match embed_one(service, entries, stub.id).await {
            Ok(()) => report.processed += 1,
            Err(e) if e.is_not_found() => {
                debug!("Entry {} ({}) vanished during sweep", stub.id, stub.name);
                report.skipped += 1;
            }
            Err(e) => {
                warn!("Sweep failed for entry {} ({}): {}", stub.id, stub.name, e);
                report.failed += 1;
            }
        }

        if let Some(callback) = progress.as_deref_mut() {
            callback(&report);
        }
    }

    info!(
        "Sweep finished: {} embedded, {} failed, {} skipped",
        report.processed, report.failed, report.skipped
    );
    Ok(report)
}

async fn embed_one(service: &EmbeddingService, entries: &EntryStore, id: i64) -> Result<()> {
    let (name, entry_type, content) = entries.get_entry_text(id)?;
    let vector = service
        .create_embedding(&canonical_text(&name, &entry_type, &content))
        .await?;

    match service.save_embedding(id, &vector).await {
        Ok(()) => Ok(()),
        // A foreign-key failure here means the entry was deleted mid-flight.
        Err(e) => match entries.get_entry(id) {
            Err(missing) if missing.is_not_found() => Err(missing),
            _ => Err(e),
        },
    }
}
