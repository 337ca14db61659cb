//! # Vault session
//!
//! One [`VaultSession`] per opened vault. It wires the entry store, the
//! embedding service, the background worker and the context builder together
//! and is the only thing the CLI talks to.
//!
//! Entry writes commit first and then hand the entry's canonical text to the
//! worker. The write itself never waits on, or fails because of, embedding.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::LoreConfig;
use crate::context::ContextBuilder;
use crate::database::Database;
use crate::embedding_store::{EmbeddingRecord, EmbeddingService};
use crate::entries::{EntryStore, EntryUpdate, NewEntry};
use crate::error::Result;
use crate::extraction::extract_entries;
use crate::generation::TextGenerator;
use crate::models::CodexEntry;
use crate::provider::{EmbeddingProvider, build_provider};
use crate::search::{SearchResult, SemanticSearch, SimilaritySearch};
use crate::sweep::{SweepReport, generate_missing_embeddings};
use crate::tasks::{TaskHandle, spawn_named};
use crate::worker::{EmbeddingWorker, WorkerStatsSnapshot};

/// Handles for the work [`VaultSession::start_background`] kicks off.
pub struct BackgroundTasks {
    /// Number of vectors loaded into the cache.
    pub preload: TaskHandle<usize>,
    /// Absent when no provider is configured.
    pub sweep: Option<TaskHandle<SweepReport>>,
}

/// Outcome of [`VaultSession::import_narrative`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl ImportReport {
    /// Entries written, new or merged.
    pub fn saved(&self) -> usize {
        self.created + self.updated
    }
}

pub struct VaultSession {
    entries: EntryStore,
    service: Arc<EmbeddingService>,
    worker: EmbeddingWorker,
    search: Arc<SimilaritySearch>,
    context: Arc<ContextBuilder>,
    sweep_pacing: Duration,
}

impl VaultSession {
    /// Open the vault database named by `config` and build its provider.
    pub fn open(config: &LoreConfig) -> Result<Self> {
        let db = Database::open(&config.db_url)?;
        let provider = build_provider(&config.embedding)?;
        Ok(Self::with_provider(db, provider, config))
    }

    /// Assemble a session around an already-open database and provider.
    pub fn with_provider(
        db: Database,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        config: &LoreConfig,
    ) -> Self {
        let timeout = Duration::from_secs(config.embedding.timeout_secs.max(1));
        let service = Arc::new(EmbeddingService::new(db.clone(), provider, timeout));
        let worker = EmbeddingWorker::new(
            Arc::clone(&service),
            config.worker.queue_capacity,
            Duration::from_millis(config.worker.pacing_ms),
        );
        let search = Arc::new(SimilaritySearch::new(Arc::clone(&service)));
        let context = Arc::new(ContextBuilder::from_config(
            search.clone(),
            &config.context,
        ));

        Self {
            entries: EntryStore::new(db),
            service,
            worker,
            search,
            context,
            sweep_pacing: Duration::from_millis(config.worker.sweep_pacing_ms),
        }
    }

    pub fn entries(&self) -> &EntryStore {
        &self.entries
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.service
    }

    pub fn context_builder(&self) -> Arc<ContextBuilder> {
        Arc::clone(&self.context)
    }

    fn queue_embedding(&self, entry: &CodexEntry) {
        if !self.service.is_configured() {
            debug!("No embedding provider; not queueing entry {}", entry.id);
            return;
        }
        self.worker.ensure_started();
        self.worker.enqueue(entry.id, entry.canonical_text());
    }

    pub fn create_entry(&self, entry: &NewEntry) -> Result<CodexEntry> {
        let created = self.entries.create_entry(entry)?;
        info!("Created entry {} ({})", created.id, created.name);
        self.queue_embedding(&created);
        Ok(created)
    }

    /// Update an entry. Its old embeddings are dropped with the write, so
    /// if the re-embed never lands the sweep still finds it.
    pub async fn update_entry(&self, id: i64, update: &EntryUpdate) -> Result<CodexEntry> {
        let updated = self.entries.update_entry(id, update)?;
        self.service.invalidate(id).await;
        info!("Updated entry {} ({})", updated.id, updated.name);
        self.queue_embedding(&updated);
        Ok(updated)
    }

    /// Delete an entry; its embeddings go with it.
    pub async fn delete_entry(&self, id: i64) -> Result<()> {
        self.entries.delete_entry(id)?;
        self.service.invalidate(id).await;
        info!("Deleted entry {}", id);
        Ok(())
    }

    /// Create or overwrite the entry with this name. Returns whether it was
    /// newly created.
    pub async fn import_entry(&self, entry: &NewEntry) -> Result<(CodexEntry, bool)> {
        let (stored, created) = self.entries.upsert_entry_by_name(entry)?;
        if !created {
            self.service.invalidate(stored.id).await;
        }
        self.queue_embedding(&stored);
        Ok((stored, created))
    }

    /// Have `generator` pull entities out of `text` and merge them into the
    /// codex by name. Entries that fail to save are logged and counted.
    pub async fn import_narrative(
        &self,
        generator: &dyn TextGenerator,
        text: &str,
    ) -> Result<ImportReport> {
        let extracted = extract_entries(generator, text).await?;
        info!("Extracted {} entries from narrative", extracted.len());

        let mut report = ImportReport::default();
        for entry in &extracted {
            match self.import_entry(entry).await {
                Ok((_, true)) => report.created += 1,
                Ok((_, false)) => report.updated += 1,
                Err(e) => {
                    warn!("Failed to import extracted entry {}: {}", entry.name, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Ranked semantic search over the whole vault.
    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>> {
        self.search.find_similar_entries(query, limit).await
    }

    /// Context block for `query`; empty when nothing relevant is found.
    pub async fn build_context(&self, query: &str) -> Result<String> {
        self.context.build_context_for_query(query).await
    }

    pub fn embedding(&self, entry_id: i64) -> Result<EmbeddingRecord> {
        self.service.embedding_record(entry_id)
    }

    /// Run the missing-embedding sweep in the foreground.
    pub async fn reindex(
        &self,
        progress: Option<&mut (dyn FnMut(&SweepReport) + Send)>,
    ) -> Result<SweepReport> {
        generate_missing_embeddings(&self.service, &self.entries, self.sweep_pacing, progress)
            .await
    }

    /// Preload the cache and, with a provider, start the sweep. Neither blocks
    /// the caller.
    pub fn start_background(&self) -> BackgroundTasks {
        let service = Arc::clone(&self.service);
        let preload = spawn_named("cache-preload", async move {
            service.load_embeddings_into_cache().await
        });

        let sweep = self.service.is_configured().then(|| {
            let service = Arc::clone(&self.service);
            let entries = self.entries.clone();
            let pacing = self.sweep_pacing;
            spawn_named("missing-embedding-sweep", async move {
                generate_missing_embeddings(&service, &entries, pacing, None).await
            })
        });

        BackgroundTasks { preload, sweep }
    }

    pub fn worker_stats(&self) -> WorkerStatsSnapshot {
        self.worker.stats()
    }

    /// Give queued embeddings up to `timeout` to finish.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.worker.wait_for_idle(timeout).await
    }
}
