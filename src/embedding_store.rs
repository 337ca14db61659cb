//! # Embedding store
//!
//! [`EmbeddingService`] owns the configured provider, the `codex_embeddings`
//! table and an in-memory read cache of decoded vectors.
//!
//! ## Responsibilities
//! - **Embedding**: delegate to the provider under a bounded timeout.
//! - **Persistence**: one row per `(entry_id, model_version)`; re-saving
//!   replaces the vector and `updated_at` and keeps the original `created_at`.
//! - **Caching**: `entry_id -> vector` behind a `tokio::sync::RwLock`. Saves
//!   update the cache only after the row is written; a bulk preload replaces the
//!   whole map in one swap.
//!
//! The service has a single model version for its lifetime (the provider's
//! identifier), so the cache is keyed by entry id alone.
//!
//! ## Quick Example
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use loreweave::{config::EmbeddingConfig, database::Database, embedding_store::EmbeddingService};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open("vault.db")?;
//! let provider = loreweave::provider::build_provider(&EmbeddingConfig::default())?;
//! let service = EmbeddingService::new(db, provider, Duration::from_secs(30));
//! let v = service.create_embedding("Aria\nCharacter\nA wandering mage.").await?;
//! service.save_embedding(1, &v).await?;
//! assert_eq!(service.get_embedding(1).await?, v);
//! # Ok(()) }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::codec::{decode_vector, encode_vector};
use crate::database::Database;
use crate::error::{LoreError, Result};
use crate::models::{EmbeddingRow, NewEmbeddingRow};
use crate::provider::EmbeddingProvider;
use crate::schema::codex_embeddings;

/// Decoded view of one stored embedding, for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub entry_id: i64,
    pub model_version: String,
    pub vector: Vec<f32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl EmbeddingRecord {
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

pub struct EmbeddingService {
    db: Database,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    model_version: String,
    cache: RwLock<HashMap<i64, Vec<f32>>>,
    timeout: Duration,
}

impl EmbeddingService {
    /// Wrap `provider` (or its absence) around the vault database.
    ///
    /// `timeout` bounds every provider call made through
    /// [`create_embedding`](Self::create_embedding).
    pub fn new(
        db: Database,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        timeout: Duration,
    ) -> Self {
        let model_version = provider
            .as_ref()
            .map(|p| p.model_identifier())
            .unwrap_or_default();
        Self {
            db,
            provider,
            model_version,
            cache: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Version tag of the configured provider, empty when none is configured.
    pub fn model_identifier(&self) -> &str {
        &self.model_version
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn require_version(&self) -> Result<&str> {
        if self.provider.is_none() {
            return Err(LoreError::Configuration(
                "no embedding provider configured".into(),
            ));
        }
        Ok(&self.model_version)
    }

    /// Embed `text` with the configured provider.
    ///
    /// # Errors
    /// - [`LoreError::Configuration`] without a provider.
    /// - [`LoreError::Provider`] on any provider failure, including the timeout.
    pub async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            LoreError::Configuration("no embedding provider configured".into())
        })?;

        match tokio::time::timeout(self.timeout, provider.create_embedding(text)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e @ LoreError::InvalidInput(_))) => Err(e),
            Ok(Err(LoreError::Provider(message))) => Err(LoreError::Provider(message)),
            Ok(Err(other)) => Err(LoreError::Provider(other.to_string())),
            Err(_) => Err(LoreError::Provider(format!(
                "{} timed out after {:?}",
                self.model_version, self.timeout
            ))),
        }
    }

    /// Upsert the vector for `entry_id` under the current model version.
    ///
    /// The cache is only touched after the row is persisted.
    ///
    /// # Errors
    /// - [`LoreError::InvalidInput`] for an empty vector.
    /// - [`LoreError::Configuration`] without a provider (no version to file it under).
    /// - [`LoreError::Database`], e.g. when the entry no longer exists.
    pub async fn save_embedding(&self, entry_id: i64, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(LoreError::InvalidInput(format!(
                "refusing to save an empty vector for entry {entry_id}"
            )));
        }
        let version = self.require_version()?;
        let bytes = encode_vector(vector);
        let now = Utc::now().naive_utc();

        self.db.with_conn(|conn| {
            diesel::insert_into(codex_embeddings::table)
                .values(&NewEmbeddingRow {
                    entry_id,
                    vector: &bytes,
                    model_version: version,
                    created_at: now,
                    updated_at: now,
                })
                .on_conflict((codex_embeddings::entry_id, codex_embeddings::model_version))
                .do_update()
                .set((
                    codex_embeddings::vector.eq(excluded(codex_embeddings::vector)),
                    codex_embeddings::updated_at.eq(excluded(codex_embeddings::updated_at)),
                ))
                .execute(conn)?;
            Ok(())
        })?;

        self.cache.write().await.insert(entry_id, vector.to_vec());
        debug!("Saved {}-dim embedding for entry {}", vector.len(), entry_id);
        Ok(())
    }

    /// Current-version vector for `entry_id`, from cache or storage.
    ///
    /// # Errors
    /// [`LoreError::NotFound`] when the entry has no current-version row,
    /// [`LoreError::CorruptData`] when the stored payload is malformed.
    pub async fn get_embedding(&self, entry_id: i64) -> Result<Vec<f32>> {
        if let Some(vector) = self.cache.read().await.get(&entry_id) {
            return Ok(vector.clone());
        }

        let version = self.require_version()?;
        let bytes: Vec<u8> = self.db.with_conn(|conn| {
            codex_embeddings::table
                .filter(codex_embeddings::entry_id.eq(entry_id))
                .filter(codex_embeddings::model_version.eq(version))
                .select(codex_embeddings::vector)
                .first(conn)
                .optional()?
                .ok_or_else(|| {
                    LoreError::NotFound(format!("embedding for entry {entry_id} under {version}"))
                })
        })?;

        let vector = decode_vector(&bytes)?;
        self.cache.write().await.insert(entry_id, vector.clone());
        Ok(vector)
    }

    /// Replace the cache with every current-version embedding in storage.
    ///
    /// Corrupt rows are skipped with a warning. Returns the number of vectors
    /// now cached. Without a provider this is a no-op.
    ///
    /// The cache write lock is held from before the read until the swap, so a
    /// save or invalidation that lands meanwhile is applied after the swap
    /// instead of being overwritten by it.
    pub async fn load_embeddings_into_cache(&self) -> Result<usize> {
        if !self.is_configured() {
            info!("No embedding provider configured; skipping cache preload");
            return Ok(0);
        }
        let version = self.model_version.as_str();
        let mut cache = self.cache.write().await;
        let rows: Vec<(i64, Vec<u8>)> = self.db.with_conn(|conn| {
            Ok(codex_embeddings::table
                .filter(codex_embeddings::model_version.eq(version))
                .select((codex_embeddings::entry_id, codex_embeddings::vector))
                .load(conn)?)
        })?;

        let mut fresh = HashMap::with_capacity(rows.len());
        for (entry_id, bytes) in rows {
            match decode_vector(&bytes) {
                Ok(vector) => {
                    fresh.insert(entry_id, vector);
                }
                Err(e) => warn!("Skipping embedding for entry {}: {}", entry_id, e),
            }
        }

        let loaded = fresh.len();
        *cache = fresh;
        drop(cache);
        info!("Loaded {} embeddings into cache for {}", loaded, version);
        Ok(loaded)
    }

    /// Full stored record for `entry_id` under the current version.
    pub fn embedding_record(&self, entry_id: i64) -> Result<EmbeddingRecord> {
        let version = self.require_version()?;
        let row: EmbeddingRow = self.db.with_conn(|conn| {
            codex_embeddings::table
                .filter(codex_embeddings::entry_id.eq(entry_id))
                .filter(codex_embeddings::model_version.eq(version))
                .select(EmbeddingRow::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| {
                    LoreError::NotFound(format!("embedding for entry {entry_id} under {version}"))
                })
        })?;

        Ok(EmbeddingRecord {
            entry_id: row.entry_id,
            vector: decode_vector(&row.vector)?,
            model_version: row.model_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Every model version that holds an embedding for `entry_id`.
    pub fn list_model_versions(&self, entry_id: i64) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            Ok(codex_embeddings::table
                .filter(codex_embeddings::entry_id.eq(entry_id))
                .order(codex_embeddings::model_version.asc())
                .select(codex_embeddings::model_version)
                .load(conn)?)
        })
    }

    /// Drop the cached vector for `entry_id`.
    pub async fn invalidate(&self, entry_id: i64) {
        self.cache.write().await.remove(&entry_id);
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::{EntryStore, NewEntry};
    use crate::testing::{FailingProvider, KeywordProvider, SlowProvider, service_with, setup};

    fn vault() -> (Database, EntryStore) {
        let db = Database::in_memory().unwrap();
        (db.clone(), EntryStore::new(db))
    }

    fn write_raw(db: &Database, entry_id: i64, version: &str, bytes: &[u8]) {
        let now = Utc::now().naive_utc();
        db.with_conn(|conn| {
            diesel::insert_into(codex_embeddings::table)
                .values(&NewEmbeddingRow {
                    entry_id,
                    vector: bytes,
                    model_version: version,
                    created_at: now,
                    updated_at: now,
                })
                .execute(conn)?;
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_preserves_created_at() {
        setup();
        let (db, entries) = vault();
        let entry = entries.create_entry(&NewEntry::new("Aria", "Character", "mage")).unwrap();
        let service = service_with(&db, Arc::new(KeywordProvider::new()));

        service.save_embedding(entry.id, &[1.0, 0.0]).await.unwrap();
        let first = service.embedding_record(entry.id).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        service.save_embedding(entry.id, &[0.0, 1.0]).await.unwrap();
        let second = service.embedding_record(entry.id).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.vector, vec![0.0, 1.0]);
        assert_eq!(service.list_model_versions(entry.id).unwrap(), vec!["test:keywords"]);
        assert_eq!(service.get_embedding(entry.id).await.unwrap(), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_save_rejects_empty_vector() {
        let (db, _) = vault();
        let service = service_with(&db, Arc::new(KeywordProvider::new()));
        let err = service.save_embedding(1, &[]).await.unwrap_err();
        assert!(matches!(err, LoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_cache_untouched() {
        let (db, _) = vault();
        let service = service_with(&db, Arc::new(KeywordProvider::new()));

        // No entry 99, so the foreign key rejects the row.
        assert!(service.save_embedding(99, &[1.0]).await.is_err());
        assert_eq!(service.cache_len().await, 0);
    }

    #[tokio::test]
    async fn test_get_embedding_not_found_and_cache_fill() {
        let (db, entries) = vault();
        let entry = entries.create_entry(&NewEntry::new("Vel", "Place", "A city.")).unwrap();
        let service = service_with(&db, Arc::new(KeywordProvider::new()));

        assert!(service.get_embedding(entry.id).await.unwrap_err().is_not_found());

        write_raw(&db, entry.id, "test:keywords", &encode_vector(&[0.5, 0.5]));
        assert_eq!(service.get_embedding(entry.id).await.unwrap(), vec![0.5, 0.5]);
        assert_eq!(service.cache_len().await, 1);
    }

    #[tokio::test]
    async fn test_other_versions_are_invisible() {
        let (db, entries) = vault();
        let entry = entries.create_entry(&NewEntry::new("Vel", "Place", "A city.")).unwrap();
        write_raw(&db, entry.id, "openai:old-model", &encode_vector(&[1.0]));
        let service = service_with(&db, Arc::new(KeywordProvider::new()));

        assert!(service.get_embedding(entry.id).await.unwrap_err().is_not_found());
        assert_eq!(service.load_embeddings_into_cache().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_preload_replaces_cache_and_skips_corrupt_rows() {
        setup();
        let (db, entries) = vault();
        let a = entries.create_entry(&NewEntry::new("A", "t", "a")).unwrap();
        let b = entries.create_entry(&NewEntry::new("B", "t", "b")).unwrap();
        let c = entries.create_entry(&NewEntry::new("C", "t", "c")).unwrap();
        let service = service_with(&db, Arc::new(KeywordProvider::new()));

        write_raw(&db, a.id, "test:keywords", &encode_vector(&[1.0, 2.0]));
        write_raw(&db, b.id, "test:keywords", &[0, 0, 128]);
        service.save_embedding(c.id, &[3.0]).await.unwrap();

        // A stale line that storage no longer backs must not survive the swap.
        service.cache.write().await.insert(4242, vec![9.0]);

        assert_eq!(service.load_embeddings_into_cache().await.unwrap(), 2);
        let cache = service.cache.read().await;
        assert_eq!(cache.get(&a.id), Some(&vec![1.0, 2.0]));
        assert_eq!(cache.get(&c.id), Some(&vec![3.0]));
        assert!(!cache.contains_key(&b.id));
        assert!(!cache.contains_key(&4242));
    }

    #[tokio::test]
    async fn test_preload_reads_storage_under_the_cache_lock() {
        setup();
        let (db, entries) = vault();
        let a = entries.create_entry(&NewEntry::new("A", "t", "a")).unwrap();
        let service = service_with(&db, Arc::new(KeywordProvider::new()));
        service.save_embedding(a.id, &[1.0]).await.unwrap();

        // Park the preload behind a reader.
        let reader = service.cache.read().await;
        let preload = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.load_embeddings_into_cache().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A write the preload has not read yet, with no cache update of its own.
        db.with_conn(|conn| {
            diesel::update(codex_embeddings::table.filter(codex_embeddings::entry_id.eq(a.id)))
                .set(codex_embeddings::vector.eq(encode_vector(&[2.0])))
                .execute(conn)?;
            Ok(())
        })
        .unwrap();
        drop(reader);

        assert_eq!(preload.await.unwrap().unwrap(), 1);
        assert_eq!(service.get_embedding(a.id).await.unwrap(), vec![2.0]);
    }

    #[tokio::test]
    async fn test_corrupt_row_surfaces_on_direct_read() {
        let (db, entries) = vault();
        let entry = entries.create_entry(&NewEntry::new("A", "t", "a")).unwrap();
        write_raw(&db, entry.id, "test:keywords", &[1, 2, 3, 4, 5]);
        let service = service_with(&db, Arc::new(KeywordProvider::new()));

        let err = service.get_embedding(entry.id).await.unwrap_err();
        assert!(matches!(err, LoreError::CorruptData(_)));
        assert!(matches!(
            service.embedding_record(entry.id).unwrap_err(),
            LoreError::CorruptData(_)
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_service() {
        let (db, _) = vault();
        let service = EmbeddingService::new(db, None, Duration::from_secs(1));
        assert!(!service.is_configured());
        assert_eq!(service.model_identifier(), "");
        assert!(service.create_embedding("x").await.unwrap_err().is_configuration());
        assert!(service.save_embedding(1, &[1.0]).await.unwrap_err().is_configuration());
        assert_eq!(service.load_embeddings_into_cache().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provider_failures_and_timeouts_are_provider_errors() {
        let (db, _) = vault();
        let failing = service_with(&db, Arc::new(FailingProvider));
        assert!(matches!(
            failing.create_embedding("x").await.unwrap_err(),
            LoreError::Provider(_)
        ));

        let slow = EmbeddingService::new(
            db,
            Some(Arc::new(SlowProvider(Duration::from_millis(500)))),
            Duration::from_millis(20),
        );
        match slow.create_embedding("x").await.unwrap_err() {
            LoreError::Provider(message) => assert!(message.contains("timed out"), "{message}"),
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
