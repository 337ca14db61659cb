//! # Entry store
//!
//! CRUD over `codex_entries`. The retrieval pipeline only needs three things
//! from here: the canonical text of an entry, the list of entries that have no
//! embedding for a given model version, and cascade deletion (enforced by the
//! foreign key in [`crate::database::SCHEMA_SQL`]).
//!
//! Any write that changes an entry's text also deletes its embedding rows in
//! the same transaction, so an entry whose re-embed never happens shows up as
//! missing for the sweep instead of keeping a vector of its old text.

use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::{LoreError, Result};
use crate::models::{CodexEntry, NewEntryRow};
use crate::schema::{codex_embeddings, codex_entries};

/// Build the exact text that represents an entry for embedding.
///
/// Name, type and content joined by newlines. Changing any of the three
/// changes the text and therefore invalidates the stored vector.
pub fn canonical_text(name: &str, entry_type: &str, content: &str) -> String {
    format!("{name}\n{entry_type}\n{content}")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub name: String,
    pub entry_type: String,
    pub content: String,
}

impl NewEntry {
    pub fn new(
        name: impl Into<String>,
        entry_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entry_type: entry_type.into(),
            content: content.into(),
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EntryUpdate {
    pub name: Option<String>,
    pub entry_type: Option<String>,
    pub content: Option<String>,
}

impl EntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.entry_type.is_none() && self.content.is_none()
    }
}

/// Minimal handle returned by the missing-embedding query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStub {
    pub id: i64,
    pub name: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = codex_entries)]
struct EntryChanges<'a> {
    name: Option<&'a str>,
    entry_type: Option<&'a str>,
    content: Option<&'a str>,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Clone)]
pub struct EntryStore {
    db: Database,
}

impl EntryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new entry.
    ///
    /// # Errors
    /// - [`LoreError::InvalidInput`] for an empty or blank name.
    /// - [`LoreError::Database`] when the name is already taken.
    pub fn create_entry(&self, entry: &NewEntry) -> Result<CodexEntry> {
        validate_name(&entry.name)?;
        let now = Utc::now().naive_utc();
        self.db.with_conn(|conn| {
            Ok(diesel::insert_into(codex_entries::table)
                .values(&NewEntryRow {
                    name: entry.name.trim(),
                    entry_type: &entry.entry_type,
                    content: &entry.content,
                    created_at: now,
                    updated_at: now,
                })
                .returning(CodexEntry::as_returning())
                .get_result(conn)?)
        })
    }

    /// Apply `update` to entry `id` and refresh its `updated_at`. When any
    /// field changes, the entry's embeddings are dropped.
    pub fn update_entry(&self, id: i64, update: &EntryUpdate) -> Result<CodexEntry> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        let changes = EntryChanges {
            name: update.name.as_deref().map(str::trim),
            entry_type: update.entry_type.as_deref(),
            content: update.content.as_deref(),
            updated_at: Utc::now().naive_utc(),
        };
        let text_changed = !update.is_empty();
        self.db.with_conn(|conn| {
            conn.transaction(|conn| {
                let row = diesel::update(codex_entries::table.find(id))
                    .set(&changes)
                    .returning(CodexEntry::as_returning())
                    .get_result(conn)
                    .optional()?
                    .ok_or_else(|| LoreError::NotFound(format!("entry {id}")))?;
                if text_changed {
                    drop_embeddings(conn, id)?;
                }
                Ok(row)
            })
        })
    }

    /// Delete entry `id`; its embeddings go with it.
    pub fn delete_entry(&self, id: i64) -> Result<()> {
        let deleted = self
            .db
            .with_conn(|conn| Ok(diesel::delete(codex_entries::table.find(id)).execute(conn)?))?;
        if deleted == 0 {
            return Err(LoreError::NotFound(format!("entry {id}")));
        }
        Ok(())
    }

    pub fn get_entry(&self, id: i64) -> Result<CodexEntry> {
        self.db.with_conn(|conn| {
            codex_entries::table
                .find(id)
                .select(CodexEntry::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| LoreError::NotFound(format!("entry {id}")))
        })
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<CodexEntry>> {
        self.db.with_conn(|conn| {
            Ok(codex_entries::table
                .filter(codex_entries::name.eq(name.trim()))
                .select(CodexEntry::as_select())
                .first(conn)
                .optional()?)
        })
    }

    pub fn list_entries(&self) -> Result<Vec<CodexEntry>> {
        self.db.with_conn(|conn| {
            Ok(codex_entries::table
                .order(codex_entries::name.asc())
                .select(CodexEntry::as_select())
                .load(conn)?)
        })
    }

    /// `(name, type, content)` of entry `id`.
    pub fn get_entry_text(&self, id: i64) -> Result<(String, String, String)> {
        self.db.with_conn(|conn| {
            codex_entries::table
                .find(id)
                .select((
                    codex_entries::name,
                    codex_entries::entry_type,
                    codex_entries::content,
                ))
                .first::<(String, String, String)>(conn)
                .optional()?
                .ok_or_else(|| LoreError::NotFound(format!("entry {id}")))
        })
    }

    /// Entries that have no embedding row under `version`, oldest first.
    pub fn list_entries_missing_embedding(&self, version: &str) -> Result<Vec<EntryStub>> {
        self.db.with_conn(|conn| {
            let rows = codex_entries::table
                .left_join(
                    codex_embeddings::table.on(codex_embeddings::entry_id
                        .eq(codex_entries::id)
                        .and(codex_embeddings::model_version.eq(version))),
                )
                .filter(codex_embeddings::id.is_null())
                .order(codex_entries::id.asc())
                .select((codex_entries::id, codex_entries::name))
                .load::<(i64, String)>(conn)?;
            Ok(rows
                .into_iter()
                .map(|(id, name)| EntryStub { id, name })
                .collect())
        })
    }

    /// Create the entry, or overwrite type and content of the entry that
    /// already has this name. Returns the row and whether it was created.
    pub fn upsert_entry_by_name(&self, entry: &NewEntry) -> Result<(CodexEntry, bool)> {
        validate_name(&entry.name)?;
        let now = Utc::now().naive_utc();
        self.db.with_conn(|conn| {
            conn.transaction(|conn| {
                let existing: Option<i64> = codex_entries::table
                    .filter(codex_entries::name.eq(entry.name.trim()))
                    .select(codex_entries::id)
                    .first(conn)
                    .optional()?;

                match existing {
                    Some(id) => {
                        let row = diesel::update(codex_entries::table.find(id))
                            .set((
                                codex_entries::entry_type.eq(&entry.entry_type),
                                codex_entries::content.eq(&entry.content),
                                codex_entries::updated_at.eq(now),
                            ))
                            .returning(CodexEntry::as_returning())
                            .get_result(conn)?;
                        drop_embeddings(conn, id)?;
                        Ok((row, false))
                    }
                    None => {
                        let row = diesel::insert_into(codex_entries::table)
                            .values(&NewEntryRow {
                                name: entry.name.trim(),
                                entry_type: &entry.entry_type,
                                content: &entry.content,
                                created_at: now,
                                updated_at: now,
                            })
                            .returning(CodexEntry::as_returning())
                            .get_result(conn)?;
                        Ok((row, true))
                    }
                }
            })
        })
    }
}

fn drop_embeddings(conn: &mut SqliteConnection, entry_id: i64) -> Result<usize> {
    let dropped = diesel::delete(
        codex_embeddings::table.filter(codex_embeddings::entry_id.eq(entry_id)),
    )
    .execute(conn)?;
    if dropped > 0 {
        tracing::debug!("Dropped {} stale embeddings of entry {}", dropped, entry_id);
    }
    Ok(dropped)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LoreError::InvalidInput("entry name must not be empty".into()));
    }
    Ok(())
}
