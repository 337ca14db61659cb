//! # Database models
//!
//! Row types that map to the vault's SQLite schema via **Diesel**.
//!
//! - [`CodexEntry`]: one worldbuilding entry (character, place, item, lore...).
//! - [`EmbeddingRow`]: one stored vector for an entry under one model version.
//!
//! Insert-side structs ([`NewEntryRow`], [`NewEmbeddingRow`]) borrow their
//! payloads so callers never clone large content strings just to insert them.
//!
//! ## Basic usage
//!
//! ```no_run
//! use diesel::prelude::*;
//! use loreweave::schema::codex_entries;
//! use loreweave::models::{CodexEntry, NewEntryRow};
//!
//! # fn demo(conn: &mut SqliteConnection) -> Result<(), Box<dyn std::error::Error>> {
//! let now = chrono::Utc::now().naive_utc();
//! let entry: CodexEntry = diesel::insert_into(codex_entries::table)
//!     .values(&NewEntryRow {
//!         name: "Aria",
//!         entry_type: "Character",
//!         content: "A wandering mage.",
//!         created_at: now,
//!         updated_at: now,
//!     })
//!     .returning(CodexEntry::as_returning())
//!     .get_result(conn)?;
//! # Ok(()) }
//! ```
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// A codex entry.
///
/// The triple `(name, entry_type, content)` is the entry's canonical text; any
/// change to one of them invalidates the stored embedding.
///
/// ### Table
/// - `codex_entries` (`name` is `UNIQUE`)
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::codex_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CodexEntry {
    pub id: i64,
    pub name: String,
    pub entry_type: String,
    pub content: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CodexEntry {
    /// The text the embedding pipeline feeds to the provider for this entry.
    pub fn canonical_text(&self) -> String {
        crate::entries::canonical_text(&self.name, &self.entry_type, &self.content)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::codex_entries)]
pub struct NewEntryRow<'a> {
    pub name: &'a str,
    pub entry_type: &'a str,
    pub content: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A stored embedding.
///
/// ### Table
/// - `codex_embeddings`, `UNIQUE(entry_id, model_version)`, cascades on entry delete
///
/// ### Notes
/// - `vector` is the raw codec payload (see [`crate::codec`]); it is decoded on
///   demand so a single corrupt row can be skipped without failing a scan.
/// - `created_at` survives re-saves; `updated_at` moves on every save.
#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone, PartialEq)]
#[diesel(belongs_to(CodexEntry, foreign_key = entry_id))]
#[diesel(table_name = crate::schema::codex_embeddings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EmbeddingRow {
    pub id: i64,
    pub entry_id: i64,
    pub vector: Vec<u8>,
    pub model_version: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::codex_embeddings)]
pub struct NewEmbeddingRow<'a> {
    pub entry_id: i64,
    pub vector: &'a [u8],
    pub model_version: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
