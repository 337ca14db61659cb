//! # Loreweave (library root)
//!
//! Semantic retrieval for a worldbuilding codex. Entries live in SQLite; each
//! one gets an embedding from a configurable provider, written in the
//! background so entry edits never wait on the network. Queries are embedded
//! the same way and ranked by cosine similarity, and the best matches become a
//! context block for a text generator.
//!
//! ## Layout
//! - Storage: [`database`], [`schema`], [`models`], [`entries`], [`codec`].
//! - Embeddings: [`provider`], [`embedding_store`], [`worker`], [`sweep`], [`tasks`].
//! - Retrieval: [`search`], [`context`], [`generation`], [`template`], [`extraction`].
//! - Front end: [`session`], [`commands`], [`display`], [`config`].
//!
//! ## Configuration directory
//! [`config_dir`] resolves the per-platform directory that holds
//! `config.yaml` and `templates/`:
//!
//! - macOS: `~/Library/Application Support/com.loreweave.lw`
//! - Linux (XDG): `~/.config/lw`
//! - Windows: `C:\Users\<you>\AppData\Roaming\loreweave\lw\config`

use std::path::PathBuf;

use directories::ProjectDirs;

pub mod codec;
pub mod commands;
pub mod config;
pub mod context;
pub mod database;
pub mod display;
pub mod embedding_store;
pub mod entries;
pub mod error;
pub mod extraction;
pub mod generation;
pub mod models;
pub mod provider;
pub mod schema;
pub mod search;
pub mod session;
pub mod sweep;
pub mod tasks;
pub mod template;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{LoreError, Result};

/// Return the per-platform configuration directory used by `lw`.
///
/// The directory is **not** created here; `lw init` does that.
///
/// # Errors
/// [`LoreError::Configuration`] if the platform has no home directory to
/// derive it from.
pub fn config_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "loreweave", "lw").ok_or_else(|| {
        LoreError::Configuration("unable to determine config directory".into())
    })?;
    Ok(dirs.config_dir().to_path_buf())
}
