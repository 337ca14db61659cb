//! This module provides loading and handling of the vault configuration.
//!
//! It defines [`LoreConfig`], which groups the database location, the
//! embedding provider selection, generation settings, retrieval tunables and
//! worker pacing, plus [`load_config`] to read it from YAML and
//! [`establish_connection`] to open the SQLite database it points at.
//!
//! Every section has serde defaults, so a config file only needs the keys it
//! wants to change.
//!
//! # Examples
//!
//! ```no_run
//! use loreweave::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config.embedding.provider);
//! ```

use std::fs;
use std::path::Path;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Which embedding backend a vault uses.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Openai,
    Gemini,
    Local,
    /// Semantic features are switched off; entries still work.
    None,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,

    /// Key for remote providers. Ignored by `local` and `none`.
    pub api_key: String,

    /// Override for the provider's base URL (OpenAI-compatible servers, proxies).
    pub api_base: Option<String>,

    /// Model name; each provider has its own default.
    pub model: Option<String>,

    /// Upper bound on a single embedding call.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Openai,
            api_key: String::new(),
            api_base: None,
            model: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the OpenAI-compatible chat endpoint.
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    /// Prompt template name under `<config_dir>/templates/`.
    pub template: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            template: "codex_question".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    pub max_entries: i64,
    pub similarity_threshold: f64,
    /// Optional cl100k token budget for the rendered context block.
    pub max_context_tokens: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_entries: 10,
            similarity_threshold: 0.4,
            max_context_tokens: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    /// Pause after each queued item.
    pub pacing_ms: u64,
    /// Pause between items of the missing-embedding sweep.
    pub sweep_pacing_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            pacing_ms: 100,
            sweep_pacing_ms: 500,
        }
    }
}

/// Represents the vault configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoreConfig {
    /// SQLite database path (or `:memory:`).
    pub db_url: String,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub context: ContextConfig,
    pub worker: WorkerConfig,
}

impl Default for LoreConfig {
    fn default() -> Self {
        Self {
            db_url: "loreweave.db".to_string(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            context: ContextConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Loads the vault configuration from a YAML file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(LoreConfig)`: The loaded configuration, defaults filled in.
/// - `Err(LoreError)`: The file could not be read or is not valid YAML for this shape.
pub fn load_config(file: impl AsRef<Path>) -> Result<LoreConfig> {
    let file = file.as_ref();
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: LoreConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Serialise `config` as YAML to `file`, creating parent directories.
pub fn save_config(config: &LoreConfig, file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(file, serde_yaml::to_string(config)?)?;
    Ok(())
}

pub fn establish_connection(db_url: &str) -> Result<SqliteConnection> {
    Ok(SqliteConnection::establish(db_url)?)
}
