//! # Errors
//!
//! One error enum for the whole library. The first five variants form the
//! retrieval taxonomy every caller reasons about:
//!
//! | Variant | Meaning |
//! |---|---|
//! | [`LoreError::Configuration`] | no provider/service configured |
//! | [`LoreError::Provider`] | a remote or local model call failed (transport, auth, rate limit, timeout, malformed body) |
//! | [`LoreError::CorruptData`] | a stored vector has an invalid byte length |
//! | [`LoreError::NotFound`] | the requested row does not exist |
//! | [`LoreError::InvalidInput`] | empty vector on save, empty text, empty name |
//!
//! The remaining variants wrap lower-level crates so `?` works at every layer.
//! The CLI converts everything into `Box<dyn Error>` at the edge.

use thiserror::Error;

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, LoreError>;

#[derive(Debug, Error)]
pub enum LoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("background task failed: {0}")]
    TaskFailed(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat completion error: {0}")]
    Completion(#[from] async_openai::error::OpenAIError),
}

impl LoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoreError::NotFound(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, LoreError::Configuration(_))
    }

    /// `true` for failures that originate in a model call, including raw
    /// transport errors that were not already mapped to [`LoreError::Provider`].
    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            LoreError::Provider(_) | LoreError::Http(_) | LoreError::Completion(_)
        )
    }
}
