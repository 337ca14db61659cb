//! # Prompt templates
//!
//! A template is a small YAML document that shapes the question sent to the
//! text generator:
//!
//! - `system_prompt` steers the model,
//! - optional `pre_user_message_content` / `post_user_message_content` wrap the
//!   user prompt.
//!
//! Templates live in the configuration directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You are the keeper of this world's codex."
//! pre_user_message_content: "Use the codex entries below when they help."
//! post_user_message_content: "Answer in two paragraphs at most."
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LoreError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromptTemplate {
    pub system_prompt: String,

    /// Prepended to every user prompt.
    #[serde(default)]
    pub pre_user_message_content: Option<String>,

    /// Appended to every user prompt.
    #[serde(default)]
    pub post_user_message_content: Option<String>,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: "You are the keeper of a worldbuilding codex. Answer questions about \
                            the world using the codex entries you are given, and say so when \
                            the codex does not cover something."
                .to_string(),
            pre_user_message_content: None,
            post_user_message_content: None,
        }
    }
}

impl PromptTemplate {
    /// Build the user prompt for `query`, placing `context` ahead of the
    /// question when there is any.
    pub fn render_user_prompt(&self, context: &str, query: &str) -> String {
        let mut prompt = String::new();
        if let Some(pre) = &self.pre_user_message_content {
            prompt.push_str(pre);
            prompt.push_str("\n\n");
        }
        if context.is_empty() {
            prompt.push_str(query);
        } else {
            prompt.push_str(context);
            prompt.push_str("\n\nQUESTION: ");
            prompt.push_str(query);
        }
        if let Some(post) = &self.post_user_message_content {
            prompt.push_str("\n\n");
            prompt.push_str(post);
        }
        prompt
    }
}

/// Load a template by name from the user's config directory.
///
/// ### Errors
/// - the config directory cannot be determined,
/// - the template file does not exist or cannot be read,
/// - the YAML content is not a `PromptTemplate`.
pub fn load_template(name: &str) -> Result<PromptTemplate> {
    let dir = crate::config_dir()?.join("templates");
    load_template_from(&dir, name)
}

/// Load `<dir>/<name>.yaml`.
pub fn load_template_from(dir: &Path, name: &str) -> Result<PromptTemplate> {
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(LoreError::InvalidInput(format!(
            "template name {name:?} must be a bare name"
        )));
    }
    let path = dir.join(format!("{name}.yaml"));
    tracing::info!("Loading template: {}", path.display());

    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}
