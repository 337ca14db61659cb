//! # Narrative extraction
//!
//! Free text in, codex entries out. The text generator is asked for a JSON
//! array of `{name, type, content}` objects. The reply may come wrapped in a
//! Markdown code fence. Items without a name are skipped and a missing type
//! becomes `Concept`. Anything that is not a JSON array is a provider error.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::entries::NewEntry;
use crate::error::{LoreError, Result};
use crate::generation::TextGenerator;

pub const DEFAULT_ENTRY_TYPE: &str = "Concept";

const SYSTEM_PROMPT: &str = "You extract worldbuilding entities from prose for a codex. \
                             Reply with JSON only.";

#[derive(Debug, Deserialize)]
struct ExtractedItem {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    entry_type: String,
    #[serde(default)]
    content: String,
}

fn extraction_prompt(text: &str) -> String {
    format!(
        "Analyze the following text and extract key entities (characters, locations, items, \
         concepts) and their descriptions. Format the output STRICTLY as a JSON array where each \
         object has 'name', 'type', and 'content' fields. Types should be one of: Character, \
         Location, Item, Concept. Do not include any text before or after the JSON array. \
         Example: [{{\"name\": \"Sir Reginald\", \"type\": \"Character\", \"content\": \"A brave \
         knight known for his shiny armor.\"}}]. Text to analyze:\n\n{text}"
    )
}

/// Remove a surrounding Markdown code fence, language tag included.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse a model reply into entries ready for import.
///
/// # Errors
/// [`LoreError::Provider`] when the reply is not a JSON array of objects.
pub fn parse_extracted_entries(reply: &str) -> Result<Vec<NewEntry>> {
    let json = strip_code_fence(reply);
    let items: Vec<ExtractedItem> = serde_json::from_str(json).map_err(|e| {
        debug!("Unparseable extraction reply: {}", json);
        LoreError::Provider(format!("model reply is not a JSON array of entries: {e}"))
    })?;

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let name = item.name.trim();
            if name.is_empty() {
                warn!("Skipping extracted entry with no name");
                return None;
            }
            let entry_type = match item.entry_type.trim() {
                "" => {
                    debug!("Entry {} has no type; using {}", name, DEFAULT_ENTRY_TYPE);
                    DEFAULT_ENTRY_TYPE
                }
                t => t,
            };
            Some(NewEntry::new(name, entry_type, item.content.trim()))
        })
        .collect())
}

/// Ask `generator` for the entities in `text`.
pub async fn extract_entries(generator: &dyn TextGenerator, text: &str) -> Result<Vec<NewEntry>> {
    if text.trim().is_empty() {
        return Err(LoreError::InvalidInput("nothing to extract from".into()));
    }
    let reply = generator.generate(SYSTEM_PROMPT, &extraction_prompt(text)).await?;
    parse_extracted_entries(&reply)
}
