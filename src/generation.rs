//! # Generation
//!
//! The last hop of a question: retrieve codex context, wrap it with the prompt
//! template, and hand the result to a [`TextGenerator`].
//!
//! [`OpenAiChat`] talks to any OpenAI-compatible chat completion endpoint via
//! `async-openai`. The [`Orchestrator`] treats an empty context as "nothing
//! relevant" and sends the bare question; only generation failures are errors.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use loreweave::config::GenerationConfig;
//! use loreweave::generation::{OpenAiChat, Orchestrator};
//! use loreweave::template::PromptTemplate;
//!
//! # async fn demo(context: Arc<loreweave::context::ContextBuilder>) -> Result<(), Box<dyn std::error::Error>> {
//! let chat = OpenAiChat::new(&GenerationConfig::default());
//! let orchestrator = Orchestrator::new(context, Arc::new(chat), PromptTemplate::default());
//! let answer = orchestrator.answer("Who is Aria?").await?;
//! println!("{}", answer.text);
//! # Ok(()) }
//! ```

use std::sync::Arc;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::context::ContextBuilder;
use crate::error::{LoreError, Result};
use crate::template::PromptTemplate;

/// Prompt in, text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Chat completions against an OpenAI-compatible server.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
}

/// Creates a new OpenAI API client from configuration.
fn create_client(config: &GenerationConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("Chat client created for {}", config.api_base);
    Client::with_config(openai_config)
}

impl OpenAiChat {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            client: create_client(config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiChat {
    #[allow(deprecated)]
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .max_tokens(self.max_tokens)
            .model(self.model.clone())
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt.to_string())
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_prompt.to_string())
                    .build()?
                    .into(),
            ])
            .build()?;

        debug!("Sending chat request to model {}", self.model);
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LoreError::Provider(format!("chat completion failed: {e}")))?;

        let text: String = response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect();
        if text.is_empty() {
            return Err(LoreError::Provider("chat completion returned no text".into()));
        }
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// The context block that was sent, empty when none was relevant.
    pub context: String,
}

pub struct Orchestrator {
    context: Arc<ContextBuilder>,
    generator: Arc<dyn TextGenerator>,
    template: PromptTemplate,
}

impl Orchestrator {
    pub fn new(
        context: Arc<ContextBuilder>,
        generator: Arc<dyn TextGenerator>,
        template: PromptTemplate,
    ) -> Self {
        Self {
            context,
            generator,
            template,
        }
    }

    /// Answer `query`, augmented with whatever codex context is relevant.
    ///
    /// # Errors
    /// Only generation failures; retrieval problems degrade to no context.
    pub async fn answer(&self, query: &str) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(LoreError::InvalidInput("question must not be empty".into()));
        }
        let context = self.context.build_context_for_query(query).await?;
        if context.is_empty() {
            debug!("No codex context for question; asking unaugmented");
        }

        let user_prompt = self.template.render_user_prompt(&context, query);
        let text = self
            .generator
            .generate(&self.template.system_prompt, &user_prompt)
            .await?;
        Ok(Answer { text, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::entries::{EntryStore, NewEntry};
    use crate::search::SimilaritySearch;
    use crate::testing::{FailingProvider, KeywordProvider, service_with, setup};
    use httpmock::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            Ok("Aria is a wandering mage.".into())
        }
    }

    async fn orchestrator(
        provider: Arc<dyn crate::provider::EmbeddingProvider>,
    ) -> (Orchestrator, Arc<RecordingGenerator>) {
        setup();
        let db = Database::in_memory().unwrap();
        let entries = EntryStore::new(db.clone());
        let service = service_with(&db, provider);
        let aria = entries
            .create_entry(&NewEntry::new("Aria", "Character", "A wandering mage."))
            .unwrap();
        if let Ok(vector) = service.create_embedding(&aria.canonical_text()).await {
            service.save_embedding(aria.id, &vector).await.unwrap();
        }

        let context = Arc::new(ContextBuilder::new(Arc::new(SimilaritySearch::new(service))));
        let generator = Arc::new(RecordingGenerator::default());
        (
            Orchestrator::new(context, generator.clone(), PromptTemplate::default()),
            generator,
        )
    }

    #[tokio::test]
    async fn test_answer_includes_context() {
        let (orchestrator, generator) = orchestrator(Arc::new(KeywordProvider::new())).await;
        let answer = orchestrator.answer("Who is the traveling sorcerer?").await.unwrap();

        assert_eq!(answer.text, "Aria is a wandering mage.");
        assert!(answer.context.contains("Name: Aria"));
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].1.contains("--- Entry Start ---"));
        assert!(prompts[0].1.ends_with("QUESTION: Who is the traveling sorcerer?"));
    }

    #[tokio::test]
    async fn test_answer_without_retrieval_sends_bare_question() {
        let (orchestrator, generator) = orchestrator(Arc::new(FailingProvider)).await;
        let answer = orchestrator.answer("Who is Aria?").await.unwrap();

        assert_eq!(answer.context, "");
        assert_eq!(generator.prompts.lock().unwrap()[0].1, "Who is Aria?");
    }

    #[tokio::test]
    async fn test_openai_chat_against_mock_server() {
        setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .json_body_includes(r#"{"model":"codex-model"}"#);
                then.status(200).json_body(serde_json::json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "codex-model",
                    "choices": [{
                        "index": 0,
                        "message": { "role": "assistant", "content": "Aria wanders." },
                        "finish_reason": "stop"
                    }]
                }));
            })
            .await;

        let chat = OpenAiChat::new(&GenerationConfig {
            api_base: server.base_url(),
            api_key: "key".into(),
            model: "codex-model".into(),
            ..Default::default()
        });
        let text = chat.generate("system", "Who is Aria?").await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "Aria wanders.");
    }
}
