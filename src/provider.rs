//! # Embedding providers
//!
//! Everything that turns text into a vector sits behind one capability,
//! [`EmbeddingProvider`]. The concrete backend is picked once, when a vault is
//! opened, by [`build_provider`] from the configured [`ProviderKind`]; nothing
//! downstream ever branches on the provider name again.
//!
//! ## Variants
//! - [`OpenAiEmbeddings`]: any OpenAI-compatible `/embeddings` endpoint.
//! - [`GeminiEmbeddings`]: Google's `embedContent` endpoint.
//! - [`LocalBertEmbeddings`]: a sentence-transformers BERT model run on the CPU
//!   with Candle, fetched from the Hugging Face Hub on first use.
//!
//! ## Model identifiers
//! [`EmbeddingProvider::model_identifier`] returns `"<provider>:<model>"`, e.g.
//! `openai:text-embedding-3-small`. That string is the version tag stored next
//! to every vector, so switching models makes old rows "missing" rather than
//! silently mixing vector spaces.
//!
//! ## Quick Example
//! ```no_run
//! use loreweave::config::{EmbeddingConfig, ProviderKind};
//! use loreweave::provider::build_provider;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EmbeddingConfig {
//!     provider: ProviderKind::Openai,
//!     api_key: "sk-...".into(),
//!     ..Default::default()
//! };
//! if let Some(provider) = build_provider(&config)? {
//!     let v = provider.create_embedding("A wandering mage.").await?;
//!     println!("{} -> {} dims", provider.model_identifier(), v.len());
//! }
//! # Ok(()) }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::config::{EmbeddingConfig, ProviderKind};
use crate::error::{LoreError, Result};

pub const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const GEMINI_DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/v1";
pub const GEMINI_DEFAULT_MODEL: &str = "embedding-001";
pub const LOCAL_DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Text in, vector out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`.
    ///
    /// # Errors
    /// - [`LoreError::InvalidInput`] for empty or whitespace-only text.
    /// - [`LoreError::Provider`] for any transport, API or model failure.
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>>;

    /// Version tag for vectors produced by this provider.
    fn model_identifier(&self) -> String;
}

/// Construct the configured provider. `ProviderKind::None` yields `Ok(None)`.
///
/// # Errors
/// [`LoreError::Configuration`] when a remote provider has no API key (an
/// OpenAI-compatible server with an explicit `api_base` may run keyless), or
/// when the HTTP client cannot be built.
pub fn build_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::None => {
            info!("Embedding provider disabled; semantic features are off");
            return Ok(None);
        }
        ProviderKind::Openai => {
            if config.api_key.trim().is_empty() && config.api_base.is_none() {
                return Err(LoreError::Configuration(
                    "OpenAI embeddings need an api_key".into(),
                ));
            }
            Arc::new(OpenAiEmbeddings::new(
                config.api_key.clone(),
                config.api_base.clone().unwrap_or_else(|| OPENAI_DEFAULT_BASE.into()),
                config.model.clone().unwrap_or_else(|| OPENAI_DEFAULT_MODEL.into()),
                timeout,
            )?)
        }
        ProviderKind::Gemini => {
            if config.api_key.trim().is_empty() {
                return Err(LoreError::Configuration(
                    "Gemini embeddings need an api_key".into(),
                ));
            }
            Arc::new(GeminiEmbeddings::new(
                config.api_key.clone(),
                config.api_base.clone().unwrap_or_else(|| GEMINI_DEFAULT_BASE.into()),
                config.model.clone().unwrap_or_else(|| GEMINI_DEFAULT_MODEL.into()),
                timeout,
            )?)
        }
        ProviderKind::Local => Arc::new(LocalBertEmbeddings::new(
            config.model.clone().unwrap_or_else(|| LOCAL_DEFAULT_MODEL.into()),
        )),
    };
    info!("Embedding provider ready: {}", provider.model_identifier());
    Ok(Some(provider))
}

fn require_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(LoreError::InvalidInput("cannot embed empty text".into()));
    }
    Ok(())
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LoreError::Configuration(format!("failed to build HTTP client: {e}")))
}

fn transport(e: reqwest::Error) -> LoreError {
    LoreError::Provider(format!("request failed: {e}"))
}

// --- OpenAI-compatible -------------------------------------------------------------------------

pub struct OpenAiEmbeddings {
    api_key: String,
    api_base: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, api_base: String, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        require_text(text)?;
        debug!("Requesting OpenAI embedding with model: {}", self.model);

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .json(&serde_json::json!({ "model": self.model, "input": text }));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LoreError::Provider("rate limited by embeddings API".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoreError::Provider(format!(
                "embeddings API returned {status}: {body}"
            )));
        }

        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LoreError::Provider(format!("malformed embeddings response: {e}")))?;
        match parsed.data.into_iter().next() {
            Some(data) if !data.embedding.is_empty() => Ok(data.embedding),
            _ => Err(LoreError::Provider("embeddings API returned no vector".into())),
        }
    }

    fn model_identifier(&self) -> String {
        format!("openai:{}", self.model)
    }
}

// --- Gemini ------------------------------------------------------------------------------------

pub struct GeminiEmbeddings {
    api_key: String,
    api_base: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GeminiEmbedResponse {
    embedding: Option<GeminiValues>,
}

#[derive(Deserialize)]
struct GeminiValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

#[derive(Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiEmbeddings {
    pub fn new(api_key: String, api_base: String, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddings {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        require_text(text)?;
        debug!("Requesting Gemini embedding with model: {}", self.model);

        let body = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [ { "text": text } ] }
        });
        let response = self
            .client
            .post(format!("{}/models/{}:embedContent", self.api_base, self.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let raw = response.text().await.map_err(transport)?;
        if !status.is_success() {
            let message = match serde_json::from_str::<GeminiErrorResponse>(&raw) {
                Ok(parsed) => format!(
                    "{} {}: {}",
                    parsed.error.code, parsed.error.status, parsed.error.message
                ),
                Err(_) => format!("{status}: {raw}"),
            };
            return Err(LoreError::Provider(format!("Gemini API error {message}")));
        }

        let parsed: GeminiEmbedResponse = serde_json::from_str(&raw)
            .map_err(|e| LoreError::Provider(format!("malformed Gemini response: {e}")))?;
        match parsed.embedding {
            Some(embedding) if !embedding.values.is_empty() => Ok(embedding.values),
            _ => Err(LoreError::Provider("Gemini returned an empty embedding".into())),
        }
    }

    fn model_identifier(&self) -> String {
        format!("gemini:{}", self.model)
    }
}

// --- Local BERT (Candle) -----------------------------------------------------------------------

/// Sentence embeddings model using Candle (pure Rust).
pub struct SentenceEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

fn model_error(e: impl std::fmt::Display) -> LoreError {
    LoreError::Provider(format!("local model: {e}"))
}

impl SentenceEncoder {
    /// Download (or reuse the hub cache for) `model_id` and load it on the CPU.
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;
        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(model_error)?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json").map_err(model_error)?;
        let tokenizer_filename = api_repo.get("tokenizer.json").map_err(model_error)?;
        let weights_filename = api_repo.get("model.safetensors").map_err(model_error)?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config).map_err(model_error)?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename).map_err(model_error)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: 512,
                ..Default::default()
            }))
            .map_err(model_error)?;
        tokenizer.with_padding(None);

        // SAFETY: the weights file is owned by the hub cache and not mutated while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(model_error)?
        };
        let model = BertModel::load(vb, &config).map_err(model_error)?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Mean-pooled, L2-normalised embedding of `text`.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenizer.encode(text, true).map_err(model_error)?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(model_error)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(model_error)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(model_error)?;

        let pooled = self
            .mean_pooling(&output, tokens.get_attention_mask())
            .and_then(|t| Self::normalize(&t))
            .map_err(model_error)?;

        pooled.to_vec1::<f32>().map_err(model_error)
    }

    /// `[1, seq, hidden]` -> `[hidden]`, ignoring padded positions.
    fn mean_pooling(
        &self,
        embeddings: &Tensor,
        attention_mask: &[u32],
    ) -> candle_core::Result<Tensor> {
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        sum.broadcast_div(&count)?.squeeze(0)
    }

    fn normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        tensor.broadcast_div(&norm)
    }
}

/// Lazily loaded local model; inference runs on the blocking pool.
pub struct LocalBertEmbeddings {
    model_id: String,
    encoder: Arc<OnceCell<SentenceEncoder>>,
}

impl LocalBertEmbeddings {
    pub fn new(model_id: String) -> Self {
        Self {
            model_id,
            encoder: Arc::new(OnceCell::new()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalBertEmbeddings {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        require_text(text)?;
        let encoder = Arc::clone(&self.encoder);
        let model_id = self.model_id.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let encoder = encoder.get_or_try_init(|| {
                info!("Loading local embedding model: {}", model_id);
                SentenceEncoder::load(&model_id)
            })?;
            encoder.encode(&text)
        })
        .await
        .map_err(|e| LoreError::Provider(format!("local embedding task failed: {e}")))?
    }

    fn model_identifier(&self) -> String {
        let short = self.model_id.rsplit('/').next().unwrap_or(&self.model_id);
        format!("local:{short}")
    }
}
