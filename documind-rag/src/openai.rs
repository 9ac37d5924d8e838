//! Embeddings from the OpenAI API (feature `openai`).
//!
//! One HTTP request per [`embed`](EmbeddingProvider::embed) call. Timeouts and
//! retries belong to the indexing and retrieval engines; this module only
//! classifies what went wrong so they can tell transient failures apart.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::Embedding;
use crate::embedding::EmbeddingProvider;
use crate::error::{DocuMindError, ProviderError, Result};

const ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const API_KEY_VAR: &str = "OPENAI_API_KEY";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Native output size of the known embedding models.
fn native_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

/// An [`EmbeddingProvider`] calling `POST /v1/embeddings`.
///
/// The model version reported to the index is `openai:{model}:{dimensions}`,
/// so switching model or output size is detected at query time.
///
/// # Example
///
/// ```rust,ignore
/// use documind_rag::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?
///     .with_model("text-embedding-3-large")
///     .with_dimensions(1024);
/// ```
pub struct OpenAIEmbeddingProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    /// Requested output size; `None` uses the model's native size.
    truncate_to: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`DocuMindError::Config`] if the key is blank.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(DocuMindError::Config("OpenAI API key must not be empty".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            endpoint: ENDPOINT.into(),
            model: DEFAULT_MODEL.into(),
            truncate_to: None,
        })
    }

    /// Create a provider from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(API_KEY_VAR)
            .map_err(|_| DocuMindError::Config(format!("{API_KEY_VAR} is not set")))?;
        Self::new(key)
    }

    /// Use another embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Ask the API for shortened vectors of `dimensions` components.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.truncate_to = Some(dimensions);
        self
    }

    /// Point at an OpenAI-compatible gateway.
    pub fn with_base_url(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
struct Request<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct Response {
    data: Vec<Item>,
}

#[derive(Deserialize)]
struct Item {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Map a non-success status to a provider error. Rate limiting and server
/// errors are transient; every other status means the request itself is bad.
fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let detail = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    let message = format!("{status}: {detail}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Unavailable(message)
    } else {
        ProviderError::Rejected(message)
    }
}

/// Pull the single vector out of a response and check its size.
fn single_vector(response: Response, expected: usize) -> std::result::Result<Vec<f32>, ProviderError> {
    let mut items = response.data.into_iter();
    let vector = items
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("no embedding in response".into()))?
        .embedding;
    if items.next().is_some() {
        return Err(ProviderError::InvalidResponse("more than one embedding for one input".into()));
    }
    if vector.len() != expected {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {expected} dimensions, got {}",
            vector.len()
        )));
    }
    Ok(vector)
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> std::result::Result<Embedding, ProviderError> {
        debug!(model = %self.model, text_len = text.len(), "requesting openai embedding");

        let request = Request { model: &self.model, input: [text], dimensions: self.truncate_to };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = status_error(status, &body);
            warn!(model = %self.model, %status, error = %error, "openai embedding request failed");
            return Err(error);
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("undecodable body: {e}")))?;
        let vector = single_vector(parsed, self.dimensions())?;
        Ok(Embedding { vector, model_version: self.model_version() })
    }

    fn model_version(&self) -> String {
        format!("openai:{}:{}", self.model, self.dimensions())
    }

    fn dimensions(&self) -> usize {
        self.truncate_to.unwrap_or_else(|| native_dimensions(&self.model))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
