//! The transport contract the compressor drives. Clients take a rendered
//! prompt plus options, stream tokens back over an unbounded channel and
//! resolve to the full accumulated completion. The core never interprets
//! tokens beyond accumulating them.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use super::provider::{LLMProvider, LLMProviderAPIKeys};

/// Options for one completion call. `model` is an opaque model id the
/// provider understands.
#[derive(Debug, Clone)]
pub struct LLMClientCompletionRequest {
    prompt: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    stop_sequences: Option<Vec<String>>,
}

impl LLMClientCompletionRequest {
    pub fn new(prompt: String, model: String, temperature: f64, max_tokens: u32) -> Self {
        Self {
            prompt,
            model,
            temperature,
            max_tokens,
            stop_sequences: None,
        }
    }

    pub fn set_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = Some(stop_sequences);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn stop_sequences(&self) -> Option<&[String]> {
        self.stop_sequences.as_deref()
    }
}

/// One streaming update: the answer so far plus the delta which produced it.
#[derive(Debug, Clone)]
pub struct LLMClientCompletionResponse {
    answer_up_until_now: String,
    delta: Option<String>,
    model: String,
}

impl LLMClientCompletionResponse {
    pub fn new(answer_up_until_now: String, delta: Option<String>, model: String) -> Self {
        Self {
            answer_up_until_now,
            delta,
            model,
        }
    }

    pub fn answer_up_until_now(&self) -> &str {
        &self.answer_up_until_now
    }

    pub fn delta(&self) -> Option<&str> {
        self.delta.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Error, Debug)]
pub enum LLMClientError {
    #[error("network failure talking to the provider: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("the provider rejected our credentials")]
    AuthError,

    #[error("rate limited by the provider")]
    RateLimited,

    #[error("the provider answered with something we cannot use: {0}")]
    InvalidResponse(String),

    #[error("model is not available on this provider")]
    ModelUnavailable,

    #[error("wrong credential type for this provider")]
    WrongAPIKeyType,

    #[error("serde failed: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("send error over the token channel")]
    SendError(#[from] tokio::sync::mpsc::error::SendError<LLMClientCompletionResponse>),
}

impl LLMClientError {
    /// Map an HTTP status onto the typed transport failures. Anything not
    /// recognized stays an invalid response with the status preserved.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::AuthError,
            404 => Self::ModelUnavailable,
            429 => Self::RateLimited,
            other => Self::InvalidResponse(format!("unexpected status {other}")),
        }
    }
}

#[async_trait]
pub trait LLMClient {
    /// Which provider this client talks to; used for cache metadata, never
    /// for correctness.
    fn client(&self) -> &LLMProvider;

    /// Full completion as a single string. Safe for concurrent invocation.
    async fn completion(
        &self,
        api_key: LLMProviderAPIKeys,
        request: LLMClientCompletionRequest,
    ) -> Result<String, LLMClientError>;

    /// Stream the completion, sending every token over `sender` and
    /// resolving to the accumulated answer. The stream is finite and consumed
    /// exactly once; dropping the future propagates cancellation to the
    /// transport.
    async fn stream_completion(
        &self,
        api_key: LLMProviderAPIKeys,
        request: LLMClientCompletionRequest,
        sender: UnboundedSender<LLMClientCompletionResponse>,
    ) -> Result<String, LLMClientError>;
}
