//! Ollama client here so we can stream completions from a local model.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use super::provider::{LLMProvider, LLMProviderAPIKeys};
use super::types::{
    LLMClient, LLMClientCompletionRequest, LLMClientCompletionResponse, LLMClientError,
};

pub struct OllamaClient {
    client: reqwest::Client,
}

#[derive(serde::Serialize)]
struct OllamaOptions {
    temperature: f64,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(serde::Serialize)]
struct OllamaClientRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    stream: bool,
    raw: bool,
    options: OllamaOptions,
}

impl<'a> OllamaClientRequest<'a> {
    fn from_client_request(request: &'a LLMClientCompletionRequest) -> Self {
        Self {
            prompt: request.prompt(),
            model: request.model(),
            stream: true,
            raw: true,
            options: OllamaOptions {
                temperature: request.temperature(),
                num_predict: request.max_tokens(),
                stop: request.stop_sequences().map(|stop| stop.to_vec()),
            },
        }
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
struct OllamaResponse {
    model: String,
    response: String,
}

impl OllamaClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn generation_endpoint(&self, api_base: &str) -> String {
        format!("{}/api/generate", api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    fn client(&self) -> &LLMProvider {
        &LLMProvider::Ollama
    }

    async fn completion(
        &self,
        api_key: LLMProviderAPIKeys,
        request: LLMClientCompletionRequest,
    ) -> Result<String, LLMClientError> {
        let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
        self.stream_completion(api_key, request, sender).await
    }

    async fn stream_completion(
        &self,
        api_key: LLMProviderAPIKeys,
        request: LLMClientCompletionRequest,
        sender: UnboundedSender<LLMClientCompletionResponse>,
    ) -> Result<String, LLMClientError> {
        let api_base = match api_key {
            LLMProviderAPIKeys::Ollama(provider) => provider.api_base,
            _ => return Err(LLMClientError::WrongAPIKeyType),
        };
        let ollama_request = OllamaClientRequest::from_client_request(&request);
        let mut response = self
            .client
            .post(self.generation_endpoint(&api_base))
            .json(&ollama_request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LLMClientError::from_status(response.status()));
        }

        let mut buffered_string = String::new();
        while let Some(chunk) = response.chunk().await? {
            let value = serde_json::from_slice::<OllamaResponse>(chunk.to_vec().as_slice())?;
            buffered_string.push_str(&value.response);
            sender.send(LLMClientCompletionResponse::new(
                buffered_string.to_owned(),
                Some(value.response),
                value.model,
            ))?;
        }
        Ok(buffered_string)
    }
}
