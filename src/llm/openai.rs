//! OpenAI-compatible transport. Anything speaking the chat completions SSE
//! dialect works through this client, the hosted OpenAI API included, which
//! is why the credential carries its own api_base.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use super::provider::{LLMProvider, LLMProviderAPIKeys};
use super::types::{
    LLMClient, LLMClientCompletionRequest, LLMClientCompletionResponse, LLMClientError,
};

pub struct OpenAIClient {
    client: reqwest::Client,
}

#[derive(serde::Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(serde::Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

impl<'a> OpenAIRequest<'a> {
    fn from_client_request(request: &'a LLMClientCompletionRequest) -> Self {
        Self {
            model: request.model(),
            messages: vec![OpenAIMessage {
                role: "user",
                content: request.prompt(),
            }],
            temperature: request.temperature(),
            max_tokens: request.max_tokens(),
            stream: true,
            stop: request.stop_sequences(),
        }
    }
}

#[derive(serde::Deserialize, Debug)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(serde::Deserialize, Debug)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
}

#[derive(serde::Deserialize, Debug)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

impl OpenAIClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn chat_endpoint(&self, api_base: &str) -> String {
        format!("{}/chat/completions", api_base.trim_end_matches('/'))
    }

    fn credentials(
        &self,
        api_key: LLMProviderAPIKeys,
    ) -> Result<super::provider::OpenAIProvider, LLMClientError> {
        match api_key {
            LLMProviderAPIKeys::OpenAI(provider) => Ok(provider),
            _ => Err(LLMClientError::WrongAPIKeyType),
        }
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    fn client(&self) -> &LLMProvider {
        &LLMProvider::OpenAI
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
        let credentials = self.credentials(api_key)?;
        let openai_request = OpenAIRequest::from_client_request(&request);

        const TOTAL_STREAM_RETRIES: usize = 5;
        let mut last_error = None;

        'retry_loop: for attempt in 0..TOTAL_STREAM_RETRIES {
            let response = match self
                .client
                .post(self.chat_endpoint(&credentials.api_base))
                .bearer_auth(&credentials.api_key)
                .json(&openai_request)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    warn!(?err, attempt, "openai connection failed, retrying");
                    last_error = Some(LLMClientError::NetworkError(err));
                    continue 'retry_loop;
                }
            };
            if response.status().as_u16() == 429 {
                warn!(attempt, "openai rate limited, backing off");
                last_error = Some(LLMClientError::RateLimited);
                tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                continue 'retry_loop;
            }
            if !response.status().is_success() {
                // auth and model errors will not get better by retrying
                return Err(LLMClientError::from_status(response.status()));
            }

            let mut event_source = response.bytes_stream().eventsource();
            let mut buffered_string = String::new();
            while let Some(Ok(event)) = event_source.next().await {
                if event.data == "[DONE]" {
                    break;
                }
                let chunk = match serde_json::from_str::<OpenAIStreamChunk>(&event.data) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(?err, attempt, "openai stream error, retrying");
                        last_error = Some(LLMClientError::SerdeError(err));
                        continue 'retry_loop;
                    }
                };
                let Some(delta) = chunk
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                else {
                    continue;
                };
                buffered_string.push_str(&delta);
                sender.send(LLMClientCompletionResponse::new(
                    buffered_string.to_owned(),
                    Some(delta),
                    request.model().to_owned(),
                ))?;
            }
            return Ok(buffered_string);
        }
        Err(last_error
            .unwrap_or_else(|| LLMClientError::InvalidResponse("retries exhausted".to_owned())))
    }
}
