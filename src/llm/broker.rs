//! The llm broker hands out the right transport for a provider without the
//! compressor having to know about any concrete client.

use std::collections::HashMap;
use std::sync::Arc;

use super::ollama::OllamaClient;
use super::openai::OpenAIClient;
use super::provider::LLMProvider;
use super::types::{LLMClient, LLMClientError};

pub struct LLMBroker {
    providers: HashMap<LLMProvider, Arc<dyn LLMClient + Send + Sync>>,
}

impl LLMBroker {
    pub fn new() -> Self {
        let broker = Self {
            providers: HashMap::new(),
        };
        broker
            .add_provider(LLMProvider::OpenAI, Arc::new(OpenAIClient::new()))
            .add_provider(LLMProvider::Ollama, Arc::new(OllamaClient::new()))
    }

    pub fn add_provider(
        mut self,
        provider: LLMProvider,
        client: Arc<dyn LLMClient + Send + Sync>,
    ) -> Self {
        self.providers.insert(provider, client);
        self
    }

    pub fn get_client(
        &self,
        provider: &LLMProvider,
    ) -> Result<Arc<dyn LLMClient + Send + Sync>, LLMClientError> {
        self.providers
            .get(provider)
            .cloned()
            .ok_or(LLMClientError::ModelUnavailable)
    }
}

impl Default for LLMBroker {
    fn default() -> Self {
        Self::new()
    }
}
