use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compression::types::CompressionLevel;
use crate::llm::provider::{LLMProvider, LLMProviderAPIKeys, OllamaProvider, OpenAIProvider};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("LLM__DefaultModel is not set and no model was supplied")]
    MissingDefaultModel,
}

/// Everything we read from the process environment, captured exactly once at
/// startup so deep call paths never touch `std::env` themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentValues {
    pub default_model: Option<String>,
    pub treesitter_dop: Option<usize>,
    /// `THAUM_PROMPT_<PREFIX>_<SYMBOLTYPE>` values, keyed by the suffix.
    pub prompt_overrides: HashMap<String, String>,
}

impl EnvironmentValues {
    pub fn capture() -> Self {
        let mut prompt_overrides = HashMap::new();
        for (key, value) in std::env::vars() {
            if let Some(suffix) = key.strip_prefix("THAUM_PROMPT_") {
                prompt_overrides.insert(suffix.to_owned(), value);
            }
        }
        Self {
            default_model: std::env::var("LLM__DefaultModel").ok(),
            treesitter_dop: std::env::var("THAUM_TREESITTER_DOP")
                .ok()
                .and_then(|value| value.parse().ok()),
            prompt_overrides,
        }
    }
}

#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    /// The repository to compress
    pub project_path: PathBuf,

    #[clap(long)]
    #[serde(default)]
    /// Pin the project language instead of detecting it
    pub language: Option<String>,

    #[clap(long, value_enum, default_value = "compress")]
    #[serde(default = "default_compression_level")]
    /// Which prompt family to run with
    pub compression_level: CompressionLevel,

    #[clap(short, long, default_value_os_t = default_cache_dir())]
    #[serde(default = "default_cache_dir")]
    /// Directory to store all persistent state
    pub cache_dir: PathBuf,

    #[clap(long)]
    #[serde(default)]
    /// Model id; falls back to the LLM__DefaultModel environment variable
    pub model: Option<String>,

    #[clap(long, value_enum, default_value = "openai")]
    #[serde(default = "default_provider")]
    /// Which transport to drive the model through
    pub provider: LLMProvider,

    #[clap(long)]
    #[serde(default)]
    /// Opaque provider credential
    pub api_key: Option<String>,

    #[clap(long)]
    #[serde(default)]
    /// Override the provider endpoint
    pub api_base: Option<String>,

    #[clap(long)]
    #[serde(default)]
    /// Parallelism bound; falls back to THAUM_TREESITTER_DOP, then to the
    /// hardware parallelism
    pub dop: Option<usize>,

    #[clap(long, default_value_t = false)]
    #[serde(default)]
    /// Drop the whole cache before running
    pub clear_cache: bool,

    #[clap(skip)]
    #[serde(skip)]
    pub env: EnvironmentValues,
}

impl Configuration {
    /// Attach the one-time environment capture. Call this right after
    /// parsing, before anything asks for the model.
    pub fn with_environment(mut self) -> Self {
        self.env = EnvironmentValues::capture();
        self
    }

    /// The model the pipeline runs with. Absent flag plus absent environment
    /// is a fatal configuration error, surfaced before any work starts.
    pub fn model(&self) -> Result<String, ConfigError> {
        self.model
            .clone()
            .or_else(|| self.env.default_model.clone())
            .ok_or(ConfigError::MissingDefaultModel)
    }

    pub fn dop(&self) -> usize {
        self.dop
            .or(self.env.treesitter_dop)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|parallelism| parallelism.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn prompt_overrides(&self) -> &HashMap<String, String> {
        &self.env.prompt_overrides
    }

    pub fn api_keys(&self) -> LLMProviderAPIKeys {
        match self.provider {
            LLMProvider::OpenAI => LLMProviderAPIKeys::OpenAI(OpenAIProvider::new(
                self.api_key.clone().unwrap_or_default(),
                self.api_base
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_owned()),
            )),
            LLMProvider::Ollama => LLMProviderAPIKeys::Ollama(match self.api_base.clone() {
                Some(api_base) => OllamaProvider { api_base },
                None => OllamaProvider::default(),
            }),
        }
    }

    /// Directory where logs are written to
    pub fn log_dir(&self) -> PathBuf {
        self.cache_dir.join("logs")
    }
}

fn default_cache_dir() -> PathBuf {
    match directories::ProjectDirs::from("sh", "holo-q", "thaum") {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => "thaum_cache".into(),
    }
}

fn default_compression_level() -> CompressionLevel {
    CompressionLevel::Compress
}

fn default_provider() -> LLMProvider {
    LLMProvider::OpenAI
}
