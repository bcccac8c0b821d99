use std::path::PathBuf;
use std::time::Duration;

use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, Environment, File, Map};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::rag::prompt::BudgetUnit;

const ENV_PREFIX: &str = "RAG";
const API_KEY_FALLBACK_VAR: &str = "GROQ_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub static_dir: PathBuf,
    pub data_dir: PathBuf,
    pub model_version: String,
    pub embedding_model_dir: PathBuf,
    pub require_corpus: bool,
    pub top_k: usize,
    pub max_context_units: usize,
    pub budget_unit: BudgetUnit,
    pub completion: CompletionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionBackend {
    /// OpenAI-compatible `/chat/completions`.
    Chat,
    /// Legacy `/completions` endpoint served by most local inference servers.
    Text,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionSettings {
    pub backend: CompletionBackend,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl CompletionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Defaults, then `rag.toml`, then `RAG_*` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(None, std::env::var(API_KEY_FALLBACK_VAR).ok())
    }

    /// `env` replaces the process environment when given. Values are kept as
    /// strings and converted on deserialize, so a version tag like `2.0`
    /// reaches `model_version` unchanged.
    fn load_from(env: Option<Map<String, String>>, fallback_key: Option<String>) -> Result<Self> {
        let builder = Self::defaults()?
            .add_source(File::with_name("rag").required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .source(env),
            );

        let mut settings = Self::from_builder(builder)?;
        if settings.completion.api_key.is_none() {
            settings.completion.api_key = fallback_key.filter(|key| !key.trim().is_empty());
        }
        Ok(settings)
    }

    pub fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            .set_default("bind_addr", "0.0.0.0:8080")?
            .set_default("static_dir", "static")?
            .set_default("data_dir", "data")?
            .set_default("model_version", "v1.0")?
            .set_default("embedding_model_dir", "/app/models/bge-small-en-v1.5")?
            .set_default("require_corpus", false)?
            .set_default("top_k", 5_i64)?
            .set_default("max_context_units", 3000_i64)?
            .set_default("budget_unit", "tokens")?
            .set_default("completion.backend", "chat")?
            .set_default("completion.endpoint", "https://api.groq.com/openai/v1")?
            .set_default("completion.model", "mixtral-8x7b-32768")?
            .set_default(
                "completion.system_prompt",
                "You are an expert dissertation assistant.",
            )?
            .set_default("completion.temperature", 0.7_f64)?
            .set_default("completion.max_tokens", 150_i64)?
            .set_default("completion.timeout_secs", 30_i64)?;
        Ok(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn corpus_dir(&self) -> PathBuf {
        self.data_dir.join("models").join(&self.model_version)
    }

    fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".to_string()));
        }
        if self.completion.timeout_secs == 0 {
            return Err(Error::Config(
                "completion.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.model_version.trim().is_empty() {
            return Err(Error::Config("model_version must not be empty".to_string()));
        }
        if self.completion.endpoint.trim().is_empty() {
            return Err(Error::Config("completion.endpoint must not be empty".to_string()));
        }
        Ok(())
    }
}
