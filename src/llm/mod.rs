//! LLM integration.
//!
//! The scorer only needs plain text completion, so a single
//! OpenAI-compatible HTTP client covers local servers (LM Studio by default)
//! and hosted APIs alike.

pub mod openai_compat;
pub mod provider;

pub use openai_compat::OpenAiCompatProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{ConfigError, LlmError};

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API root, e.g. `http://localhost:1234/v1`.
    pub base_url: String,
    pub model: String,
    /// LM Studio accepts any key.
    pub api_key: SecretString,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "qwen3-32b".to_string(),
            api_key: SecretString::from("lm-studio"),
            timeout: Duration::from_secs(120),
        }
    }
}

impl LlmConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timeout = match std::env::var("MAIL_SCORER_LLM_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.trim().parse().map_err(|e| {
                ConfigError::InvalidValue {
                    key: "MAIL_SCORER_LLM_TIMEOUT_SECS".into(),
                    message: format!("'{raw}': {e}"),
                }
            })?),
            Err(_) => defaults.timeout,
        };

        Ok(Self {
            base_url: std::env::var("MAIL_SCORER_LLM_URL").unwrap_or(defaults.base_url),
            model: std::env::var("MAIL_SCORER_MODEL").unwrap_or(defaults.model),
            api_key: std::env::var("MAIL_SCORER_LLM_API_KEY")
                .map(SecretString::from)
                .unwrap_or(defaults.api_key),
            timeout,
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiCompatProvider::new(
        &config.base_url,
        config.api_key.clone(),
        &config.model,
        config.timeout,
    )?;
    tracing::info!(url = %config.base_url, "Using model {}", config.model);
    Ok(Arc::new(provider))
}
