//! Backend configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::backend::ReplyBackend;
use crate::error::{LlmError, LlmResult};
use crate::gemini::{self, GeminiBackend};
use crate::openai::{self, OpenAiBackend};

/// Which API serves replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Gemini => "gemini",
        }
    }

    fn api_key_var(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => openai::DEFAULT_BASE_URL,
            LlmProvider::Gemini => gemini::DEFAULT_BASE_URL,
        }
    }

    fn default_models(&self) -> (&'static str, &'static str) {
        match self {
            LlmProvider::OpenAi => ("gpt-5", "gpt-5-mini"),
            LlmProvider::Gemini => ("gemini-2.5-flash", "gemini-2.5-flash-lite"),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "gemini" => Ok(LlmProvider::Gemini),
            other => Err(LlmError::config(format!("Unknown LLM_PROVIDER: {}", other))),
        }
    }
}

/// Primary and fallback backends.
#[derive(Clone)]
pub struct Backends {
    pub primary: Arc<dyn ReplyBackend>,
    pub fallback: Arc<dyn ReplyBackend>,
}

/// Backend configuration.
#[derive(Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub base_url: String,
    pub primary_model: String,
    pub fallback_model: String,
    /// Whole-request timeout on the HTTP client
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl LlmConfig {
    /// Create config from environment variables.
    pub fn from_env() -> LlmResult<Self> {
        let provider = match std::env::var("LLM_PROVIDER") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => LlmProvider::default(),
        };

        let api_key = std::env::var(provider.api_key_var())
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                LlmError::config(format!(
                    "Missing required env var: {}",
                    provider.api_key_var()
                ))
            })?;

        let (primary, fallback) = provider.default_models();

        Ok(Self {
            provider,
            api_key,
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| provider.default_base_url().to_string()),
            primary_model: std::env::var("PRIMARY_MODEL").unwrap_or_else(|_| primary.to_string()),
            fallback_model: std::env::var("FALLBACK_MODEL")
                .unwrap_or_else(|_| fallback.to_string()),
            request_timeout: Duration::from_millis(
                std::env::var("LLM_REQUEST_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60_000),
            ),
            connect_timeout: Duration::from_millis(
                std::env::var("LLM_CONNECT_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10_000),
            ),
        })
    }

    /// Build the primary and fallback backends on one shared HTTP client.
    pub fn build_backends(&self) -> LlmResult<Backends> {
        let client = Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| LlmError::config(format!("Failed to build HTTP client: {}", e)))?;

        let backends = match self.provider {
            LlmProvider::OpenAi => Backends {
                primary: Arc::new(OpenAiBackend::new(
                    client.clone(),
                    &self.base_url,
                    &self.api_key,
                    &self.primary_model,
                )),
                fallback: Arc::new(OpenAiBackend::new(
                    client,
                    &self.base_url,
                    &self.api_key,
                    &self.fallback_model,
                )),
            },
            LlmProvider::Gemini => Backends {
                primary: Arc::new(GeminiBackend::new(
                    client.clone(),
                    &self.base_url,
                    &self.api_key,
                    &self.primary_model,
                )),
                fallback: Arc::new(GeminiBackend::new(
                    client,
                    &self.base_url,
                    &self.api_key,
                    &self.fallback_model,
                )),
            },
        };

        Ok(backends)
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("primary_model", &self.primary_model)
            .field("fallback_model", &self.fallback_model)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
