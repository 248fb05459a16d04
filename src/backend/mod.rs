pub mod lmstudio;
pub mod ollama;
pub mod openai;

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reqwest::StatusCode;
use thiserror::Error;

use crate::{
    config::LlmConfig,
    errors::{EnhanceError, EnhanceMode},
};

pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

/// Instruction shared by every variant that carries one.
pub const ENHANCE_INSTRUCTION: &str = "Improve the following text while maintaining its original meaning and style. Make it more clear, concise, and professional";

#[async_trait]
pub trait EnhanceBackend: Send + Sync {
    fn provider(&self) -> Provider;

    async fn enhance(&self, text: &str) -> Result<String, BackendError>;

    /// Starts a streaming enhancement. Failures before the first fragment are
    /// returned here; later failures arrive as stream items.
    async fn stream_enhance(&self, text: &str) -> Result<FragmentStream, EnhanceError> {
        let _ = text;
        Err(EnhanceError::UnsupportedProvider {
            provider: self.provider().to_string(),
            mode: EnhanceMode::Streaming,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Ollama,
    LmStudio,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Ollama => "ollama",
            Provider::LmStudio => "lmstudio",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider `{0}`")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        [Provider::OpenAi, Provider::Ollama, Provider::LmStudio]
            .into_iter()
            .find(|provider| provider.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| UnknownProvider(value.to_owned()))
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend timeout: {0}")]
    Timeout(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub(crate) fn transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            BackendError::Timeout(error.to_string())
        } else {
            BackendError::Unavailable(error.to_string())
        }
    }

    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        let trimmed = body.chars().take(400).collect::<String>();
        match status {
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                BackendError::Timeout(format!("upstream timeout: {trimmed}"))
            }
            _ => BackendError::Status {
                status: status.as_u16(),
                body: trimmed,
            },
        }
    }
}

/// Shared HTTP plumbing handed to every backend built from a configuration.
#[derive(Debug, Clone)]
pub struct Transport {
    pub client: reqwest::Client,
    pub openai_base_url: String,
}

/// Reads a response body, turning non-success statuses into [`BackendError`].
pub(crate) async fn checked(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown backend error".to_owned());
    Err(BackendError::from_status(status, body))
}

pub fn select_backend(
    config: &LlmConfig,
    transport: &Transport,
) -> Result<Arc<dyn EnhanceBackend>, UnknownProvider> {
    let backend: Arc<dyn EnhanceBackend> = match config.provider.parse::<Provider>()? {
        Provider::OpenAi => Arc::new(openai::OpenAiBackend::new(
            transport.client.clone(),
            &transport.openai_base_url,
            &config.api_key,
            &config.model,
        )),
        Provider::Ollama => Arc::new(ollama::OllamaBackend::new(
            transport.client.clone(),
            config.endpoint.as_deref(),
            &config.model,
        )),
        Provider::LmStudio => Arc::new(lmstudio::LmStudioBackend::new(
            transport.client.clone(),
            config.endpoint.as_deref(),
            &config.model,
        )),
    };
    Ok(backend)
}

pub(crate) fn endpoint_or(endpoint: Option<&str>, default: &str) -> String {
    endpoint
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
        .to_owned()
}

pub(crate) fn model_or(model: &str, default: &str) -> String {
    let model = model.trim();
    if model.is_empty() {
        default.to_owned()
    } else {
        model.to_owned()
    }
}
