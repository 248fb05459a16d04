use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tracing::debug;

use crate::{
    backend::{
        checked, endpoint_or, model_or, BackendError, EnhanceBackend, FragmentStream, Provider,
        ENHANCE_INSTRUCTION,
    },
    errors::EnhanceError,
    models::{GenerateRequest, GenerateResponse},
};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434/api/generate";
const DEFAULT_MODEL: &str = "llama2";

/// Local generation server speaking the `/api/generate` contract.
#[derive(Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(client: reqwest::Client, endpoint: Option<&str>, model: &str) -> Self {
        Self {
            client,
            endpoint: endpoint_or(endpoint, DEFAULT_ENDPOINT),
            model: model_or(model, DEFAULT_MODEL),
        }
    }

    fn payload(&self, text: &str) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            prompt: format!("{ENHANCE_INSTRUCTION}:\n\n{text}"),
            stream: false,
        }
    }
}

#[async_trait]
impl EnhanceBackend for OllamaBackend {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    async fn enhance(&self, text: &str) -> Result<String, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.payload(text))
            .send()
            .await
            .map_err(BackendError::transport)?;
        let parsed: GenerateResponse = checked(response)
            .await?
            .json()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;

        Ok(parsed.response)
    }

    /// No incremental delivery: the full reply becomes a single fragment.
    async fn stream_enhance(&self, text: &str) -> Result<FragmentStream, EnhanceError> {
        let full = self
            .enhance(text)
            .await
            .map_err(|source| EnhanceError::backend(self.provider(), source))?;
        debug!(provider = %self.provider(), endpoint = %self.endpoint, "one-shot fallback for stream");
        Ok(stream::once(async move { Ok(full) }).boxed())
    }
}
