use async_trait::async_trait;

use crate::{
    backend::{checked, endpoint_or, BackendError, EnhanceBackend, Provider},
    models::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage},
};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:1234/api/v0/chat/completions";

/// Local OpenAI-compatible server. Sends the user's text alone, with no
/// instruction, and has no streaming path.
#[derive(Clone)]
pub struct LmStudioBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl LmStudioBackend {
    pub fn new(client: reqwest::Client, endpoint: Option<&str>, model: &str) -> Self {
        Self {
            client,
            endpoint: endpoint_or(endpoint, DEFAULT_ENDPOINT),
            model: model.trim().to_owned(),
        }
    }

    fn payload(&self, text: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(text)],
            temperature: None,
            max_tokens: None,
            stream: None,
        }
    }
}

#[async_trait]
impl EnhanceBackend for LmStudioBackend {
    fn provider(&self) -> Provider {
        Provider::LmStudio
    }

    async fn enhance(&self, text: &str) -> Result<String, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.payload(text))
            .send()
            .await
            .map_err(BackendError::transport)?;
        let parsed: ChatCompletionResponse = checked(response)
            .await?
            .json()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;

        parsed.into_content().ok_or_else(|| {
            BackendError::InvalidResponse("missing choices[0].message.content".to_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_a_single_user_message() {
        let backend = LmStudioBackend::new(reqwest::Client::new(), Some(""), "qwen2.5-7b");
        let value = serde_json::to_value(backend.payload("fix me")).expect("serializable");

        assert_eq!(backend.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(
            value,
            serde_json::json!({
                "model": "qwen2.5-7b",
                "messages": [{"role": "user", "content": "fix me"}]
            })
        );
    }
}
