use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Text of `choices[0].message.content`, if the backend sent one.
    pub fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub error: Option<UpstreamError>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Error object an upstream server may send in place of a chunk.
#[derive(Debug, Deserialize)]
pub struct UpstreamError {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnhanceRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnhanceResponse {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FragmentEvent {
    pub text: String,
}

/// Settings as exposed over HTTP: the credential itself never leaves the process.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub provider: String,
    pub model: String,
    pub endpoint: Option<String>,
    pub api_key_configured: bool,
}

impl From<&LlmConfig> for SettingsView {
    fn from(config: &LlmConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            api_key_configured: !config.api_key.trim().is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_content_reads_first_choice() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"first"}},{"message":{"content":"second"}}]}"#,
        )
        .expect("valid completion");

        assert_eq!(response.into_content().as_deref(), Some("first"));
    }

    #[test]
    fn completion_without_choices_has_no_content() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"id":"x"}"#).expect("valid completion");
        assert_eq!(response.into_content(), None);
    }

    #[test]
    fn chat_request_omits_unset_options() {
        let request = ChatCompletionRequest {
            model: "local".to_owned(),
            messages: vec![ChatMessage::user("hi")],
            temperature: None,
            max_tokens: None,
            stream: None,
        };

        let value = serde_json::to_value(&request).expect("serializable");
        assert_eq!(
            value,
            serde_json::json!({"model": "local", "messages": [{"role": "user", "content": "hi"}]})
        );
    }

    #[test]
    fn settings_view_hides_the_key() {
        let config = LlmConfig {
            api_key: "sk-secret".to_owned(),
            ..LlmConfig::default()
        };
        let view = SettingsView::from(&config);
        let json = serde_json::to_string(&view).expect("serializable");

        assert!(view.api_key_configured);
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("apiKeyConfigured"));
    }
}
