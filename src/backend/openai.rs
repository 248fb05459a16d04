use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::{
    backend::{
        checked, model_or, BackendError, EnhanceBackend, FragmentStream, Provider,
        ENHANCE_INSTRUCTION,
    },
    errors::EnhanceError,
    models::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage},
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1000;

#[derive(Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.trim().to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: model_or(model, DEFAULT_MODEL),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn payload(&self, text: &str, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(format!(
                    "You are a helpful writing assistant. {ENHANCE_INSTRUCTION}."
                )),
                ChatMessage::user(text),
            ],
            temperature: Some(TEMPERATURE),
            max_tokens: Some(MAX_TOKENS),
            stream: Some(stream),
        }
    }

    async fn send(&self, payload: &ChatCompletionRequest) -> Result<reqwest::Response, BackendError> {
        let mut request = self.client.post(self.url("/chat/completions")).json(payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await.map_err(BackendError::transport)?;
        checked(response).await
    }
}

#[async_trait]
impl EnhanceBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn enhance(&self, text: &str) -> Result<String, BackendError> {
        let response = self.send(&self.payload(text, false)).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;

        parsed.into_content().ok_or_else(|| {
            BackendError::InvalidResponse("missing choices[0].message.content".to_owned())
        })
    }

    async fn stream_enhance(&self, text: &str) -> Result<FragmentStream, EnhanceError> {
        let response = self
            .send(&self.payload(text, true))
            .await
            .map_err(|source| EnhanceError::backend(self.provider(), source))?;

        let mut upstream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        let stream = async_stream::stream! {
            let mut done = false;
            let mut finished = false;
            let mut failed = false;
            'read: while let Some(next) = upstream.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        yield Err(BackendError::transport(error));
                        failed = true;
                        break;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(index) = buffer.iter().position(|byte| *byte == b'\n') {
                    let raw = buffer.drain(..=index).collect::<Vec<u8>>();
                    match decode_line(&raw) {
                        Ok(EventLine::Skip) => {}
                        Ok(EventLine::Done) => {
                            done = true;
                            break 'read;
                        }
                        Ok(EventLine::Chunk { fragment, finish }) => {
                            finished |= finish;
                            if let Some(fragment) = fragment {
                                yield Ok(fragment);
                            }
                        }
                        Err(error) => {
                            yield Err(error);
                            failed = true;
                            break 'read;
                        }
                    }
                }
            }

            // A last event without a trailing newline.
            if !done && !failed && !buffer.is_empty() {
                match decode_line(&buffer) {
                    Ok(EventLine::Skip) => {}
                    Ok(EventLine::Done) => done = true,
                    Ok(EventLine::Chunk { fragment, finish }) => {
                        finished |= finish;
                        if let Some(fragment) = fragment {
                            yield Ok(fragment);
                        }
                    }
                    Err(error) => {
                        yield Err(error);
                        failed = true;
                    }
                }
            }

            // A body that closes without `[DONE]` or a finish reason was cut short.
            if !done && !finished && !failed {
                yield Err(BackendError::InvalidResponse(
                    "stream ended before [DONE]".to_owned(),
                ));
            }
        };

        debug!(provider = %self.provider(), model = %self.model, "stream prepared");
        Ok(stream.boxed())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum EventLine {
    Skip,
    Done,
    Chunk {
        fragment: Option<String>,
        finish: bool,
    },
}

fn decode_line(raw: &[u8]) -> Result<EventLine, BackendError> {
    let line = std::str::from_utf8(raw)
        .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;
    parse_event_line(line.trim())
}

/// Interprets one line of a chat-completion event stream.
///
/// An `error` object in place of a chunk ends the stream with
/// [`BackendError::InvalidResponse`].
fn parse_event_line(line: &str) -> Result<EventLine, BackendError> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(EventLine::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(EventLine::Done);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(payload)
        .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;
    if let Some(error) = chunk.error {
        let message = match error.error_type {
            Some(kind) => format!("upstream {kind}: {}", error.message),
            None => format!("upstream error: {}", error.message),
        };
        return Err(BackendError::InvalidResponse(message));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(EventLine::Chunk {
            fragment: None,
            finish: false,
        });
    };
    Ok(EventLine::Chunk {
        fragment: choice.delta.content.filter(|content| !content.is_empty()),
        finish: choice.finish_reason.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new(reqwest::Client::new(), "http://localhost/v1/", " sk-test ", "")
    }

    #[test]
    fn payload_carries_instruction_and_fixed_sampling() {
        let value = serde_json::to_value(backend().payload("i has a error", false))
            .expect("serializable");

        assert_eq!(value["model"], "gpt-3.5-turbo");
        assert_eq!(value["max_tokens"], 1000);
        assert_eq!(value["stream"], false);
        assert!((value["temperature"].as_f64().expect("number") - 0.7).abs() < 1e-6);
        assert_eq!(value["messages"][0]["role"], "system");
        assert!(value["messages"][0]["content"]
            .as_str()
            .expect("string")
            .contains("clear, concise, and professional"));
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "i has a error");
    }

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(
            backend().url("/chat/completions"),
            "http://localhost/v1/chat/completions"
        );
    }

    fn chunk(fragment: Option<&str>, finish: bool) -> EventLine {
        EventLine::Chunk {
            fragment: fragment.map(str::to_owned),
            finish,
        }
    }

    #[test]
    fn event_lines_yield_non_empty_deltas() {
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).expect("valid"),
            chunk(Some("Hi"), false)
        );
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#).expect("valid"),
            chunk(None, false)
        );
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#)
                .expect("valid"),
            chunk(None, false)
        );
        assert_eq!(parse_event_line(": keep-alive").expect("valid"), EventLine::Skip);
        assert_eq!(parse_event_line("data: [DONE]").expect("valid"), EventLine::Done);
    }

    #[test]
    fn finish_reason_marks_the_chunk_final() {
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
                .expect("valid"),
            chunk(None, true)
        );
        assert_eq!(
            parse_event_line(r#"data: {"choices":[{"delta":{"content":"."},"finish_reason":null}]}"#)
                .expect("valid"),
            chunk(Some("."), false)
        );
    }

    #[test]
    fn error_object_is_invalid_response() {
        let error = parse_event_line(
            r#"data: {"error":{"message":"server overloaded","type":"server_error"}}"#,
        )
        .expect_err("error payload must fail");

        match error {
            BackendError::InvalidResponse(message) => {
                assert!(message.contains("server overloaded"));
                assert!(message.contains("server_error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_event_is_invalid_response() {
        assert!(matches!(
            parse_event_line("data: {not json"),
            Err(BackendError::InvalidResponse(_))
        ));
    }

    #[test]
    fn non_utf8_line_is_invalid_response() {
        assert!(matches!(
            decode_line(&[b'd', b'a', 0xff, b'\n']),
            Err(BackendError::InvalidResponse(_))
        ));
        assert_eq!(
            decode_line(b"data: [DONE]\r\n").expect("valid"),
            EventLine::Done
        );
    }
}
