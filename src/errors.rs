use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::{BackendError, Provider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhanceMode {
    OneShot,
    Streaming,
}

impl EnhanceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EnhanceMode::OneShot => "oneshot",
            EnhanceMode::Streaming => "streaming",
        }
    }
}

impl fmt::Display for EnhanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("unsupported provider `{provider}` for {mode} enhancement")]
    UnsupportedProvider { provider: String, mode: EnhanceMode },
    #[error("{provider} request failed: {source}")]
    BackendRequest {
        provider: Provider,
        #[source]
        source: BackendError,
    },
}

impl EnhanceError {
    pub fn backend(provider: Provider, source: BackendError) -> Self {
        EnhanceError::BackendRequest { provider, source }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Enhance(#[from] EnhanceError),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: &'static str,
}

impl ErrorEnvelope {
    pub fn new(error_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                error_type,
            },
        }
    }
}

impl AppError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            AppError::Enhance(EnhanceError::UnsupportedProvider { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_provider")
            }
            AppError::Enhance(EnhanceError::BackendRequest { .. }) => {
                (StatusCode::BAD_GATEWAY, "backend_error")
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        (status, Json(ErrorEnvelope::new(error_type, self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_provider_message_names_provider_and_mode() {
        let error = EnhanceError::UnsupportedProvider {
            provider: "lmstudio".to_owned(),
            mode: EnhanceMode::Streaming,
        };
        assert_eq!(
            error.to_string(),
            "unsupported provider `lmstudio` for streaming enhancement"
        );
    }

    #[test]
    fn mode_has_one_spelling() {
        for mode in [EnhanceMode::OneShot, EnhanceMode::Streaming] {
            assert_eq!(mode.to_string(), mode.as_str());
        }
        let error = EnhanceError::UnsupportedProvider {
            provider: "gemini".to_owned(),
            mode: EnhanceMode::OneShot,
        };
        assert_eq!(
            error.to_string(),
            "unsupported provider `gemini` for oneshot enhancement"
        );
    }

    #[test]
    fn app_errors_map_to_statuses() {
        let unsupported = AppError::from(EnhanceError::UnsupportedProvider {
            provider: "nope".to_owned(),
            mode: EnhanceMode::OneShot,
        });
        let backend = AppError::from(EnhanceError::backend(
            Provider::Ollama,
            BackendError::Unavailable("connection refused".to_owned()),
        ));

        assert_eq!(
            unsupported.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(backend.into_response().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::BadRequest("empty".to_owned()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
