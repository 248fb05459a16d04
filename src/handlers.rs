use std::{convert::Infallible, time::Instant};

use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::LlmConfig,
    errors::{AppError, EnhanceError, EnhanceMode, ErrorEnvelope},
    models::{EnhanceRequest, EnhanceResponse, FragmentEvent, SettingsView},
    state::AppState,
};

const ENHANCE_PATH: &str = "/v1/enhance";
const ENHANCE_STREAM_PATH: &str = "/v1/enhance/stream";

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

pub async fn enhance(State(state): State<AppState>, Json(request): Json<EnhanceRequest>) -> Response {
    let started = Instant::now();
    let response = match one_shot(&state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    };
    state.metrics.observe_request(
        ENHANCE_PATH,
        "POST",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

pub async fn enhance_stream(
    State(state): State<AppState>,
    Json(request): Json<EnhanceRequest>,
) -> Response {
    let started = Instant::now();
    let response = match streaming(&state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    };
    state.metrics.observe_request(
        ENHANCE_STREAM_PATH,
        "POST",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsView> {
    Json(SettingsView::from(&state.enhancer.config()))
}

pub async fn put_settings(
    State(state): State<AppState>,
    Json(config): Json<LlmConfig>,
) -> Result<Json<SettingsView>, AppError> {
    state.store.save(&config).await.map_err(|error| {
        AppError::Internal(format!(
            "failed to save settings to {}: {error}",
            state.store.path().display()
        ))
    })?;
    let view = SettingsView::from(&config);
    state.enhancer.replace_config(config);
    Ok(Json(view))
}

fn require_text(request: EnhanceRequest) -> Result<String, AppError> {
    if request.text.trim().is_empty() {
        return Err(AppError::BadRequest(
            "no text to enhance; select some text first".to_owned(),
        ));
    }
    Ok(request.text)
}

async fn one_shot(state: &AppState, request: EnhanceRequest) -> Result<Response, AppError> {
    let text = require_text(request)?;
    let session = state.enhancer.session();
    let config = session.config();
    let request_id = format!("enh_{}", Uuid::new_v4());
    let _inflight = state.metrics.inflight_guard();
    info!(
        request_id = %request_id,
        provider = %config.provider,
        model = %config.model,
        mode = EnhanceMode::OneShot.as_str(),
        "enhance request accepted"
    );

    let enhanced = session.enhance(&text).await.map_err(|error| {
        observe_failure(state, &config.provider, EnhanceMode::OneShot.as_str(), &error);
        AppError::from(error)
    })?;

    Ok(Json(EnhanceResponse {
        id: request_id,
        provider: config.provider.clone(),
        model: config.model.clone(),
        text: enhanced,
    })
    .into_response())
}

async fn streaming(state: &AppState, request: EnhanceRequest) -> Result<Response, AppError> {
    let text = require_text(request)?;
    let session = state.enhancer.session();
    let config = session.config();
    let request_id = format!("enh_{}", Uuid::new_v4());
    info!(
        request_id = %request_id,
        provider = %config.provider,
        model = %config.model,
        mode = EnhanceMode::Streaming.as_str(),
        "enhance request accepted"
    );

    let mut fragments = session.fragments(&text).await.map_err(|error| {
        observe_failure(state, &config.provider, "stream_start", &error);
        AppError::from(error)
    })?;

    let metrics = state.metrics.clone();
    let provider = config.provider.clone();
    let outbound = async_stream::stream! {
        let _inflight = metrics.inflight_guard();
        let mut delivered = 0usize;
        while let Some(next) = fragments.next().await {
            match next {
                Ok(fragment) => {
                    delivered += 1;
                    metrics.observe_fragment(&provider);
                    yield Ok::<Event, Infallible>(json_event("chunk", &FragmentEvent { text: fragment }));
                }
                Err(error) => {
                    metrics.observe_backend_error(&provider, "stream_read");
                    warn!(request_id = %request_id, fragments = delivered, error = %error, "backend stream error");
                    let envelope = ErrorEnvelope::new(
                        "backend_error",
                        format!("{provider} request failed: {error}"),
                    );
                    yield Ok::<Event, Infallible>(json_event("error", &envelope));
                    break;
                }
            }
        }

        yield Ok::<Event, Infallible>(Event::default().data("[DONE]"));
    };

    Ok(Sse::new(outbound)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(10)))
        .into_response())
}

fn observe_failure(state: &AppState, provider: &str, stage: &str, error: &EnhanceError) {
    if matches!(error, EnhanceError::BackendRequest { .. }) {
        state.metrics.observe_backend_error(provider, stage);
    }
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(serialized) => Event::default().event(name).data(serialized),
        Err(error) => {
            let fallback = ErrorEnvelope::new("server_error", format!("serialization error: {error}"));
            let data = serde_json::to_string(&fallback).unwrap_or_default();
            Event::default().event("error").data(data)
        }
    }
}
