use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::SharedLogger;
use crate::models::{advertised_models, ModelList};
use crate::proxy;
use crate::translate::types::{ErrorResponse, InboundRequest};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/test", post(handle_smoke_test))
        .route("/diagnose", get(handle_diagnose))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(err: &ProxyError) -> Response {
    let (status, body) = err.status_and_body();
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let log = state.logger.for_request();

    let req: InboundRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            log.error("server", format!("Failed to parse request: {e}"));
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    log.info(
        "server",
        format!(
            "Request: model={} streaming={} messages={}",
            req.model.as_deref().unwrap_or("-"),
            req.is_streaming(),
            req.messages.len()
        ),
    );

    if req.is_streaming() {
        match proxy::proxy_streaming(&req, &state.config, &state.client, &log).await {
            Ok(frames) => {
                let events = frames.map(|frame| -> Result<Event, Infallible> {
                    Ok(Event::default().data(frame.payload()))
                });
                Sse::new(events)
                    .keep_alive(KeepAlive::default())
                    .into_response()
            }
            Err(e) => error_response(&e),
        }
    } else {
        match proxy::proxy_non_streaming(&req, &state.config, &state.client, &log).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => error_response(&e),
        }
    }
}

async fn handle_smoke_test(State(state): State<Arc<AppState>>) -> Response {
    let log = state.logger.for_request();
    match proxy::smoke_test(&state.config, &state.client, &log).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_diagnose(State(state): State<Arc<AppState>>) -> Response {
    Json(proxy::diagnose(&state.config, &state.client, &state.logger).await).into_response()
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "model": config.models.advertised,
        "upstream_models": config.models.candidates,
        "features": {
            "reasoning_display": config.features.reasoning_display,
            "thinking_mode": config.features.thinking_mode,
            "system_prompt_injection": config.features.system_prompt_injection,
        },
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(advertised_models(&state.config))
}
