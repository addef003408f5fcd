use crate::config::GatewayConfig;
use crate::dispatch::{self, DispatchOutcome};
use crate::error::GatewayError;
use crate::logging::SharedLog;
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
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
    pub config: GatewayConfig,
    pub client: reqwest::Client,
    pub log: SharedLog,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    // Parse by hand so malformed bodies get an Anthropic-shaped 400.
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state
                .log
                .error("server", format!("Failed to parse request: {}", e));
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {}", e));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    state.log.info(
        "server",
        format!(
            "Request: model={} streaming={} messages={}",
            req.model,
            is_streaming,
            req.messages.len()
        ),
    );

    if is_streaming {
        handle_streaming(state, &req).await
    } else {
        handle_non_streaming(state, &req).await
    }
}

async fn handle_non_streaming(state: Arc<AppState>, req: &MessagesRequest) -> Response {
    match dispatch::send_message(req, &state.config, &state.client, &state.log).await {
        Ok(DispatchOutcome::Success(resp)) => Json(resp).into_response(),
        Ok(DispatchOutcome::Error(err, status_code)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(err)).into_response()
        }
        Err(e) => {
            state.log.error("server", format!("Dispatch error: {}", e));
            gateway_error_response(&e)
        }
    }
}

async fn handle_streaming(state: Arc<AppState>, req: &MessagesRequest) -> Response {
    let sse_stream =
        match dispatch::stream_message(req, &state.config, &state.client, &state.log).await {
            Ok(s) => s,
            Err(e) => {
                state
                    .log
                    .error("server", format!("Streaming setup error: {}", e));
                return gateway_error_response(&e);
            }
        };

    let event_stream = sse_stream.map(|result| -> std::result::Result<Event, Infallible> {
        match result {
            Ok(sse_event) => Ok(Event::default().event(sse_event.event).data(sse_event.data)),
            Err(_) => Ok(Event::default().event("error").data("{}")),
        }
    });

    Sse::new(event_stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response()
}

/// Map a gateway error onto the wire: client mistakes are 400s, everything
/// else surfaces as a bad gateway.
fn gateway_error_response(e: &GatewayError) -> Response {
    let status = if e.error_type() == "invalid_request_error" {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    };
    let body = ErrorResponse::new(e.error_type(), e.to_string());
    (status, Json(body)).into_response()
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.config.backend.name,
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .config
        .models
        .keys()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": state.config.backend.name,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}
