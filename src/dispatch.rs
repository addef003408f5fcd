//! Backend dispatch: translated requests out over the configured wire protocol,
//! backend replies lifted back into Anthropic shapes.
//!
//! Non-streaming requests go out as a single wire body and the reply lifts
//! through [`crate::translate::response`]. Streaming requests return an
//! [`SseStream`] of Anthropic events produced by feeding upstream SSE frames
//! through the stream translators as they arrive.

use crate::backends::WireProtocol;
use crate::chat::ChatRequest;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::SharedLog;
use crate::translate::anthropic_types::{
    ErrorResponse, MessagesRequest, MessagesResponse, StreamEvent,
};
use crate::translate::chat_types::{
    ChatCompletionChunk, ChatCompletionResponse, ChatErrorResponse,
};
use crate::translate::delta_stream::{chunk_to_delta, DeltaStreamTranslator};
use crate::translate::item_stream::ItemStreamTranslator;
use crate::translate::item_types::{ResponsesResponse, ResponsesStreamEvent};
use crate::translate::request::{to_canonical, to_chat_wire, to_responses_wire, TranslateOptions};
use crate::translate::response::{
    backend_error_to_anthropic, chat_to_canonical, items_to_canonical, to_messages,
};
use crate::translate::{error_event, StreamMeta};

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{self, Stream};
use futures::StreamExt;
use std::pin::Pin;

/// Outcome of dispatching a non-streaming request.
pub enum DispatchOutcome {
    Success(MessagesResponse),
    Error(ErrorResponse, u16),
}

/// Outcome of dispatching a streaming request: a stream of Anthropic SSE events.
pub type SseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send>>;

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    fn from_stream_event(event: &StreamEvent) -> Option<SseEvent> {
        let data = serde_json::to_string(event).ok()?;
        Some(SseEvent {
            event: event.event_name().to_string(),
            data,
        })
    }
}

/// Dispatch a non-streaming Anthropic request to the configured backend.
pub async fn send_message(
    req: &MessagesRequest,
    config: &GatewayConfig,
    client: &reqwest::Client,
    log: &SharedLog,
) -> Result<DispatchOutcome> {
    let api_key = config.resolve_api_key()?;
    let protocol = config.wire_protocol()?;
    let url = endpoint(config, protocol)?;

    let mut canonical = to_canonical(req, &TranslateOptions::default())?;
    apply_drop_list(&mut canonical, config);
    let body = wire_body(&canonical, config, protocol)?;
    let model = body
        .get("model")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(&canonical.model)
        .to_string();

    log.info("dispatch", format!("POST {} model={}", url, model));

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = response.status().as_u16();
    let text = response.text().await?;

    log.debug(
        "dispatch",
        format!("Response status={} body_len={}", status, text.len()),
    );

    if status >= 400 {
        if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(&text) {
            log.warn("dispatch", format!("Backend error: {}", err.error.message));
            return Ok(DispatchOutcome::Error(
                backend_error_to_anthropic(status, &err.error),
                status,
            ));
        }

        let fallback = ErrorResponse::api_error(format!(
            "Backend returned status {}: {}",
            status,
            excerpt(&text, 500)
        ));
        return Ok(DispatchOutcome::Error(fallback, status));
    }

    let canonical_resp = match protocol {
        WireProtocol::Chat => {
            let wire: ChatCompletionResponse = serde_json::from_str(&text).map_err(|e| {
                GatewayError::upstream(
                    "api_error",
                    format!(
                        "Unparseable backend response: {}. Body: {}",
                        e,
                        excerpt(&text, 300)
                    ),
                )
            })?;
            chat_to_canonical(&wire)
        }
        WireProtocol::Responses => {
            let wire: ResponsesResponse = serde_json::from_str(&text).map_err(|e| {
                GatewayError::upstream(
                    "api_error",
                    format!(
                        "Unparseable backend response: {}. Body: {}",
                        e,
                        excerpt(&text, 300)
                    ),
                )
            })?;
            match items_to_canonical(&wire) {
                Ok(resp) => resp,
                // A "failed" status arrives on a 200; report it as a backend error.
                Err(e) => {
                    log.warn("dispatch", format!("Backend reported failure: {}", e));
                    let message = match &e {
                        GatewayError::UpstreamProtocol { message, .. } => message.clone(),
                        _ => e.to_string(),
                    };
                    return Ok(DispatchOutcome::Error(
                        ErrorResponse::new(e.error_type(), message),
                        502,
                    ));
                }
            }
        }
    };

    let anthropic_resp = to_messages(&canonical_resp, &req.model);

    log.info(
        "dispatch",
        format!(
            "Completed: in={} out={} tokens",
            anthropic_resp.usage.input_tokens, anthropic_resp.usage.output_tokens
        ),
    );

    Ok(DispatchOutcome::Success(anthropic_resp))
}

/// Dispatch a streaming Anthropic request, returning a stream of Anthropic SSE events.
pub async fn stream_message(
    req: &MessagesRequest,
    config: &GatewayConfig,
    client: &reqwest::Client,
    log: &SharedLog,
) -> Result<SseStream> {
    let api_key = config.resolve_api_key()?;
    let protocol = config.wire_protocol()?;
    let url = endpoint(config, protocol)?;

    let mut canonical = to_canonical(req, &TranslateOptions::default())?;
    apply_drop_list(&mut canonical, config);
    let body = wire_body(&canonical, config, protocol)?;

    log.info("dispatch", format!("POST {} (streaming)", url));

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = response.status().as_u16();

    if status >= 400 {
        let text = response.text().await.unwrap_or_default();
        log.warn(
            "dispatch",
            format!("Streaming error status={}: {}", status, excerpt(&text, 300)),
        );

        let error_body = if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(&text) {
            backend_error_to_anthropic(status, &err.error)
        } else {
            ErrorResponse::api_error(format!("Backend returned status {}", status))
        };

        let data = serde_json::to_string(&error_body).unwrap_or_default();
        let event = SseEvent {
            event: "error".to_string(),
            data,
        };
        return Ok(Box::pin(stream::once(async move { Ok(event) })));
    }

    let meta = StreamMeta::new(&req.model);
    let bytes = response.bytes_stream();

    let events: SseStream = match protocol {
        WireProtocol::Chat => Box::pin(chat_event_stream(bytes, meta, log.clone())),
        WireProtocol::Responses => Box::pin(item_event_stream(bytes, meta, log.clone())),
    };
    Ok(events)
}

/// Translate a chat-protocol SSE byte stream into Anthropic SSE events.
pub fn chat_event_stream(
    source: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    meta: StreamMeta,
    log: SharedLog,
) -> impl Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut translator = DeltaStreamTranslator::new(meta);

        for sse in sse_batch(&translator.begin()) {
            yield Ok(sse);
        }

        let frames = source.eventsource();
        tokio::pin!(frames);

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    log.error("stream", format!("Byte stream error: {}", e));
                    break;
                }
            };

            if frame.data == "[DONE]" {
                break;
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(&frame.data) {
                Ok(c) => c,
                Err(e) => {
                    // Some backends push their error envelope as a data frame
                    // inside an otherwise healthy stream.
                    if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(&frame.data) {
                        log.warn(
                            "stream",
                            format!("Backend mid-stream error: {}", err.error.message),
                        );
                        let body = backend_error_to_anthropic(502, &err.error);
                        if let Ok(data) = serde_json::to_string(&body) {
                            yield Ok(SseEvent { event: "error".to_string(), data });
                        }
                        return;
                    }
                    log.debug("stream", format!("Skipping unparseable chunk: {}", e));
                    continue;
                }
            };

            let delta = chunk_to_delta(&chunk);
            match translator.feed(&delta) {
                Ok(events) => {
                    for sse in sse_batch(&events) {
                        yield Ok(sse);
                    }
                }
                Err(e) => {
                    log.error("stream", format!("{}", e));
                    if let Some(sse) = SseEvent::from_stream_event(&error_event(&e)) {
                        yield Ok(sse);
                    }
                    return;
                }
            }
        }

        for sse in sse_batch(&translator.end_of_source()) {
            yield Ok(sse);
        }

        log.info("stream", "Chat stream completed");
    }
}

/// Translate a responses-protocol SSE byte stream into Anthropic SSE events.
pub fn item_event_stream(
    source: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    meta: StreamMeta,
    log: SharedLog,
) -> impl Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut translator = ItemStreamTranslator::new(meta);

        let frames = source.eventsource();
        tokio::pin!(frames);

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    log.error("stream", format!("Byte stream error: {}", e));
                    break;
                }
            };

            if frame.data == "[DONE]" {
                break;
            }

            // Unknown event kinds parse into `Other`, so a parse failure here
            // means malformed JSON rather than a new event type.
            let event: ResponsesStreamEvent = match serde_json::from_str(&frame.data) {
                Ok(ev) => ev,
                Err(e) => {
                    log.debug("stream", format!("Skipping unparseable event: {}", e));
                    continue;
                }
            };

            match translator.feed(&event) {
                Ok(events) => {
                    for sse in sse_batch(&events) {
                        yield Ok(sse);
                    }
                }
                Err(e) => {
                    log.warn("stream", format!("Backend stream failed: {}", e));
                    if let Some(sse) = SseEvent::from_stream_event(&error_event(&e)) {
                        yield Ok(sse);
                    }
                    return;
                }
            }
        }

        for sse in sse_batch(&translator.end_of_source()) {
            yield Ok(sse);
        }

        log.info("stream", "Item stream completed");
    }
}

/// Upstream endpoint for the active wire protocol.
fn endpoint(config: &GatewayConfig, protocol: WireProtocol) -> Result<String> {
    let base = config.effective_base_url()?;
    let path = match protocol {
        WireProtocol::Chat => "chat/completions",
        WireProtocol::Responses => "responses",
    };
    Ok(format!("{}/{}", base.trim_end_matches('/'), path))
}

/// Strip config-dropped passthrough fields before the wire projection sees them.
fn apply_drop_list(req: &mut ChatRequest, config: &GatewayConfig) {
    for key in &config.params.drop {
        req.extra.remove(key.as_str());
    }
}

/// Project the canonical request onto the backend's wire format as a JSON body.
fn wire_body(
    canonical: &ChatRequest,
    config: &GatewayConfig,
    protocol: WireProtocol,
) -> Result<serde_json::Value> {
    let body = match protocol {
        WireProtocol::Chat => serde_json::to_value(to_chat_wire(canonical, &config.models))?,
        WireProtocol::Responses => {
            serde_json::to_value(to_responses_wire(canonical, &config.models))?
        }
    };
    Ok(body)
}

/// Serialize a batch of translated events for the SSE writer. A `ping` rides
/// directly behind every `message_start`, matching the event order Anthropic
/// streams open with.
fn sse_batch(events: &[StreamEvent]) -> Vec<SseEvent> {
    let mut out = Vec::with_capacity(events.len() + 1);
    for event in events {
        let starts_message = matches!(event, StreamEvent::MessageStart { .. });
        if let Some(sse) = SseEvent::from_stream_event(event) {
            out.push(sse);
        }
        if starts_message {
            if let Some(ping) = SseEvent::from_stream_event(&StreamEvent::Ping) {
                out.push(ping);
            }
        }
    }
    out
}

/// Byte-bounded prefix of `s`, backed off to the nearest char boundary.
fn excerpt(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ParamsConfig};
    use serde_json::json;
    use std::collections::HashMap;

    fn test_config(protocol: &str) -> GatewayConfig {
        GatewayConfig {
            port: 4333,
            backend: BackendConfig {
                name: "custom".to_string(),
                base_url: Some("https://backend.test/v1/".to_string()),
                api_key_env: "TEST_KEY".to_string(),
                protocol: Some(protocol.to_string()),
            },
            models: HashMap::new(),
            params: ParamsConfig::default(),
        }
    }

    fn test_log() -> (tempfile::TempDir, SharedLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = SharedLog::new(dir.path().join("dispatch-test.log")).unwrap();
        (dir, log)
    }

    #[test]
    fn test_endpoint_per_protocol() {
        let config = test_config("chat");

        assert_eq!(
            endpoint(&config, WireProtocol::Chat).unwrap(),
            "https://backend.test/v1/chat/completions"
        );
        assert_eq!(
            endpoint(&config, WireProtocol::Responses).unwrap(),
            "https://backend.test/v1/responses"
        );
    }

    #[test]
    fn test_drop_list_strips_configured_fields() {
        let mut config = test_config("chat");
        config.params.drop = vec!["betas".to_string(), "mcp_servers".to_string()];

        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}],
            "betas": ["tools-2025"],
            "service_tier": "priority"
        }))
        .unwrap();

        let mut canonical = to_canonical(&req, &TranslateOptions::default()).unwrap();
        assert!(canonical.extra.contains_key("betas"));

        apply_drop_list(&mut canonical, &config);
        assert!(!canonical.extra.contains_key("betas"));
        assert_eq!(canonical.extra.get("service_tier"), Some(&json!("priority")));
    }

    #[test]
    fn test_ping_follows_message_start() {
        let meta = StreamMeta::new("claude-sonnet-4-20250514");
        let mut translator = DeltaStreamTranslator::new(meta);
        let events = sse_batch(&translator.begin());

        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["message_start", "ping", "content_block_start"]);
        assert!(events[1].data.contains("\"type\":\"ping\""));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        // Byte 2 lands inside the two-byte 'é'.
        assert_eq!(excerpt("héllo", 2), "h");
        assert_eq!(excerpt("short", 500), "short");
    }

    #[tokio::test]
    async fn test_chat_stream_translates_frames() {
        let (_dir, log) = test_log();

        let frames: Vec<std::result::Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from(
                "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
            )),
            Ok(Bytes::from(
                "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}]}\n\n",
            )),
            Ok(Bytes::from(
                "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":2,\"total_tokens\":11}}\n\n",
            )),
            Ok(Bytes::from("data: [DONE]\n\n")),
        ];

        let meta = StreamMeta::new("claude-sonnet-4-20250514");
        let events: Vec<SseEvent> = chat_event_stream(stream::iter(frames), meta, log)
            .map(|r| r.unwrap())
            .collect()
            .await;

        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(events[3].data.contains("Hello"));
        assert!(events[5].data.contains("\"output_tokens\":2"));
        assert!(events[5].data.contains("\"input_tokens\":9"));
    }

    #[tokio::test]
    async fn test_chat_stream_forwards_backend_error() {
        let (_dir, log) = test_log();

        let frames: Vec<std::result::Result<Bytes, reqwest::Error>> = vec![Ok(Bytes::from(
            "data: {\"error\":{\"message\":\"tokens exhausted\",\"type\":\"rate_limit_exceeded\"}}\n\n",
        ))];

        let meta = StreamMeta::new("claude-sonnet-4-20250514");
        let events: Vec<SseEvent> = chat_event_stream(stream::iter(frames), meta, log)
            .map(|r| r.unwrap())
            .collect()
            .await;

        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            names,
            vec!["message_start", "ping", "content_block_start", "error"]
        );
        let last = events.last().unwrap();
        assert!(last.data.contains("rate_limit_error"));
        assert!(last.data.contains("tokens exhausted"));
    }

    #[tokio::test]
    async fn test_item_stream_reports_failure() {
        let (_dir, log) = test_log();

        let frames: Vec<std::result::Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from(
                "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\",\"model\":\"gpt-4o\"}}\n\n",
            )),
            Ok(Bytes::from(
                "data: {\"type\":\"response.failed\",\"response\":{\"id\":\"resp_1\",\"model\":\"gpt-4o\",\"status\":\"failed\",\"error\":{\"code\":\"server_error\",\"message\":\"backend exploded\"}}}\n\n",
            )),
        ];

        let meta = StreamMeta::new("claude-sonnet-4-20250514");
        let events: Vec<SseEvent> = item_event_stream(stream::iter(frames), meta, log)
            .map(|r| r.unwrap())
            .collect()
            .await;

        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["message_start", "ping", "error"]);
        assert!(events[2].data.contains("backend exploded"));
    }

    #[tokio::test]
    async fn test_stream_message_requires_api_key() {
        let (_dir, log) = test_log();
        let mut config = test_config("chat");
        config.backend.api_key_env = "SWITCHBOARD_TEST_UNSET_KEY".to_string();

        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .unwrap();

        let client = reqwest::Client::new();
        let err = stream_message(&req, &config, &client, &log)
            .await
            .err()
            .unwrap();
        assert_eq!(err.error_type(), "api_error");
    }
}
