use switchboard::config::{BackendConfig, GatewayConfig, ParamsConfig};
use switchboard::dispatch::{chat_event_stream, item_event_stream, SseEvent};
use switchboard::translate::anthropic_types::*;
use switchboard::translate::request::{
    to_canonical, to_chat_wire, to_responses_wire, TranslateOptions,
};
use switchboard::translate::StreamMeta;
use switchboard::{build_router, AppState, SharedLog};

use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;

fn openai_config() -> GatewayConfig {
    let mut models = HashMap::new();
    models.insert(
        "claude-sonnet-4-20250514".to_string(),
        "gpt-4o-mini".to_string(),
    );
    models.insert("test-model".to_string(), "gpt-4o-mini".to_string());

    GatewayConfig {
        port: 0,
        backend: BackendConfig {
            name: "openai".to_string(),
            base_url: Some("https://api.openai.com/v1".to_string()),
            api_key_env: "OPENAI_API_KEY".to_string(),
            protocol: Some("chat".to_string()),
        },
        models,
        params: ParamsConfig::default(),
    }
}

fn responses_config() -> GatewayConfig {
    let mut config = openai_config();
    config.backend.name = "openai-responses".to_string();
    config.backend.protocol = Some("responses".to_string());
    config
}

fn simple_request(model: &str, prompt: &str) -> MessagesRequest {
    MessagesRequest {
        model: model.to_string(),
        max_tokens: Some(50),
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text(prompt.to_string()),
        }],
        system: Some(SystemContent::Text(
            "You are a helpful assistant. Respond very briefly.".to_string(),
        )),
        stream: None,
        temperature: Some(0.0),
        top_p: None,
        top_k: None,
        tools: None,
        tool_choice: None,
        metadata: None,
        stop_sequences: None,
        thinking: None,
        extra: serde_json::Map::new(),
    }
}

fn streaming_request(model: &str, prompt: &str) -> MessagesRequest {
    let mut req = simple_request(model, prompt);
    req.stream = Some(true);
    req
}

fn tool_request() -> MessagesRequest {
    let mut req = simple_request("test-model", "What's the weather in London? Use the tool.");
    req.max_tokens = Some(200);
    req.tools = Some(vec![Tool {
        name: "get_weather".to_string(),
        description: Some("Get current weather for a city".to_string()),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "city": {"type": "string", "description": "City name"}
            },
            "required": ["city"]
        }),
        tool_type: None,
    }]);
    req.tool_choice = Some(ToolChoice::Auto(ToolChoiceAuto {
        choice_type: "auto".to_string(),
    }));
    req
}

fn test_log(name: &str) -> SharedLog {
    let path = std::env::temp_dir().join(format!("switchboard-itest-{name}.log"));
    SharedLog::new(path).unwrap()
}

async fn spawn_server(config: GatewayConfig, name: &str) -> std::net::SocketAddr {
    let state = Arc::new(AppState {
        config,
        client: reqwest::Client::new(),
        log: test_log(name),
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

// ────────────────────────────────────────────────────────────────
// Translation tests (no API key needed)
// ────────────────────────────────────────────────────────────────

#[test]
fn test_request_translation_to_chat_wire() {
    let req = simple_request("claude-sonnet-4-20250514", "Hello");
    let mut model_map = HashMap::new();
    model_map.insert(
        "claude-sonnet-4-20250514".to_string(),
        "gpt-4o-mini".to_string(),
    );

    let canonical = to_canonical(&req, &TranslateOptions::default()).unwrap();
    // The canonical request keeps the caller's model name for response echoing.
    assert_eq!(canonical.model, "claude-sonnet-4-20250514");

    let wire = to_chat_wire(&canonical, &model_map);
    assert_eq!(wire.model, "gpt-4o-mini");
    assert_eq!(wire.messages.len(), 2);
    assert_eq!(wire.messages[0].role, "system");
    assert_eq!(wire.messages[1].role, "user");
    assert_eq!(wire.max_tokens, Some(50));
    assert!(wire.stream_options.is_none());
}

#[test]
fn test_request_translation_to_responses_wire() {
    let mut req = simple_request("claude-sonnet-4-20250514", "Hello");
    req.thinking = Some(ThinkingConfig::Enabled {
        budget_tokens: Some(1024),
    });
    let model_map = HashMap::new();

    let canonical = to_canonical(&req, &TranslateOptions::default()).unwrap();
    let wire = to_responses_wire(&canonical, &model_map);

    // Unmapped model names pass through unchanged.
    assert_eq!(wire.model, "claude-sonnet-4-20250514");
    assert!(wire
        .instructions
        .as_deref()
        .is_some_and(|s| s.contains("helpful assistant")));
    assert_eq!(wire.input.len(), 1);
    assert!(matches!(
        wire.input[0],
        switchboard::translate::item_types::InputItem::Message { ref role, .. } if role == "user"
    ));
    assert_eq!(wire.max_output_tokens, Some(50));
    assert_eq!(
        wire.reasoning.and_then(|r| r.effort),
        Some("low".to_string())
    );
}

#[test]
fn test_response_translation() {
    use switchboard::translate::chat_types::*;
    use switchboard::translate::response::{chat_to_canonical, to_messages};

    let wire = ChatCompletionResponse {
        id: "chatcmpl-test".to_string(),
        object: "chat.completion".to_string(),
        created: 12345,
        model: "gpt-4o-mini".to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some("Hello there!".to_string()),
                reasoning_content: None,
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: 5,
            completion_tokens: 3,
            total_tokens: 8,
            prompt_tokens_details: None,
        }),
    };

    let resp = to_messages(&chat_to_canonical(&wire), "claude-sonnet-4-20250514");

    assert_eq!(resp.response_type, "message");
    assert_eq!(resp.role, "assistant");
    assert_eq!(resp.model, "claude-sonnet-4-20250514");
    assert_eq!(resp.stop_reason, Some("end_turn".to_string()));
    assert_eq!(resp.usage.input_tokens, 5);
    assert_eq!(resp.usage.output_tokens, 3);
}

#[test]
fn test_tool_roundtrip_preserves_ids_order_and_signatures() {
    use switchboard::chat::{ChatResponse, FinishReason, ReasoningPart, TokenUsage, ToolCall};
    use switchboard::translate::response::to_messages;

    let backend_resp = ChatResponse {
        id: "chatcmpl-roundtrip".to_string(),
        model: "gpt-4o-mini".to_string(),
        text: "Checking two cities.".to_string(),
        reasoning: vec![ReasoningPart::Thinking {
            text: "plan the lookups".to_string(),
            signature: Some("sig_abc".to_string()),
        }],
        tool_calls: vec![
            ToolCall {
                id: "toolu_a".to_string(),
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"Paris\"}".to_string(),
            },
            ToolCall {
                id: "toolu_b".to_string(),
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"Oslo\"}".to_string(),
            },
        ],
        finish: Some(FinishReason::ToolCalls),
        usage: TokenUsage::default(),
    };

    let messages_resp = to_messages(&backend_resp, "claude-sonnet-4-20250514");
    assert_eq!(messages_resp.stop_reason, Some("tool_use".to_string()));

    // Replay the response content as the assistant turn of a follow-up request,
    // the way an Anthropic client would.
    let content_value = serde_json::to_value(&messages_resp.content).unwrap();
    let replayed: Vec<ContentBlock> = serde_json::from_value(content_value).unwrap();

    let req = MessagesRequest {
        model: "claude-sonnet-4-20250514".to_string(),
        max_tokens: Some(300),
        messages: vec![
            Message {
                role: Role::User,
                content: MessageContent::Text("Weather in Paris and Oslo?".to_string()),
            },
            Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(replayed),
            },
            Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![
                    ContentBlock::ToolResult {
                        tool_use_id: "toolu_b".to_string(),
                        content: Some(ToolResultContent::Text("4C".to_string())),
                        is_error: None,
                    },
                    ContentBlock::ToolResult {
                        tool_use_id: "toolu_a".to_string(),
                        content: Some(ToolResultContent::Text("18C".to_string())),
                        is_error: None,
                    },
                ]),
            },
        ],
        system: None,
        stream: None,
        temperature: None,
        top_p: None,
        top_k: None,
        tools: None,
        tool_choice: None,
        metadata: None,
        stop_sequences: None,
        thinking: None,
        extra: serde_json::Map::new(),
    };

    let canonical = to_canonical(&req, &TranslateOptions::default()).unwrap();
    assert_eq!(canonical.messages.len(), 4);

    let assistant = &canonical.messages[1];
    assert_eq!(assistant.content.flat_text(), "Checking two cities.");
    let ids: Vec<&str> = assistant.tool_calls.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["toolu_a", "toolu_b"]);
    assert_eq!(assistant.tool_calls[0].arguments, "{\"city\":\"Paris\"}");
    assert_eq!(
        assistant.reasoning[0],
        switchboard::chat::ReasoningPart::Thinking {
            text: "plan the lookups".to_string(),
            signature: Some("sig_abc".to_string()),
        }
    );
    // The thinking signature binds to the first tool call and nothing else.
    assert_eq!(
        assistant.signatures.get("toolu_a"),
        Some(&"sig_abc".to_string())
    );
    assert_eq!(assistant.signatures.get("toolu_b"), None);

    // Results keep first-appearance order, one tool message each.
    assert_eq!(canonical.messages[2].role, switchboard::chat::Role::Tool);
    assert_eq!(
        canonical.messages[2].tool_call_id,
        Some("toolu_b".to_string())
    );
    assert_eq!(
        canonical.messages[3].tool_call_id,
        Some("toolu_a".to_string())
    );
}

#[test]
fn test_anthropic_block_shapes_parse() {
    let req: MessagesRequest = serde_json::from_value(serde_json::json!({
        "model": "claude-sonnet-4-20250514",
        "max_tokens": 64,
        "messages": [
            {"role": "assistant", "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "s1"},
                {"type": "redacted_thinking", "data": "opaque"},
                {"type": "text", "text": "ok"}
            ]},
            {"role": "user", "content": [
                {"type": "image", "source": {"type": "url", "url": "https://example.com/x.png"}},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}},
                {"type": "text", "text": "what is this"}
            ]}
        ],
        "tool_choice": {"type": "tool", "name": "get_weather"},
        "service_tier": "priority"
    }))
    .unwrap();

    assert!(matches!(
        req.tool_choice,
        Some(ToolChoice::Specific(ref s)) if s.name == "get_weather"
    ));
    assert_eq!(
        req.extra.get("service_tier"),
        Some(&serde_json::json!("priority"))
    );

    let blocks = req.messages[0].content.blocks();
    assert!(matches!(blocks[0], ContentBlock::Thinking { .. }));
    assert!(matches!(blocks[1], ContentBlock::RedactedThinking { .. }));

    let user_blocks = req.messages[1].content.blocks();
    assert!(matches!(
        user_blocks[0],
        ContentBlock::Image { source: ImageSource::Url { .. } }
    ));
    assert!(matches!(
        user_blocks[1],
        ContentBlock::Image { source: ImageSource::Base64 { .. } }
    ));
}

#[test]
fn test_unknown_stream_event_kind_parses_to_other() {
    use switchboard::translate::item_types::ResponsesStreamEvent;

    let ev: ResponsesStreamEvent = serde_json::from_str(
        r#"{"type":"response.audio.delta","item_id":"x","delta":"zz"}"#,
    )
    .unwrap();
    assert!(matches!(ev, ResponsesStreamEvent::Other));
}

// ────────────────────────────────────────────────────────────────
// Stream translation through the dispatcher (no API key needed)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_stream_tool_call_sequence() {
    let payload = concat!(
        r#"data: {"id":"c1","object":"chat.completion.chunk","created":0,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"role":"assistant","content":"I'll check."},"finish_reason":null}]}"#,
        "\n\n",
        r#"data: {"id":"c1","object":"chat.completion.chunk","created":0,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_weather","arguments":""}}]},"finish_reason":null}]}"#,
        "\n\n",
        r#"data: {"id":"c1","object":"chat.completion.chunk","created":0,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]},"finish_reason":null}]}"#,
        "\n\n",
        r#"data: {"id":"c1","object":"chat.completion.chunk","created":0,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"NY\"}"}}]},"finish_reason":null}]}"#,
        "\n\n",
        r#"data: {"id":"c1","object":"chat.completion.chunk","created":0,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":20,"completion_tokens":15,"total_tokens":35}}"#,
        "\n\n",
        "data: [DONE]\n\n",
    );

    // Split mid-frame so reassembly across chunk boundaries is exercised too.
    let (head, tail) = payload.split_at(97);
    let frames: Vec<Result<Bytes, reqwest::Error>> = vec![
        Ok(Bytes::from(head.to_string())),
        Ok(Bytes::from(tail.to_string())),
    ];

    let meta = StreamMeta::new("claude-sonnet-4-20250514");
    let events: Vec<SseEvent> =
        chat_event_stream(futures::stream::iter(frames), meta, test_log("chat-stream"))
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
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    // Second block start opens the tool_use with the backend's call id.
    assert!(events[5].data.contains("\"tool_use\""));
    assert!(events[5].data.contains("call_1"));
    assert!(events[5].data.contains("get_weather"));
    assert!(events[6].data.contains("input_json_delta"));
    assert!(events[9].data.contains("\"tool_use\""));
    assert!(events[9].data.contains("\"output_tokens\":15"));
}

#[tokio::test]
async fn test_item_stream_function_call_sequence() {
    let payload = concat!(
        r#"data: {"type":"response.created","response":{"id":"resp_1","model":"gpt-4o-mini"}}"#,
        "\n\n",
        r#"data: {"type":"response.output_item.added","output_index":0,"item":{"type":"message","id":"item_msg","role":"assistant","content":[]}}"#,
        "\n\n",
        r#"data: {"type":"response.output_text.delta","item_id":"item_msg","delta":"The weather"}"#,
        "\n\n",
        r#"data: {"type":"response.output_item.done","item":{"type":"message","id":"item_msg","role":"assistant","content":[{"type":"output_text","text":"The weather"}]}}"#,
        "\n\n",
        r#"data: {"type":"response.output_item.added","output_index":1,"item":{"type":"function_call","id":"fc_1","call_id":"call_9","name":"get_weather","arguments":""}}"#,
        "\n\n",
        r#"data: {"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"{\"city\":\"Paris\"}"}"#,
        "\n\n",
        r#"data: {"type":"response.output_item.done","item":{"type":"function_call","id":"fc_1","call_id":"call_9","name":"get_weather","arguments":"{\"city\":\"Paris\"}"}}"#,
        "\n\n",
        r#"data: {"type":"response.completed","response":{"id":"resp_1","model":"gpt-4o-mini","status":"completed","usage":{"input_tokens":7,"output_tokens":12,"total_tokens":19}}}"#,
        "\n\n",
    );

    let (head, tail) = payload.split_at(131);
    let frames: Vec<Result<Bytes, reqwest::Error>> = vec![
        Ok(Bytes::from(head.to_string())),
        Ok(Bytes::from(tail.to_string())),
    ];

    let meta = StreamMeta::new("claude-sonnet-4-20250514");
    let events: Vec<SseEvent> =
        item_event_stream(futures::stream::iter(frames), meta, test_log("item-stream"))
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
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    // The tool_use id is the call_id, which tool results must reference.
    assert!(events[5].data.contains("call_9"));
    assert!(events[5].data.contains("get_weather"));
    assert!(events[6].data.contains("input_json_delta"));
    assert!(events[8].data.contains("\"tool_use\""));
    assert!(events[8].data.contains("\"output_tokens\":12"));
}

// ────────────────────────────────────────────────────────────────
// In-process server tests (no API key needed)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let addr = spawn_server(openai_config(), "health").await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "openai");
}

#[tokio::test]
async fn test_models_endpoint() {
    let addr = spawn_server(openai_config(), "models").await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/v1/models"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "list");
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert!(data.iter().all(|m| m["owned_by"] == "openai"));
}

#[tokio::test]
async fn test_malformed_body_returns_400() {
    let addr = spawn_server(openai_config(), "badjson").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_validation_error_returns_400() {
    let mut config = openai_config();
    // Any set env var will do; the request is rejected before the key is used.
    config.backend.api_key_env = "PATH".to_string();

    let addr = spawn_server(config, "validation").await;
    let client = reqwest::Client::new();

    // Parses fine but has no messages; rejected before any backend call.
    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&serde_json::json!({"model": "test-model", "max_tokens": 10, "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_missing_api_key_returns_502() {
    let mut config = openai_config();
    config.backend.api_key_env = "SWITCHBOARD_ITEST_ABSENT_KEY".to_string();

    let addr = spawn_server(config, "nokey").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&serde_json::json!({
            "model": "test-model",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "api_error");
}

// ────────────────────────────────────────────────────────────────
// Live backend tests (need OPENAI_API_KEY)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires OPENAI_API_KEY"]
async fn test_non_streaming_openai() {
    use switchboard::dispatch::{send_message, DispatchOutcome};

    let config = openai_config();
    let client = reqwest::Client::new();
    let log = test_log("live-chat");
    let req = simple_request("test-model", "Say 'hello' and nothing else.");

    match send_message(&req, &config, &client, &log).await {
        Ok(DispatchOutcome::Success(resp)) => {
            assert_eq!(resp.response_type, "message");
            assert_eq!(resp.role, "assistant");
            assert!(!resp.content.is_empty());
            println!("Response: {:?}", resp.content);
        }
        Ok(DispatchOutcome::Error(err, status)) => panic!("Backend error ({status}): {err:?}"),
        Err(e) => panic!("Dispatch error: {e}"),
    }
}

#[tokio::test]
#[ignore = "requires OPENAI_API_KEY"]
async fn test_streaming_openai() {
    use switchboard::dispatch::stream_message;

    let config = openai_config();
    let client = reqwest::Client::new();
    let log = test_log("live-stream");
    let req = streaming_request("test-model", "Count from 1 to 5.");

    let stream = stream_message(&req, &config, &client, &log)
        .await
        .expect("Failed to start stream");

    let events: Vec<_> = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .filter_map(Result::ok)
        .collect();

    let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    println!("Stream events: {names:?}");

    assert!(names.contains(&"message_start"), "Missing message_start");
    assert!(names.contains(&"ping"), "Missing ping");
    assert!(
        names.contains(&"content_block_delta"),
        "Missing content deltas"
    );
    assert!(names.contains(&"message_stop"), "Missing message_stop");
}

#[tokio::test]
#[ignore = "requires OPENAI_API_KEY"]
async fn test_responses_protocol_openai() {
    use switchboard::dispatch::{send_message, DispatchOutcome};

    let config = responses_config();
    let client = reqwest::Client::new();
    let log = test_log("live-responses");
    let req = tool_request();

    match send_message(&req, &config, &client, &log).await {
        Ok(DispatchOutcome::Success(resp)) => {
            assert_eq!(resp.response_type, "message");
            println!("Tool response: {:?}", resp.content);

            let tool_use = resp
                .content
                .iter()
                .any(|b| matches!(b, ResponseContentBlock::ToolUse { .. }));
            if tool_use {
                assert_eq!(resp.stop_reason, Some("tool_use".to_string()));
            }
        }
        Ok(DispatchOutcome::Error(err, status)) => panic!("Backend error ({status}): {err:?}"),
        Err(e) => panic!("Dispatch error: {e}"),
    }
}
