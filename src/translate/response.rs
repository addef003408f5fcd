//! Lift completed backend responses into the canonical form and build the
//! Anthropic Messages response from it.
//!
//! Block order in the Anthropic response is fixed: thinking blocks first, then
//! text, then one tool_use per canonical tool call. Tool-call arguments that
//! fail to parse degrade to an empty object instead of failing the response.

use crate::chat::{ChatResponse, FinishReason, ReasoningPart, TokenUsage, ToolCall};
use crate::error::{GatewayError, Result};

use super::anthropic_types::{ErrorResponse, MessagesResponse, ResponseContentBlock, Usage};
use super::chat_types::{ChatCompletionResponse, ChatError};
use super::item_types::{OutputItem, OutputPart, ResponsesResponse};

/// Build the Anthropic Messages response from a canonical response.
/// `original_model` is what the caller asked for, echoed back regardless of the
/// backend model that actually served the request.
pub fn to_messages(resp: &ChatResponse, original_model: &str) -> MessagesResponse {
    let mut content: Vec<ResponseContentBlock> = Vec::new();

    for part in &resp.reasoning {
        content.push(match part {
            ReasoningPart::Thinking { text, signature } => ResponseContentBlock::Thinking {
                thinking: text.clone(),
                signature: signature.clone(),
            },
            ReasoningPart::Redacted { data } => {
                ResponseContentBlock::RedactedThinking { data: data.clone() }
            }
        });
    }

    if !resp.text.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: resp.text.clone(),
        });
    }

    for call in &resp.tool_calls {
        let input: serde_json::Value = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        content.push(ResponseContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input,
        });
    }

    // Clients expect at least one content block.
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = resp
        .finish
        .as_ref()
        .map(FinishReason::stop_reason)
        .unwrap_or("end_turn");

    MessagesResponse {
        id: message_id(&resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            cache_creation_input_tokens: resp.usage.cache_creation_input_tokens,
            cache_read_input_tokens: resp.usage.cache_read_input_tokens,
        },
    }
}

/// Reuse the backend's response id, restyled as an Anthropic message id.
fn message_id(backend_id: &str) -> String {
    let trimmed = backend_id
        .trim_start_matches("chatcmpl-")
        .trim_start_matches("resp_");
    format!("msg_{trimmed}")
}

/// Lift a chat-completions response into the canonical form. Only the first
/// choice is considered; the gateway never requests more than one.
pub fn chat_to_canonical(resp: &ChatCompletionResponse) -> ChatResponse {
    let choice = resp.choices.first();

    let text = choice
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();

    let mut reasoning = Vec::new();
    if let Some(thought) = choice
        .and_then(|c| c.message.reasoning_content.as_deref())
        .filter(|s| !s.is_empty())
    {
        reasoning.push(ReasoningPart::Thinking {
            text: thought.to_string(),
            signature: None,
        });
    }

    let tool_calls = choice
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: tc.function.arguments.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let finish = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(FinishReason::from_wire);

    let usage = resp.usage.as_ref().map_or_else(TokenUsage::default, |u| {
        let cached = u
            .prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .filter(|n| *n > 0);
        TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: cached,
        }
    });

    ChatResponse {
        id: resp.id.clone(),
        model: resp.model.clone(),
        text,
        reasoning,
        tool_calls,
        finish,
        usage,
    }
}

/// Lift a responses-backend result into the canonical form. A `failed` status
/// surfaces the backend's error instead of a response.
pub fn items_to_canonical(resp: &ResponsesResponse) -> Result<ChatResponse> {
    if resp.status.as_deref() == Some("failed") {
        let (kind, message) = match &resp.error {
            Some(err) => (
                err.code.clone().unwrap_or_else(|| "api_error".to_string()),
                err.message.clone(),
            ),
            None => ("api_error".to_string(), "response failed".to_string()),
        };
        return Err(GatewayError::upstream(kind, message));
    }

    let mut text = String::new();
    let mut reasoning = Vec::new();
    let mut tool_calls = Vec::new();

    for item in &resp.output {
        match item {
            OutputItem::Message { content, .. } => {
                for part in content {
                    match part {
                        OutputPart::OutputText { text: t } => text.push_str(t),
                        OutputPart::Refusal { refusal } => text.push_str(refusal),
                        OutputPart::Unknown => {}
                    }
                }
            }
            OutputItem::FunctionCall {
                id,
                call_id,
                name,
                arguments,
            } => {
                tool_calls.push(ToolCall {
                    // call_id is what function_call_output items must reference.
                    id: call_id
                        .clone()
                        .or_else(|| id.clone())
                        .unwrap_or_default(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
            }
            OutputItem::Reasoning {
                summary,
                content,
                encrypted_content,
                ..
            } => {
                let joined = summary
                    .iter()
                    .chain(content.iter())
                    .map(|chunk| chunk.text.as_str())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                if !joined.is_empty() {
                    reasoning.push(ReasoningPart::Thinking {
                        text: joined,
                        signature: None,
                    });
                }
                if let Some(data) = encrypted_content {
                    reasoning.push(ReasoningPart::Redacted { data: data.clone() });
                }
            }
            OutputItem::Unknown => {}
        }
    }

    let finish = match resp.status.as_deref() {
        Some("incomplete") => Some(FinishReason::Length),
        _ if !tool_calls.is_empty() => Some(FinishReason::ToolCalls),
        Some(_) => Some(FinishReason::Stop),
        None => None,
    };

    let usage = resp.usage.as_ref().map_or_else(TokenUsage::default, |u| {
        let cached = u
            .input_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .filter(|n| *n > 0);
        TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: cached,
        }
    });

    Ok(ChatResponse {
        id: resp.id.clone(),
        model: resp.model.clone(),
        text,
        reasoning,
        tool_calls,
        finish,
        usage,
    })
}

/// Map a backend error body onto the Anthropic error shape. Error types both
/// sides understand pass through; everything else falls back on the HTTP status.
pub fn backend_error_to_anthropic(status: u16, err: &ChatError) -> ErrorResponse {
    let error_type = match err.error_type.as_str() {
        t @ ("invalid_request_error" | "authentication_error" | "permission_error"
        | "not_found_error" | "rate_limit_error" | "overloaded_error" | "api_error") => t,
        "rate_limit_exceeded" => "rate_limit_error",
        _ => match status {
            429 => "rate_limit_error",
            400 | 404 | 422 => "invalid_request_error",
            401 => "authentication_error",
            403 => "permission_error",
            _ => "api_error",
        },
    };

    ErrorResponse::new(error_type, &err.message)
}
