//! Lower Anthropic Messages API requests into the canonical chat form, then
//! project the canonical form onto a backend wire protocol.
//!
//! Lowering handles system prompts, multi-part content (text, images), tool use,
//! tool results, and thinking blocks. A single Anthropic message can expand into
//! multiple canonical messages: every `tool_result` block becomes its own
//! tool-role message, emitted before the sibling user text of the same turn.
//! Projection is a pure rename onto either the chat-completions shape or the
//! item-based responses shape; the per-backend model mapping is applied there,
//! never during lowering.

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::chat::{
    Body, ChatMessage, ChatRequest, FunctionSpec, ImageSource, InstructionBlock, Instructions,
    Part, ReasoningPart, Role as ChatRole, ToolCall, ToolChoicePolicy, ToolSpec,
};
use crate::error::{GatewayError, Result};
use crate::schema;

use super::anthropic_types::{
    ContentBlock, Message, MessagesRequest, Role, SystemContent, ThinkingConfig, Tool, ToolChoice,
    ToolChoiceAuto, ToolChoiceSpecific, ToolResultContent,
};
use super::chat_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage as WireMessage, ChatTool,
    ChatToolCall, ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction,
    ChatToolChoiceSpecific, ContentPart, ImageUrlDetail, StreamOptions,
};
use super::item_types::{
    InputItem, InputPart, ResponsesReasoning, ResponsesRequest, ResponsesTool, ResponsesToolChoice,
};

/// Fixed defaults applied while lowering. Built once at dispatch time and passed
/// by value; nothing here is read from global state.
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    /// Used when the caller omits `max_tokens`.
    pub default_max_tokens: u64,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            default_max_tokens: 4096,
        }
    }
}

/// Lower an Anthropic Messages API request into the canonical [`ChatRequest`].
/// Pure function: no I/O, no backend knowledge beyond the canonical model.
pub fn to_canonical(req: &MessagesRequest, opts: &TranslateOptions) -> Result<ChatRequest> {
    if req.model.trim().is_empty() {
        return Err(GatewayError::validation("model is required"));
    }
    if req.messages.is_empty() {
        return Err(GatewayError::validation("messages must not be empty"));
    }

    let instructions = req.system.as_ref().map(lower_system);

    let mut messages = Vec::new();
    for msg in &req.messages {
        lower_message(msg, &mut messages);
    }

    let tools = match &req.tools {
        Some(tools) => lower_tools(tools)?,
        None => Vec::new(),
    };
    let tool_choice = req.tool_choice.as_ref().map(lower_tool_choice);

    let thinking_budget = match &req.thinking {
        // An enabled request without a budget gets the mid-band default.
        Some(ThinkingConfig::Enabled { budget_tokens }) => Some(budget_tokens.unwrap_or(8192)),
        Some(ThinkingConfig::Disabled) | None => None,
    };

    let mut extra = req.extra.clone();
    // Structured-output format is not portable; everything else passes through
    // until the config drop list is applied at dispatch.
    extra.remove("output_format");

    Ok(ChatRequest {
        model: req.model.clone(),
        max_tokens: req.max_tokens.unwrap_or(opts.default_max_tokens),
        instructions,
        messages,
        tools,
        tool_choice,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop_sequences: req.stop_sequences.clone(),
        user_id: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
        thinking_budget,
        stream: req.stream.unwrap_or(false),
        extra,
    })
}

fn lower_system(system: &SystemContent) -> Instructions {
    match system {
        SystemContent::Text(t) => Instructions::Text(t.clone()),
        SystemContent::Blocks(blocks) => Instructions::Blocks(
            blocks
                .iter()
                .map(|b| match b {
                    super::anthropic_types::SystemBlock::Text {
                        text,
                        cache_control,
                    } => InstructionBlock {
                        text: text.clone(),
                        cache_control: cache_control.clone(),
                    },
                })
                .collect(),
        ),
    }
}

fn lower_message(msg: &Message, out: &mut Vec<ChatMessage>) {
    let blocks = msg.content.blocks();
    match msg.role {
        Role::User => lower_user_message(&blocks, out),
        Role::Assistant => out.push(lower_assistant_message(&blocks)),
    }
}

/// A user turn fans out into zero or more tool messages followed by at most one
/// user message. Tool results come first regardless of where they sat in the
/// block list, and results sharing a tool_use_id merge into a single message.
fn lower_user_message(blocks: &[ContentBlock], out: &mut Vec<ChatMessage>) {
    let mut parts: Vec<Part> = Vec::new();
    // Keyed by tool_use_id, in first-appearance order.
    let mut results: Vec<(String, Vec<Part>)> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(Part::text(text.clone())),
            ContentBlock::Image { source } => parts.push(lower_image(source)),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut collected = tool_result_parts(content.as_ref(), *is_error);
                match results.iter_mut().find(|(id, _)| id == tool_use_id) {
                    Some((_, existing)) => existing.append(&mut collected),
                    None => results.push((tool_use_id.clone(), collected)),
                }
            }
            ContentBlock::ToolUse { .. }
            | ContentBlock::Thinking { .. }
            | ContentBlock::RedactedThinking { .. } => {}
        }
    }

    let had_results = !results.is_empty();
    for (id, collected) in results {
        out.push(ChatMessage::tool(id, Body::collapsed(collected)));
    }
    if !parts.is_empty() {
        out.push(ChatMessage::user(Body::collapsed(parts)));
    } else if !had_results {
        // Empty turn: keep it visible rather than silently dropping the message.
        out.push(ChatMessage::user(Body::Text(String::new())));
    }
}

fn lower_assistant_message(blocks: &[ContentBlock]) -> ChatMessage {
    let mut text = String::new();
    let mut msg = ChatMessage::assistant(Body::Text(String::new()));
    // A thinking signature binds to the next tool_use in block order.
    let mut pending_signature: Option<String> = None;

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse {
                id,
                name,
                input,
                signature,
            } => {
                let arguments = match input {
                    serde_json::Value::Null => "{}".to_string(),
                    other => serde_json::to_string(other).unwrap_or_else(|_| "{}".to_string()),
                };
                let inherited = pending_signature.take();
                if let Some(sig) = signature.clone().or(inherited) {
                    msg.signatures.insert(id.clone(), sig);
                }
                msg.tool_calls.push(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments,
                });
            }
            ContentBlock::Thinking {
                thinking,
                signature,
            } => {
                if signature.is_some() {
                    pending_signature = signature.clone();
                }
                msg.reasoning.push(ReasoningPart::Thinking {
                    text: thinking.clone(),
                    signature: signature.clone(),
                });
            }
            ContentBlock::RedactedThinking { data } => {
                msg.reasoning.push(ReasoningPart::Redacted { data: data.clone() });
            }
            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }

    msg.content = Body::Text(text);
    msg
}

fn lower_image(source: &super::anthropic_types::ImageSource) -> Part {
    match source {
        super::anthropic_types::ImageSource::Base64 { media_type, data } => {
            Part::image_base64(media_type.clone(), data.clone())
        }
        super::anthropic_types::ImageSource::Url { url } => Part::image_url(url.clone()),
    }
}

fn tool_result_parts(content: Option<&ToolResultContent>, is_error: Option<bool>) -> Vec<Part> {
    let failed = is_error == Some(true);
    let mut parts = match content {
        Some(ToolResultContent::Text(t)) => vec![Part::text(t.clone())],
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(Part::text(text.clone())),
                ContentBlock::Image { source } => Some(lower_image(source)),
                _ => None,
            })
            .collect(),
        None => vec![Part::text("(no content)")],
    };
    if failed {
        if let Some(Part::Text { text }) = parts.first_mut() {
            text.insert_str(0, "ERROR: ");
        }
    }
    parts
}

fn lower_tools(tools: &[Tool]) -> Result<Vec<ToolSpec>> {
    tools
        .iter()
        .map(|t| {
            let builtin_search = t.name == "web_search"
                || t.tool_type
                    .as_deref()
                    .is_some_and(|ty| ty.starts_with("web_search"));
            if builtin_search {
                return Ok(ToolSpec::WebSearch);
            }
            if !t.input_schema.is_object() {
                return Err(GatewayError::schema_transform(format!(
                    "tool '{}': input_schema must be a JSON object",
                    t.name
                )));
            }
            let mut parameters = t.input_schema.clone();
            schema::filter_constraints(&mut parameters);
            Ok(ToolSpec::Function(FunctionSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters,
            }))
        })
        .collect()
}

fn lower_tool_choice(tc: &ToolChoice) -> ToolChoicePolicy {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ToolChoicePolicy::Required,
            "none" => ToolChoicePolicy::None,
            _ => ToolChoicePolicy::Auto,
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ToolChoicePolicy::Named(name.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Chat-completions wire projection
// ---------------------------------------------------------------------------

/// Project the canonical request onto the chat-completions wire shape. The
/// configured model mapping is applied here.
pub fn to_chat_wire<S: BuildHasher>(
    creq: &ChatRequest,
    model_map: &HashMap<String, String, S>,
) -> ChatCompletionRequest {
    let model = mapped_model(&creq.model, model_map);

    let mut messages = Vec::new();
    if let Some(ref instructions) = creq.instructions {
        messages.push(WireMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(instructions.as_text())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }
    for msg in &creq.messages {
        messages.push(chat_wire_message(msg));
    }

    let tools: Vec<ChatTool> = creq
        .tools
        .iter()
        .filter_map(|spec| match spec {
            ToolSpec::Function(f) => Some(ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    parameters: f.parameters.clone(),
                },
            }),
            // No chat-completions equivalent of the built-in search tool.
            ToolSpec::WebSearch => None,
        })
        .collect();

    let tool_choice = creq.tool_choice.as_ref().map(|policy| match policy {
        ToolChoicePolicy::Auto => ChatToolChoice::String("auto".to_string()),
        ToolChoicePolicy::None => ChatToolChoice::String("none".to_string()),
        ToolChoicePolicy::Required => ChatToolChoice::String("required".to_string()),
        ToolChoicePolicy::Named(name) => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
    });

    ChatCompletionRequest {
        model,
        messages,
        max_tokens: Some(creq.max_tokens),
        temperature: creq.temperature,
        top_p: creq.top_p,
        stream: creq.stream.then_some(true),
        stream_options: creq.stream.then(|| StreamOptions {
            include_usage: true,
        }),
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice,
        stop: creq.stop_sequences.clone(),
        user: creq.user_id.clone(),
        extra: creq.extra.clone(),
    }
}

fn chat_wire_message(msg: &ChatMessage) -> WireMessage {
    match msg.role {
        ChatRole::User => WireMessage {
            role: "user".to_string(),
            content: Some(chat_wire_content(&msg.content)),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        },
        ChatRole::Assistant => {
            let content =
                (!msg.content.is_empty()).then(|| ChatContent::Text(msg.content.flat_text()));
            let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
                msg.tool_calls
                    .iter()
                    .map(|call| ChatToolCall {
                        id: call.id.clone(),
                        call_type: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect()
            });
            WireMessage {
                role: "assistant".to_string(),
                content,
                tool_calls,
                tool_call_id: None,
                name: None,
            }
        }
        // Chat backends take tool output as flat text.
        ChatRole::Tool => WireMessage {
            role: "tool".to_string(),
            content: Some(ChatContent::Text(msg.content.flat_text())),
            tool_calls: None,
            tool_call_id: msg.tool_call_id.clone(),
            name: None,
        },
    }
}

fn chat_wire_content(body: &Body) -> ChatContent {
    match body {
        Body::Text(t) => ChatContent::Text(t.clone()),
        Body::Parts(parts) => ChatContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    Part::Text { text } => ContentPart::Text { text: text.clone() },
                    Part::Image { source } => ContentPart::ImageUrl {
                        image_url: ImageUrlDetail {
                            url: image_url_string(source),
                            detail: None,
                        },
                    },
                })
                .collect(),
        ),
    }
}

// ---------------------------------------------------------------------------
// Responses wire projection
// ---------------------------------------------------------------------------

/// Project the canonical request onto the item-based responses wire shape.
/// Tool schemas are rewritten into strict mode here; the thinking budget maps
/// onto the backend's coarse reasoning effort.
pub fn to_responses_wire<S: BuildHasher>(
    creq: &ChatRequest,
    model_map: &HashMap<String, String, S>,
) -> ResponsesRequest {
    let model = mapped_model(&creq.model, model_map);

    let instructions = creq
        .instructions
        .as_ref()
        .map(Instructions::as_text)
        .filter(|s| !s.is_empty());

    let mut input = Vec::new();
    for msg in &creq.messages {
        match msg.role {
            ChatRole::User => input.push(InputItem::Message {
                role: "user".to_string(),
                content: input_parts(&msg.content, false),
            }),
            ChatRole::Assistant => {
                if !msg.content.is_empty() {
                    input.push(InputItem::Message {
                        role: "assistant".to_string(),
                        content: input_parts(&msg.content, true),
                    });
                }
                // Calls precede their outputs: the matching function_call_output
                // items are emitted by the following tool-role messages.
                for call in &msg.tool_calls {
                    input.push(InputItem::FunctionCall {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                }
            }
            ChatRole::Tool => input.push(InputItem::FunctionCallOutput {
                call_id: msg.tool_call_id.clone().unwrap_or_default(),
                output: msg.content.flat_text(),
            }),
        }
    }

    let tools: Vec<ResponsesTool> = creq
        .tools
        .iter()
        .map(|spec| match spec {
            ToolSpec::Function(f) => {
                let mut parameters = f.parameters.clone();
                schema::inject_strict(&mut parameters);
                ResponsesTool::Function {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    parameters,
                    strict: true,
                }
            }
            ToolSpec::WebSearch => ResponsesTool::WebSearch {},
        })
        .collect();

    let tool_choice = creq.tool_choice.as_ref().map(|policy| match policy {
        ToolChoicePolicy::Auto => ResponsesToolChoice::Mode("auto".to_string()),
        ToolChoicePolicy::None => ResponsesToolChoice::Mode("none".to_string()),
        ToolChoicePolicy::Required => ResponsesToolChoice::Mode("required".to_string()),
        ToolChoicePolicy::Named(name) => ResponsesToolChoice::Function {
            choice_type: "function".to_string(),
            name: name.clone(),
        },
    });

    let reasoning = creq.thinking_budget.map(|budget| ResponsesReasoning {
        effort: Some(reasoning_effort(budget).to_string()),
    });

    ResponsesRequest {
        model,
        input,
        instructions,
        max_output_tokens: Some(creq.max_tokens),
        temperature: creq.temperature,
        top_p: creq.top_p,
        stream: creq.stream.then_some(true),
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice,
        reasoning,
        user: creq.user_id.clone(),
        extra: creq.extra.clone(),
    }
}

fn input_parts(body: &Body, assistant: bool) -> Vec<InputPart> {
    let text_part = |text: &str| {
        if assistant {
            InputPart::OutputText {
                text: text.to_string(),
            }
        } else {
            InputPart::InputText {
                text: text.to_string(),
            }
        }
    };
    match body {
        Body::Text(t) => vec![text_part(t)],
        Body::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text_part(text)),
                Part::Image { source } => (!assistant).then(|| InputPart::InputImage {
                    image_url: image_url_string(source),
                }),
            })
            .collect(),
    }
}

/// Thinking budgets collapse onto the responses backend's coarse effort scale.
fn reasoning_effort(budget: u64) -> &'static str {
    match budget {
        0..=2048 => "low",
        2049..=8192 => "medium",
        _ => "high",
    }
}

fn mapped_model<S: BuildHasher>(model: &str, model_map: &HashMap<String, String, S>) -> String {
    model_map
        .get(model)
        .cloned()
        .unwrap_or_else(|| model.to_string())
}

fn image_url_string(source: &ImageSource) -> String {
    match source {
        ImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
        ImageSource::Url { url } => url.clone(),
    }
}
