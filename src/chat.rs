//! Vendor-neutral conversation model shared by all translators.
//!
//! Inbound Anthropic requests are lowered into these types, backends are driven from
//! them, and backend responses are raised back into them before being re-encoded as
//! Anthropic wire shapes. Values are immutable once built; the stream translators keep
//! their own private state and only borrow these.

use std::collections::BTreeMap;

/// Role of a canonical message. System content never appears here; it is extracted
/// into [`Instructions`] on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// System prompt, either a flat string or ordered text blocks with their
/// cache-control tags preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum Instructions {
    Text(String),
    Blocks(Vec<InstructionBlock>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionBlock {
    pub text: String,
    pub cache_control: Option<serde_json::Value>,
}

impl Instructions {
    pub fn as_text(&self) -> String {
        match self {
            Instructions::Text(t) => t.clone(),
            Instructions::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One typed segment of user-visible or tool-result content.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn image_base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::Image {
            source: ImageSource::Base64 {
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Part::Image {
            source: ImageSource::Url { url: url.into() },
        }
    }
}

/// Message content: scalar text or an ordered part list. Single-text-part lists are
/// collapsed to the scalar form when built, so backends see the shape they expect.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Parts(Vec<Part>),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Text(t) => t.is_empty(),
            Body::Parts(p) => p.is_empty(),
        }
    }

    /// Flatten to plain text, joining text parts and skipping images.
    pub fn flat_text(&self) -> String {
        match self {
            Body::Text(t) => t.clone(),
            Body::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text.as_str()),
                    Part::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Collapse a one-element text part list to scalar text.
    pub fn collapsed(parts: Vec<Part>) -> Self {
        if parts.len() == 1 {
            if let Part::Text { text } = &parts[0] {
                return Body::Text(text.clone());
            }
        }
        Body::Parts(parts)
    }
}

/// A completed model-issued tool invocation. `arguments` is the raw JSON-encoded
/// argument string; an empty input is `"{}"`, never an empty string.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Reasoning trace entries attached to an assistant message, in block order.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningPart {
    Thinking {
        text: String,
        signature: Option<String>,
    },
    Redacted {
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Body,
    /// Assistant-issued calls, in issue order.
    pub tool_calls: Vec<ToolCall>,
    /// Set on Tool-role messages: the tool_use id this result answers.
    pub tool_call_id: Option<String>,
    /// Assistant reasoning trace, preserved for lossless reconstruction.
    pub reasoning: Vec<ReasoningPart>,
    /// Thinking signatures keyed by the tool-call id that owns them.
    pub signatures: BTreeMap<String, String>,
}

impl ChatMessage {
    pub fn user(content: Body) -> Self {
        Self {
            role: Role::User,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            reasoning: Vec::new(),
            signatures: BTreeMap::new(),
        }
    }

    pub fn assistant(content: Body) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            reasoning: Vec::new(),
            signatures: BTreeMap::new(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: Body) -> Self {
        Self {
            role: Role::Tool,
            content,
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            reasoning: Vec::new(),
            signatures: BTreeMap::new(),
        }
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSpec {
    Function(FunctionSpec),
    /// Built-in web search capability; no user-defined schema.
    WebSearch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpec {
    pub name: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoicePolicy {
    Auto,
    None,
    Required,
    Named(String),
}

/// The canonical request handed to the dispatcher. `model` keeps the caller's name;
/// per-backend mapping happens when the wire request is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u64,
    pub instructions: Option<Instructions>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoicePolicy>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub stop_sequences: Option<Vec<String>>,
    pub user_id: Option<String>,
    /// Requested reasoning budget in tokens, when the caller enabled thinking.
    pub thinking_budget: Option<u64>,
    pub stream: bool,
    /// Unrecognized top-level fields passed through for forward compatibility.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Why the backend stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    /// Anthropic stop_reason string. Unknown reasons collapse to `end_turn`.
    pub fn stop_reason(&self) -> &'static str {
        match self {
            FinishReason::Stop => "end_turn",
            FinishReason::Length => "max_tokens",
            FinishReason::ToolCalls => "tool_use",
            FinishReason::ContentFilter | FinishReason::Other(_) => "end_turn",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

/// A completed backend response in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub text: String,
    pub reasoning: Vec<ReasoningPart>,
    pub tool_calls: Vec<ToolCall>,
    pub finish: Option<FinishReason>,
    pub usage: TokenUsage,
}

/// One incremental event from a chat-completion-style backend, already lifted out of
/// its wire chunk. A single delta may carry several of these fields at once; the
/// stream translator processes reasoning, then text, then tool fragments, then the
/// finish signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub text: Option<String>,
    pub reasoning: Option<String>,
    pub signature: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
    pub finish: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
}

/// A fragment of a streamed tool call. An `id` marks the start of a new call;
/// fragments without one continue the currently open call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl StreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn signature(sig: impl Into<String>) -> Self {
        Self {
            signature: Some(sig.into()),
            ..Self::default()
        }
    }

    pub fn tool_fragment(
        id: Option<&str>,
        name: Option<&str>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            tool_calls: vec![ToolCallFragment {
                id: id.map(String::from),
                name: name.map(String::from),
                arguments: arguments.into(),
            }],
            ..Self::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish: Some(reason),
            ..Self::default()
        }
    }
}
