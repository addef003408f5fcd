//! Protocol translation between the Anthropic Messages API and backend wire formats.
//!
//! The core of the gateway: inbound Anthropic requests lower into the canonical
//! [`crate::chat`] form, which then projects onto either backend wire protocol;
//! backend responses and event streams lift back through the same canonical types
//! into Anthropic responses and SSE events. All translation functions are pure
//! (no I/O); the stream translators are synchronous state machines fed one
//! upstream event at a time.

pub mod anthropic_types;
pub mod chat_types;
pub mod delta_stream;
pub mod item_stream;
pub mod item_types;
pub mod request;
pub mod response;

use crate::chat::TokenUsage;
use crate::error::GatewayError;
use anthropic_types::{
    DeltaUsage, ErrorBody, MessagesResponse, StreamEvent, Usage,
};

/// Immutable identity for one translated stream: the message id handed to the
/// client and the model name echoed back to it. Built once per stream and passed
/// by value to the stream translators.
#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub message_id: String,
    pub model: String,
}

impl StreamMeta {
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().to_string().replace('-', "")),
            model: model.to_string(),
        }
    }
}

/// Synthetic `message_start` carrying an empty message shell; shared by both
/// stream translators.
pub(crate) fn message_start_event(meta: &StreamMeta, input_tokens: u64) -> StreamEvent {
    StreamEvent::MessageStart {
        message: MessagesResponse {
            id: meta.message_id.clone(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            model: meta.model.clone(),
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: Usage {
                input_tokens,
                output_tokens: 0,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        },
    }
}

/// Project accumulated usage onto the `message_delta` usage shape. Zero-valued
/// optional counts are dropped rather than serialized as zeros.
pub(crate) fn delta_usage(usage: &TokenUsage) -> DeltaUsage {
    DeltaUsage {
        input_tokens: (usage.input_tokens > 0).then_some(usage.input_tokens),
        output_tokens: usage.output_tokens,
        cache_creation_input_tokens: usage.cache_creation_input_tokens.filter(|n| *n > 0),
        cache_read_input_tokens: usage.cache_read_input_tokens.filter(|n| *n > 0),
    }
}

/// Terminal `error` SSE event for a gateway-side failure.
pub fn error_event(err: &GatewayError) -> StreamEvent {
    StreamEvent::Error {
        error: ErrorBody::new(err.error_type(), err.to_string()),
    }
}
