//! State machine translating chat-completion-style delta streams into Anthropic
//! SSE events.
//!
//! The [`DeltaStreamTranslator`] is fed one canonical [`StreamDelta`] at a time
//! and returns the Anthropic events that became ready. It opens and closes
//! content blocks as the delta kind changes (text, thinking, tool_use), assigns
//! strictly increasing block indices, and holds the terminal `message_delta`
//! until the source is exhausted so trailing usage-only deltas can be folded in.

use crate::chat::{FinishReason, StreamDelta, TokenUsage, ToolCallFragment};
use crate::error::{GatewayError, Result};

use super::anthropic_types::{
    Delta, MessageDeltaBody, ResponseContentBlock, StreamEvent,
};
use super::chat_types::ChatCompletionChunk;
use super::{delta_usage, error_event, message_start_event, StreamMeta};

/// Lift a chat-completion chunk into the canonical delta shape. Empty strings
/// on the wire count as absent.
pub fn chunk_to_delta(chunk: &ChatCompletionChunk) -> StreamDelta {
    let usage = chunk.usage.as_ref().map(|u| TokenUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: u
            .prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .filter(|n| *n > 0),
    });

    let Some(choice) = chunk.choices.first() else {
        // Usage-only chunk, emitted by some backends after the finish signal.
        return StreamDelta {
            usage,
            ..StreamDelta::default()
        };
    };

    let tool_calls: Vec<ToolCallFragment> = choice
        .delta
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCallFragment {
                    id: tc.id.clone().filter(|s| !s.is_empty()),
                    name: tc.function.as_ref().and_then(|f| f.name.clone()),
                    arguments: tc
                        .function
                        .as_ref()
                        .and_then(|f| f.arguments.clone())
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    StreamDelta {
        text: choice.delta.content.clone().filter(|s| !s.is_empty()),
        reasoning: choice
            .delta
            .reasoning_content
            .clone()
            .filter(|s| !s.is_empty()),
        signature: choice
            .delta
            .reasoning_signature
            .clone()
            .filter(|s| !s.is_empty()),
        tool_calls,
        finish: choice.finish_reason.as_deref().map(FinishReason::from_wire),
        usage,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Init,
    Streaming,
    Done,
}

#[derive(Debug, Clone)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse { id: String, name: String },
}

impl BlockKind {
    /// Whether a delta of this kind continues the given open block. Tool
    /// fragments continue only the call with the same id.
    fn continues(&self, open: &BlockKind) -> bool {
        match (self, open) {
            (BlockKind::Text, BlockKind::Text) => true,
            (BlockKind::Thinking, BlockKind::Thinking) => true,
            (BlockKind::ToolUse { id, .. }, BlockKind::ToolUse { id: open_id, .. }) => {
                id == open_id
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenBlock {
    index: usize,
    kind: BlockKind,
}

/// Translates a canonical delta stream into Anthropic SSE events.
///
/// Usage:
///   let mut translator = DeltaStreamTranslator::new(meta);
///   send(translator.begin());
///   for delta in upstream {
///       send(translator.feed(&delta)?);
///   }
///   send(translator.end_of_source());
#[derive(Debug)]
pub struct DeltaStreamTranslator {
    meta: StreamMeta,
    phase: Phase,
    next_index: usize,
    open: Option<OpenBlock>,
    // Built when the finish delta arrives, flushed by end_of_source. Its
    // presence marks the terminal delta as seen.
    held_message_delta: Option<StreamEvent>,
    usage: TokenUsage,
}

impl DeltaStreamTranslator {
    pub fn new(meta: StreamMeta) -> Self {
        Self {
            meta,
            phase: Phase::Init,
            next_index: 0,
            open: None,
            held_message_delta: None,
            usage: TokenUsage::default(),
        }
    }

    /// Emit `message_start` and open the initial text block. Index 0 is always
    /// a text block, even when the first real content is a tool call.
    pub fn begin(&mut self) -> Vec<StreamEvent> {
        if self.phase != Phase::Init {
            return Vec::new();
        }
        self.phase = Phase::Streaming;
        let mut events = vec![message_start_event(&self.meta, self.usage.input_tokens)];
        self.ensure_block(BlockKind::Text, &mut events);
        events
    }

    /// Process one upstream delta, returning the Anthropic events it produced.
    /// A malformed delta poisons the translator; the caller turns the error
    /// into a terminal `error` SSE event.
    pub fn feed(&mut self, delta: &StreamDelta) -> Result<Vec<StreamEvent>> {
        if let Some(ref usage) = delta.usage {
            self.absorb_usage(usage);
        }
        if self.phase == Phase::Done || self.held_message_delta.is_some() {
            // Everything after the terminal delta contributes usage only.
            return Ok(Vec::new());
        }

        let thought = delta.reasoning.as_deref().filter(|s| !s.is_empty());
        let signature = delta.signature.as_deref().filter(|s| !s.is_empty());
        if thought.is_some() && signature.is_some() {
            self.phase = Phase::Done;
            return Err(GatewayError::malformed_delta(
                "delta carries thinking text and a signature simultaneously",
            ));
        }

        let mut events = if self.phase == Phase::Init {
            self.begin()
        } else {
            Vec::new()
        };

        if let Some(text) = thought {
            let index = self.ensure_block(BlockKind::Thinking, &mut events);
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::ThinkingDelta {
                    thinking: text.to_string(),
                },
            });
        }

        if let Some(sig) = signature {
            let index = self.ensure_block(BlockKind::Thinking, &mut events);
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::SignatureDelta {
                    signature: sig.to_string(),
                },
            });
        }

        if let Some(text) = delta.text.as_deref().filter(|s| !s.is_empty()) {
            let index = self.ensure_block(BlockKind::Text, &mut events);
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        for frag in &delta.tool_calls {
            self.feed_tool_fragment(frag, &mut events);
        }

        if let Some(ref reason) = delta.finish {
            if let Some(block) = self.open.take() {
                events.push(StreamEvent::ContentBlockStop { index: block.index });
            }
            self.held_message_delta = Some(StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(reason.stop_reason().to_string()),
                    stop_sequence: None,
                },
                usage: delta_usage(&self.usage),
            });
        }

        Ok(events)
    }

    /// Flush after the upstream source is exhausted. With a terminal delta seen
    /// this emits `message_delta` (with final usage) and `message_stop`; without
    /// one it closes any open block and reports an incomplete stream instead of
    /// pretending success.
    pub fn end_of_source(&mut self) -> Vec<StreamEvent> {
        if self.phase == Phase::Done {
            return Vec::new();
        }
        let mut events = if self.phase == Phase::Init {
            self.begin()
        } else {
            Vec::new()
        };
        self.phase = Phase::Done;

        if let Some(StreamEvent::MessageDelta { delta, .. }) = self.held_message_delta.take() {
            // Rebuild usage here so trailing usage-only deltas count.
            events.push(StreamEvent::MessageDelta {
                delta,
                usage: delta_usage(&self.usage),
            });
            events.push(StreamEvent::MessageStop);
            return events;
        }

        if let Some(block) = self.open.take() {
            events.push(StreamEvent::ContentBlockStop { index: block.index });
        }
        events.push(error_event(&GatewayError::incomplete_stream(
            "stream ended before a finish signal",
        )));
        events
    }

    /// Close the open block if the kind changed and open a new one, returning
    /// the index deltas should target.
    fn ensure_block(&mut self, kind: BlockKind, events: &mut Vec<StreamEvent>) -> usize {
        if let Some(ref block) = self.open {
            if kind.continues(&block.kind) {
                return block.index;
            }
        }
        if let Some(block) = self.open.take() {
            events.push(StreamEvent::ContentBlockStop { index: block.index });
        }

        let index = self.next_index;
        self.next_index += 1;
        let content_block = match &kind {
            BlockKind::Text => ResponseContentBlock::Text {
                text: String::new(),
            },
            BlockKind::Thinking => ResponseContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
            BlockKind::ToolUse { id, name } => ResponseContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        };
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        self.open = Some(OpenBlock { index, kind });
        index
    }

    fn feed_tool_fragment(&mut self, frag: &ToolCallFragment, events: &mut Vec<StreamEvent>) {
        let index = match frag.id.as_deref().filter(|s| !s.is_empty()) {
            Some(id) => self.ensure_block(
                BlockKind::ToolUse {
                    id: id.to_string(),
                    name: frag.name.clone().unwrap_or_default(),
                },
                events,
            ),
            None => match &self.open {
                Some(block) if matches!(block.kind, BlockKind::ToolUse { .. }) => block.index,
                // Continuation with no open call to continue; drop it.
                _ => return,
            },
        };
        if !frag.arguments.is_empty() {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta {
                    partial_json: frag.arguments.clone(),
                },
            });
        }
    }

    /// Later usage reports replace earlier ones; chat backends send cumulative
    /// totals, not increments.
    fn absorb_usage(&mut self, usage: &TokenUsage) {
        if usage.input_tokens > 0 {
            self.usage.input_tokens = usage.input_tokens;
        }
        if usage.output_tokens > 0 {
            self.usage.output_tokens = usage.output_tokens;
        }
        if usage.cache_creation_input_tokens.is_some() {
            self.usage.cache_creation_input_tokens = usage.cache_creation_input_tokens;
        }
        if usage.cache_read_input_tokens.is_some() {
            self.usage.cache_read_input_tokens = usage.cache_read_input_tokens;
        }
    }
}
