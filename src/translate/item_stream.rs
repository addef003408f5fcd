//! State machine translating item-lifecycle event streams (responses backends)
//! into Anthropic SSE events.
//!
//! Unlike the delta stream, the source already has block structure: items are
//! added, receive deltas addressed by `item_id`, and are done. The translator
//! keeps an id → block-index map so deltas may arrive out of order relative to
//! the most recently opened item. Some backends (LM Studio among them) omit the
//! `item_id` on deltas; those fall back to the last opened block.

use std::collections::HashMap;

use crate::chat::TokenUsage;
use crate::error::{GatewayError, Result};

use super::anthropic_types::{Delta, DeltaUsage, MessageDeltaBody, ResponseContentBlock, StreamEvent};
use super::item_types::{OutputItem, ResponsesResponse, ResponsesStreamEvent};
use super::{delta_usage, error_event, message_start_event, StreamMeta};

#[derive(Debug, Clone)]
struct ItemBlock {
    index: usize,
    closed: bool,
    // Argument bytes already streamed for a function_call item, so the final
    // item payload only contributes the unsent remainder.
    args_emitted: usize,
}

/// Translates responses-backend stream events into Anthropic SSE events.
#[derive(Debug)]
pub struct ItemStreamTranslator {
    meta: StreamMeta,
    started: bool,
    done: bool,
    next_index: usize,
    blocks: HashMap<String, ItemBlock>,
    // Most recently opened item, the target for deltas without an item_id.
    current_key: Option<String>,
    saw_function_call: bool,
}

impl ItemStreamTranslator {
    pub fn new(meta: StreamMeta) -> Self {
        Self {
            meta,
            started: false,
            done: false,
            next_index: 0,
            blocks: HashMap::new(),
            current_key: None,
            saw_function_call: false,
        }
    }

    /// Process one upstream event. `Err` means the stream is over and the
    /// caller should surface the error as a terminal `error` SSE event.
    pub fn feed(&mut self, event: &ResponsesStreamEvent) -> Result<Vec<StreamEvent>> {
        if self.done {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        self.ensure_started(&mut events);

        match event {
            ResponsesStreamEvent::Created { .. } => {}

            ResponsesStreamEvent::OutputItemAdded { item, .. } => {
                self.open_item(item, &mut events);
            }

            ResponsesStreamEvent::OutputTextDelta { item_id, delta } => {
                if let Some(index) = self.block_index(item_id) {
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: Delta::TextDelta {
                            text: delta.clone(),
                        },
                    });
                }
            }

            ResponsesStreamEvent::ReasoningTextDelta { item_id, delta }
            | ResponsesStreamEvent::ReasoningSummaryTextDelta { item_id, delta } => {
                if let Some(index) = self.block_index(item_id) {
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: Delta::ThinkingDelta {
                            thinking: delta.clone(),
                        },
                    });
                }
            }

            ResponsesStreamEvent::FunctionCallArgumentsDelta { item_id, delta } => {
                if let Some(key) = self.resolve_key(item_id) {
                    if let Some(block) = self.blocks.get_mut(&key) {
                        if !block.closed {
                            block.args_emitted += delta.len();
                            events.push(StreamEvent::ContentBlockDelta {
                                index: block.index,
                                delta: Delta::InputJsonDelta {
                                    partial_json: delta.clone(),
                                },
                            });
                        }
                    }
                }
            }

            ResponsesStreamEvent::OutputItemDone { item } => {
                self.close_item(item, &mut events);
            }

            ResponsesStreamEvent::Completed { response } => {
                self.finish(response, false, &mut events);
            }
            ResponsesStreamEvent::Incomplete { response } => {
                self.finish(response, true, &mut events);
            }

            ResponsesStreamEvent::Failed { response } => {
                self.done = true;
                let (kind, message) = match &response.error {
                    Some(err) => (
                        err.code.clone().unwrap_or_else(|| "api_error".to_string()),
                        err.message.clone(),
                    ),
                    None => ("api_error".to_string(), "response failed".to_string()),
                };
                return Err(GatewayError::upstream(kind, message));
            }

            ResponsesStreamEvent::Error { code, message } => {
                self.done = true;
                return Err(GatewayError::upstream(
                    code.clone().unwrap_or_else(|| "api_error".to_string()),
                    message.clone(),
                ));
            }

            ResponsesStreamEvent::Other => {}
        }

        Ok(events)
    }

    /// Flush after the upstream source is exhausted. Reaching this without a
    /// terminal event means the stream was cut short; report that instead of a
    /// clean `message_stop`.
    pub fn end_of_source(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.done = true;

        let mut events = Vec::new();
        self.close_open_blocks(&mut events);
        events.push(error_event(&GatewayError::incomplete_stream(
            "stream ended before a terminal event",
        )));
        events
    }

    fn ensure_started(&mut self, events: &mut Vec<StreamEvent>) {
        if !self.started {
            self.started = true;
            events.push(message_start_event(&self.meta, 0));
        }
    }

    fn open_item(&mut self, item: &OutputItem, events: &mut Vec<StreamEvent>) {
        let (content_block, initial_args) = match item {
            OutputItem::Message { .. } => (
                ResponseContentBlock::Text {
                    text: String::new(),
                },
                None,
            ),
            OutputItem::FunctionCall {
                id,
                call_id,
                name,
                arguments,
            } => {
                self.saw_function_call = true;
                (
                    ResponseContentBlock::ToolUse {
                        // The id tool results must reference is the call_id.
                        id: call_id.clone().or_else(|| id.clone()).unwrap_or_default(),
                        name: name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                    (!arguments.is_empty()).then(|| arguments.clone()),
                )
            }
            OutputItem::Reasoning { .. } => (
                ResponseContentBlock::Thinking {
                    thinking: String::new(),
                    signature: None,
                },
                None,
            ),
            OutputItem::Unknown => return,
        };

        let index = self.next_index;
        self.next_index += 1;
        let key = item_key(item).unwrap_or_else(|| format!("item_{index}"));

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });

        let mut block = ItemBlock {
            index,
            closed: false,
            args_emitted: 0,
        };
        // Some backends put the full (or partial) arguments on the added item.
        if let Some(args) = initial_args {
            block.args_emitted = args.len();
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json: args },
            });
        }
        self.blocks.insert(key.clone(), block);
        self.current_key = Some(key);
    }

    fn close_item(&mut self, item: &OutputItem, events: &mut Vec<StreamEvent>) {
        let Some(key) = item_key(item).or_else(|| self.current_key.clone()) else {
            return;
        };
        let Some(block) = self.blocks.get_mut(&key) else {
            return;
        };
        if block.closed {
            // Duplicate done events are ignored.
            return;
        }

        // The done item carries the complete arguments; emit whatever the
        // argument deltas did not already cover.
        if let OutputItem::FunctionCall { arguments, .. } = item {
            if let Some(remainder) = arguments.get(block.args_emitted..).filter(|s| !s.is_empty())
            {
                events.push(StreamEvent::ContentBlockDelta {
                    index: block.index,
                    delta: Delta::InputJsonDelta {
                        partial_json: remainder.to_string(),
                    },
                });
                block.args_emitted = arguments.len();
            }
        }

        block.closed = true;
        events.push(StreamEvent::ContentBlockStop { index: block.index });
    }

    fn finish(
        &mut self,
        response: &ResponsesResponse,
        incomplete: bool,
        events: &mut Vec<StreamEvent>,
    ) {
        self.done = true;
        self.close_open_blocks(events);

        // The terminal response may list calls that were never announced as items.
        let saw_call = self.saw_function_call
            || response
                .output
                .iter()
                .any(|item| matches!(item, OutputItem::FunctionCall { .. }));

        let stop_reason = if incomplete {
            "max_tokens"
        } else if saw_call {
            "tool_use"
        } else {
            "end_turn"
        };

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: terminal_usage(response),
        });
        events.push(StreamEvent::MessageStop);
    }

    fn close_open_blocks(&mut self, events: &mut Vec<StreamEvent>) {
        let mut open: Vec<usize> = self
            .blocks
            .values_mut()
            .filter(|b| !b.closed)
            .map(|b| {
                b.closed = true;
                b.index
            })
            .collect();
        open.sort_unstable();
        for index in open {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn block_index(&self, item_id: &str) -> Option<usize> {
        let key = self.resolve_key(item_id)?;
        self.blocks.get(&key).filter(|b| !b.closed).map(|b| b.index)
    }

    fn resolve_key(&self, item_id: &str) -> Option<String> {
        if item_id.is_empty() {
            self.current_key.clone()
        } else {
            Some(item_id.to_string())
        }
    }
}

fn item_key(item: &OutputItem) -> Option<String> {
    match item {
        OutputItem::Message { id, .. } | OutputItem::Reasoning { id, .. } => id.clone(),
        OutputItem::FunctionCall { id, call_id, .. } => id.clone().or_else(|| call_id.clone()),
        OutputItem::Unknown => None,
    }
}

fn terminal_usage(response: &ResponsesResponse) -> DeltaUsage {
    let usage = response.usage.as_ref().map_or_else(TokenUsage::default, |u| TokenUsage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: u
            .input_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .filter(|n| *n > 0),
    });
    delta_usage(&usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::item_types::{
        InputTokensDetails, OutputPart, ResponsesError, ResponsesUsage,
    };

    fn translator() -> ItemStreamTranslator {
        ItemStreamTranslator::new(StreamMeta {
            message_id: "msg_test".to_string(),
            model: "test-model".to_string(),
        })
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_name()).collect()
    }

    fn response(status: &str) -> ResponsesResponse {
        ResponsesResponse {
            id: "resp_1".to_string(),
            model: "o4-mini".to_string(),
            status: Some(status.to_string()),
            output: Vec::new(),
            usage: None,
            error: None,
        }
    }

    fn message_item(id: &str) -> OutputItem {
        OutputItem::Message {
            id: Some(id.to_string()),
            role: "assistant".to_string(),
            content: Vec::<OutputPart>::new(),
        }
    }

    fn call_item(id: &str, call_id: &str, args: &str) -> OutputItem {
        OutputItem::FunctionCall {
            id: Some(id.to_string()),
            call_id: Some(call_id.to_string()),
            name: "get_weather".to_string(),
            arguments: args.to_string(),
        }
    }

    #[test]
    fn test_text_item_lifecycle() {
        let mut t = translator();

        let events = t
            .feed(&ResponsesStreamEvent::Created {
                response: response("in_progress"),
            })
            .unwrap();
        assert_eq!(names(&events), ["message_start"]);

        let events = t
            .feed(&ResponsesStreamEvent::OutputItemAdded {
                output_index: Some(0),
                item: message_item("msg_a"),
            })
            .unwrap();
        assert_eq!(names(&events), ["content_block_start"]);

        let events = t
            .feed(&ResponsesStreamEvent::OutputTextDelta {
                item_id: "msg_a".to_string(),
                delta: "Hello".to_string(),
            })
            .unwrap();
        assert!(matches!(
            &events[0],
            StreamEvent::ContentBlockDelta { index: 0, delta: Delta::TextDelta { text } }
                if text == "Hello"
        ));

        let events = t
            .feed(&ResponsesStreamEvent::OutputItemDone {
                item: message_item("msg_a"),
            })
            .unwrap();
        assert_eq!(names(&events), ["content_block_stop"]);

        let mut done = response("completed");
        done.usage = Some(ResponsesUsage {
            input_tokens: 5,
            output_tokens: 9,
            total_tokens: 14,
            input_tokens_details: Some(InputTokensDetails { cached_tokens: 2 }),
        });
        let events = t
            .feed(&ResponsesStreamEvent::Completed { response: done })
            .unwrap();
        assert_eq!(names(&events), ["message_delta", "message_stop"]);
        let StreamEvent::MessageDelta { delta, usage } = &events[0] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(usage.input_tokens, Some(5));
        assert_eq!(usage.output_tokens, 9);
        assert_eq!(usage.cache_read_input_tokens, Some(2));
    }

    #[test]
    fn test_function_call_arguments_remainder_on_done() {
        let mut t = translator();

        // Added with no arguments yet.
        let events = t
            .feed(&ResponsesStreamEvent::OutputItemAdded {
                output_index: Some(0),
                item: call_item("fc_1", "call_1", ""),
            })
            .unwrap();
        assert_eq!(names(&events), ["message_start", "content_block_start"]);
        assert!(matches!(
            &events[1],
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ResponseContentBlock::ToolUse { id, name, .. },
            } if id == "call_1" && name == "get_weather"
        ));

        let events = t
            .feed(&ResponsesStreamEvent::FunctionCallArgumentsDelta {
                item_id: "fc_1".to_string(),
                delta: "{\"city\":".to_string(),
            })
            .unwrap();
        assert_eq!(names(&events), ["content_block_delta"]);

        // The done item carries the full arguments; only the unsent tail goes out.
        let events = t
            .feed(&ResponsesStreamEvent::OutputItemDone {
                item: call_item("fc_1", "call_1", "{\"city\":\"NY\"}"),
            })
            .unwrap();
        assert_eq!(names(&events), ["content_block_delta", "content_block_stop"]);
        assert!(matches!(
            &events[0],
            StreamEvent::ContentBlockDelta { delta: Delta::InputJsonDelta { partial_json }, .. }
                if partial_json == "\"NY\"}"
        ));

        // Duplicate done is ignored.
        let events = t
            .feed(&ResponsesStreamEvent::OutputItemDone {
                item: call_item("fc_1", "call_1", "{\"city\":\"NY\"}"),
            })
            .unwrap();
        assert!(events.is_empty());

        let events = t
            .feed(&ResponsesStreamEvent::Completed {
                response: response("completed"),
            })
            .unwrap();
        let StreamEvent::MessageDelta { delta, .. } = &events[0] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_added_item_with_inline_arguments() {
        let mut t = translator();
        let events = t
            .feed(&ResponsesStreamEvent::OutputItemAdded {
                output_index: Some(0),
                item: call_item("fc_1", "call_1", "{\"x\":1}"),
            })
            .unwrap();
        assert_eq!(
            names(&events),
            ["message_start", "content_block_start", "content_block_delta"]
        );

        // Done with identical arguments adds nothing.
        let events = t
            .feed(&ResponsesStreamEvent::OutputItemDone {
                item: call_item("fc_1", "call_1", "{\"x\":1}"),
            })
            .unwrap();
        assert_eq!(names(&events), ["content_block_stop"]);
    }

    #[test]
    fn test_call_only_in_terminal_output_stops_with_tool_use() {
        let mut t = translator();
        let _ = t
            .feed(&ResponsesStreamEvent::Created {
                response: response("in_progress"),
            })
            .unwrap();

        // No item events at all; the call shows up only in the final output.
        let mut done = response("completed");
        done.output = vec![call_item("fc_1", "call_1", "{\"city\":\"NY\"}")];
        let events = t
            .feed(&ResponsesStreamEvent::Completed { response: done })
            .unwrap();
        assert_eq!(names(&events), ["message_delta", "message_stop"]);
        let StreamEvent::MessageDelta { delta, .. } = &events[0] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_deltas_route_by_item_id_not_recency() {
        let mut t = translator();
        let _ = t
            .feed(&ResponsesStreamEvent::OutputItemAdded {
                output_index: Some(0),
                item: message_item("msg_a"),
            })
            .unwrap();
        let _ = t
            .feed(&ResponsesStreamEvent::OutputItemAdded {
                output_index: Some(1),
                item: message_item("msg_b"),
            })
            .unwrap();

        // msg_b is current, but the delta names msg_a.
        let events = t
            .feed(&ResponsesStreamEvent::OutputTextDelta {
                item_id: "msg_a".to_string(),
                delta: "late".to_string(),
            })
            .unwrap();
        assert!(matches!(
            &events[0],
            StreamEvent::ContentBlockDelta { index: 0, .. }
        ));
    }

    #[test]
    fn test_empty_item_id_falls_back_to_current_block() {
        let mut t = translator();
        let _ = t
            .feed(&ResponsesStreamEvent::OutputItemAdded {
                output_index: Some(0),
                item: message_item("msg_a"),
            })
            .unwrap();

        let events = t
            .feed(&ResponsesStreamEvent::OutputTextDelta {
                item_id: String::new(),
                delta: "hi".to_string(),
            })
            .unwrap();
        assert!(matches!(
            &events[0],
            StreamEvent::ContentBlockDelta { index: 0, .. }
        ));
    }

    #[test]
    fn test_unknown_item_delta_ignored() {
        let mut t = translator();
        let _ = t
            .feed(&ResponsesStreamEvent::Created {
                response: response("in_progress"),
            })
            .unwrap();
        let events = t
            .feed(&ResponsesStreamEvent::OutputTextDelta {
                item_id: "nope".to_string(),
                delta: "x".to_string(),
            })
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_incomplete_closes_blocks_and_maps_to_max_tokens() {
        let mut t = translator();
        let _ = t
            .feed(&ResponsesStreamEvent::OutputItemAdded {
                output_index: Some(0),
                item: message_item("msg_a"),
            })
            .unwrap();

        // No item.done: the terminal event closes the block itself.
        let events = t
            .feed(&ResponsesStreamEvent::Incomplete {
                response: response("incomplete"),
            })
            .unwrap();
        assert_eq!(
            names(&events),
            ["content_block_stop", "message_delta", "message_stop"]
        );
        let StreamEvent::MessageDelta { delta, .. } = &events[1] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason.as_deref(), Some("max_tokens"));
    }

    #[test]
    fn test_failed_surfaces_upstream_error() {
        let mut t = translator();
        let mut resp = response("failed");
        resp.error = Some(ResponsesError {
            code: Some("overloaded_error".to_string()),
            message: "try later".to_string(),
        });

        let err = t
            .feed(&ResponsesStreamEvent::Failed { response: resp })
            .unwrap_err();
        assert_eq!(err.error_type(), "overloaded_error");
        assert!(err.to_string().contains("try later"));

        // Stream is over; later events do nothing.
        assert!(t
            .feed(&ResponsesStreamEvent::Created {
                response: response("in_progress")
            })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_error_event_surfaces_upstream_error() {
        let mut t = translator();
        let err = t
            .feed(&ResponsesStreamEvent::Error {
                code: None,
                message: "bad gateway".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.error_type(), "api_error");
    }

    #[test]
    fn test_end_without_terminal_reports_incomplete() {
        let mut t = translator();
        let _ = t
            .feed(&ResponsesStreamEvent::Created {
                response: response("in_progress"),
            })
            .unwrap();
        let _ = t
            .feed(&ResponsesStreamEvent::OutputItemAdded {
                output_index: Some(0),
                item: message_item("msg_a"),
            })
            .unwrap();

        let events = t.end_of_source();
        assert_eq!(names(&events), ["content_block_stop", "error"]);
        assert!(matches!(
            &events[1],
            StreamEvent::Error { error } if error.error_type == "incomplete_stream_error"
        ));

        // Nothing ever arrived: no fabricated message_start, just the error.
        let mut empty = translator();
        assert_eq!(names(&empty.end_of_source()), ["error"]);
    }
}
