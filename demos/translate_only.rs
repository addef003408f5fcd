//! Exercise the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use std::collections::HashMap;

use switchboard::translate::anthropic_types::{
    Message, MessageContent, MessagesRequest, Role, SystemContent,
};
use switchboard::translate::chat_types::{
    ChatCompletionChunk, ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, ChunkChoice,
    ChunkDelta,
};
use switchboard::translate::delta_stream::{chunk_to_delta, DeltaStreamTranslator};
use switchboard::translate::request::{
    to_canonical, to_chat_wire, to_responses_wire, TranslateOptions,
};
use switchboard::translate::response::{chat_to_canonical, to_messages};
use switchboard::translate::StreamMeta;

fn main() -> anyhow::Result<()> {
    // An Anthropic Messages request, as a Claude client would send it.
    let request = MessagesRequest {
        model: "claude-sonnet-4-20250514".to_string(),
        max_tokens: Some(1024),
        messages: vec![
            Message {
                role: Role::User,
                content: MessageContent::Text("What is the capital of France?".to_string()),
            },
            Message {
                role: Role::Assistant,
                content: MessageContent::Text("The capital of France is Paris.".to_string()),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text("And Germany?".to_string()),
            },
        ],
        system: Some(SystemContent::Text(
            "You are a geography expert. Be concise.".to_string(),
        )),
        stream: Some(true),
        temperature: Some(0.7),
        top_p: None,
        top_k: None,
        tools: None,
        tool_choice: None,
        metadata: None,
        stop_sequences: None,
        thinking: None,
        extra: serde_json::Map::new(),
    };

    let models = HashMap::from([(
        "claude-sonnet-4-20250514".to_string(),
        "gpt-4o".to_string(),
    )]);

    // One canonical form, two wire projections.
    let canonical = to_canonical(&request, &TranslateOptions::default())?;

    println!("=== Chat-completions wire form ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&to_chat_wire(&canonical, &models))?
    );
    println!();
    println!("=== Responses wire form ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&to_responses_wire(&canonical, &models))?
    );

    // Simulate a backend response and lift it back.
    let backend_resp = ChatCompletionResponse {
        id: "chatcmpl-demo".to_string(),
        object: "chat.completion".to_string(),
        created: 0,
        model: "gpt-4o".to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some("The capital of Germany is Berlin.".to_string()),
                reasoning_content: None,
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: 42,
            completion_tokens: 8,
            total_tokens: 50,
            prompt_tokens_details: None,
        }),
    };

    let response = to_messages(&chat_to_canonical(&backend_resp), "claude-sonnet-4-20250514");

    println!();
    println!("=== Lifted response (Anthropic format) ===");
    println!("{}", serde_json::to_string_pretty(&response)?);

    // Feed a few streaming chunks through the delta translator.
    println!();
    println!("=== Streaming translation ===");

    let mut translator = DeltaStreamTranslator::new(StreamMeta::new("claude-sonnet-4-20250514"));
    for event in translator.begin() {
        println!("  begin -> {}", event.event_name());
    }

    for (i, text) in ["The", " capital", " is Berlin."].iter().enumerate() {
        let chunk = text_chunk(Some(text.to_string()), None);
        for event in translator.feed(&chunk_to_delta(&chunk))? {
            println!("  chunk {} -> {}", i, event.event_name());
        }
    }

    let finish = text_chunk(None, Some("stop".to_string()));
    for event in translator.feed(&chunk_to_delta(&finish))? {
        println!("  finish -> {}", event.event_name());
    }
    for event in translator.end_of_source() {
        println!("  flush -> {}", event.event_name());
    }

    println!();
    println!("Done! The translation layer works without any network calls.");
    Ok(())
}

fn text_chunk(content: Option<String>, finish_reason: Option<String>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: "chatcmpl-demo".to_string(),
        object: "chat.completion.chunk".to_string(),
        created: 0,
        model: "gpt-4o".to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                content,
                ..ChunkDelta::default()
            },
            finish_reason,
        }],
        usage: None,
    }
}
