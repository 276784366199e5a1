//! Anthropic messages rendering.
//!
//! Streaming emits the full event frame sequence: `message_start`,
//! `content_block_start` / `_delta` / `_stop` per block, `message_delta`,
//! `message_stop`.

use serde_json::Value;

use crate::{
    response::{ChunkPart, SseFrame, StreamState},
    usage::claude_usage,
};

pub(crate) fn stream_frames(state: &mut StreamState, parts: &[ChunkPart]) -> Vec<SseFrame> {
    let mut frames = Vec::new();

    if !state.role_sent {
        state.role_sent = true;
        frames.push(SseFrame::event(
            "message_start",
            &serde_json::json!({
                "type": "message_start",
                "message": {
                    "id": state.id,
                    "type": "message",
                    "role": "assistant",
                    "model": state.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": { "input_tokens": 0, "output_tokens": 0 },
                }
            }),
        ));
    }

    for part in parts {
        match part {
            ChunkPart::Thought(text) => {
                if !state.thinking_open {
                    close_open_block(state, &mut frames);
                    state.thinking_open = true;
                    frames.push(block_start(state, &serde_json::json!({
                        "type": "thinking", "thinking": ""
                    })));
                }
                frames.push(block_delta(state, &serde_json::json!({
                    "type": "thinking_delta", "thinking": text
                })));
            },
            ChunkPart::Text(text) => {
                if !state.text_open {
                    close_open_block(state, &mut frames);
                    state.text_open = true;
                    frames.push(block_start(state, &serde_json::json!({
                        "type": "text", "text": ""
                    })));
                }
                frames.push(block_delta(state, &serde_json::json!({
                    "type": "text_delta", "text": text
                })));
            },
            ChunkPart::ToolCall { name, args } => {
                close_open_block(state, &mut frames);
                state.saw_tool_call = true;
                let id = format!("toolu_{:08x}", state.next_tool_index + 1);
                state.next_tool_index += 1;
                frames.push(block_start(state, &serde_json::json!({
                    "type": "tool_use", "id": id, "name": name, "input": {}
                })));
                frames.push(block_delta(state, &serde_json::json!({
                    "type": "input_json_delta", "partial_json": args.to_string()
                })));
                // Function-call args arrive complete in one part.
                frames.push(block_stop(state));
                state.block_index += 1;
            },
            ChunkPart::InlineData { .. } => {},
        }
    }

    frames
}

pub(crate) fn final_frames(state: &mut StreamState) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    close_open_block(state, &mut frames);

    let output_tokens = state.usage.map(|u| u.completion_tokens).unwrap_or(0);
    frames.push(SseFrame::event(
        "message_delta",
        &serde_json::json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": state.claude_stop_reason(),
                "stop_sequence": null,
            },
            "usage": { "output_tokens": output_tokens },
        }),
    ));
    frames.push(SseFrame::event(
        "message_stop",
        &serde_json::json!({ "type": "message_stop" }),
    ));
    frames
}

pub(crate) fn body(state: &StreamState) -> Value {
    let mut content = Vec::new();
    if !state.thinking_buf.is_empty() {
        content.push(serde_json::json!({
            "type": "thinking",
            "thinking": state.thinking_buf,
        }));
    }
    if !state.text_buf.is_empty() {
        content.push(serde_json::json!({
            "type": "text",
            "text": state.text_buf,
        }));
    }
    for call in &state.tool_calls {
        content.push(serde_json::json!({
            "type": "tool_use",
            "id": call.id.replace("call_", "toolu_"),
            "name": call.name,
            "input": call.args,
        }));
    }

    let usage = state
        .usage
        .as_ref()
        .map(claude_usage)
        .unwrap_or_else(|| serde_json::json!({ "input_tokens": 0, "output_tokens": 0 }));

    serde_json::json!({
        "id": state.id,
        "type": "message",
        "role": "assistant",
        "model": state.model,
        "content": content,
        "stop_reason": state.claude_stop_reason(),
        "stop_sequence": null,
        "usage": usage,
    })
}

fn block_start(state: &StreamState, content_block: &Value) -> SseFrame {
    SseFrame::event(
        "content_block_start",
        &serde_json::json!({
            "type": "content_block_start",
            "index": state.block_index,
            "content_block": content_block,
        }),
    )
}

fn block_delta(state: &StreamState, delta: &Value) -> SseFrame {
    SseFrame::event(
        "content_block_delta",
        &serde_json::json!({
            "type": "content_block_delta",
            "index": state.block_index,
            "delta": delta,
        }),
    )
}

fn block_stop(state: &StreamState) -> SseFrame {
    SseFrame::event(
        "content_block_stop",
        &serde_json::json!({
            "type": "content_block_stop",
            "index": state.block_index,
        }),
    )
}

/// Close whichever block is currently streaming and advance the index.
fn close_open_block(state: &mut StreamState, frames: &mut Vec<SseFrame>) {
    if state.thinking_open || state.text_open {
        frames.push(block_stop(state));
        state.block_index += 1;
        state.thinking_open = false;
        state.text_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{Dialect, text_chunk};

    fn events(frames: &[SseFrame]) -> Vec<String> {
        frames
            .iter()
            .map(|f| f.event.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn full_event_sequence_for_text_stream() {
        let mut state = StreamState::new(Dialect::Claude, "gemini-2.5-pro");
        let mut frames = state.on_chunk(&text_chunk("hel"));
        frames.extend(state.on_chunk(&text_chunk("lo")));
        frames.extend(state.finalize());

        assert_eq!(
            events(&frames),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn thinking_then_text_opens_two_blocks() {
        let mut state = StreamState::new(Dialect::Claude, "m");
        let chunk = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "mull", "thought": true },
                { "text": "answer" }
            ]}}]
        });
        let mut frames = state.on_chunk(&chunk);
        frames.extend(state.finalize());

        let kinds: Vec<String> = frames
            .iter()
            .filter(|f| f.event.as_deref() == Some("content_block_start"))
            .map(|f| {
                let v: Value = serde_json::from_str(&f.data).unwrap();
                v["content_block"]["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, ["thinking", "text"]);
    }

    #[test]
    fn tool_use_block_carries_complete_input() {
        let mut state = StreamState::new(Dialect::Claude, "m");
        let chunk = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "name": "probe", "args": { "x": 1 } } }
            ]}}]
        });
        let frames = state.on_chunk(&chunk);
        let start: Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(start["content_block"]["name"], "probe");
        let delta: Value = serde_json::from_str(&frames[2].data).unwrap();
        assert_eq!(delta["delta"]["partial_json"], "{\"x\":1}");

        let finals = state.finalize();
        let message_delta: Value = serde_json::from_str(&finals[0].data).unwrap();
        assert_eq!(message_delta["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn non_streaming_body_orders_blocks() {
        let mut state = StreamState::new(Dialect::Claude, "m");
        state.on_chunk(&serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "hmm", "thought": true },
                { "text": "done" },
                { "functionCall": { "name": "probe", "args": {} } }
            ]}}]
        }));
        let body = state.non_streaming_body();
        let content = body["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "thinking");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[2]["type"], "tool_use");
        assert_eq!(body["stop_reason"], "tool_use");
    }
}
