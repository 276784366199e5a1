//! OpenAI chat-completions rendering.

use serde_json::Value;

use crate::{
    response::{ChunkPart, SseFrame, StreamState},
    usage::openai_usage,
};

fn chunk_envelope(state: &StreamState, delta: Value, finish_reason: Option<&str>) -> Value {
    serde_json::json!({
        "id": state.id,
        "object": "chat.completion.chunk",
        "created": state.created,
        "model": state.model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }]
    })
}

pub(crate) fn stream_frames(state: &mut StreamState, parts: &[ChunkPart]) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    for part in parts {
        let mut delta = match part {
            ChunkPart::Thought(text) => serde_json::json!({ "reasoning_content": text }),
            ChunkPart::Text(text) => serde_json::json!({ "content": text }),
            ChunkPart::ToolCall { name, args } => {
                state.saw_tool_call = true;
                let index = state.next_tool_index;
                state.next_tool_index += 1;
                serde_json::json!({
                    "tool_calls": [{
                        "index": index,
                        "id": format!("call_{:08x}", index + 1),
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": args.to_string(),
                        }
                    }]
                })
            },
            // Image output has no chat-completions delta shape; the data is
            // still accounted for in usage.
            ChunkPart::InlineData { .. } => continue,
        };

        if !state.role_sent {
            state.role_sent = true;
            delta["role"] = serde_json::json!("assistant");
        }
        frames.push(SseFrame::data(&chunk_envelope(state, delta, None)));
    }
    frames
}

pub(crate) fn final_frames(state: &StreamState) -> Vec<SseFrame> {
    let mut envelope = chunk_envelope(
        state,
        serde_json::json!({}),
        Some(state.openai_finish_reason()),
    );
    if let Some(usage) = &state.usage {
        envelope["usage"] = openai_usage(usage);
    }
    vec![SseFrame::data(&envelope), SseFrame::done()]
}

pub(crate) fn body(state: &StreamState) -> Value {
    let mut message = serde_json::json!({ "role": "assistant" });
    message["content"] = if state.text_buf.is_empty() {
        Value::Null
    } else {
        Value::String(state.text_buf.clone())
    };
    if !state.thinking_buf.is_empty() {
        message["reasoning_content"] = Value::String(state.thinking_buf.clone());
    }
    if !state.tool_calls.is_empty() {
        message["tool_calls"] = state
            .tool_calls
            .iter()
            .map(|call| {
                serde_json::json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.args.to_string(),
                    }
                })
            })
            .collect();
    }

    let mut body = serde_json::json!({
        "id": state.id,
        "object": "chat.completion",
        "created": state.created,
        "model": state.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": state.openai_finish_reason(),
        }]
    });
    if let Some(usage) = &state.usage {
        body["usage"] = openai_usage(usage);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{Dialect, text_chunk};

    #[test]
    fn first_frame_carries_role() {
        let mut state = StreamState::new(Dialect::OpenAi, "gemini-2.5-pro");
        let frames = state.on_chunk(&text_chunk("hel"));
        assert_eq!(frames.len(), 1);
        let payload: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(payload["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(payload["choices"][0]["delta"]["content"], "hel");

        let frames = state.on_chunk(&text_chunk("lo"));
        let payload: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert!(payload["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn stream_terminates_with_finish_reason_and_done() {
        let mut state = StreamState::new(Dialect::OpenAi, "gemini-2.5-pro");
        state.on_chunk(&text_chunk("hi"));
        state.on_chunk(&serde_json::json!({
            "candidates": [{ "finishReason": "STOP", "content": { "parts": [] } }],
            "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 1 }
        }));
        let frames = state.finalize();
        assert_eq!(frames.len(), 2);
        let last: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["usage"]["total_tokens"], 4);
        assert_eq!(frames[1].data, "[DONE]");
    }

    #[test]
    fn tool_call_deltas_carry_running_index() {
        let mut state = StreamState::new(Dialect::OpenAi, "m");
        let chunk = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "name": "a", "args": {} } },
                { "functionCall": { "name": "b", "args": {"x": 1} } }
            ]}}]
        });
        let frames = state.on_chunk(&chunk);
        let first: Value = serde_json::from_str(&frames[0].data).unwrap();
        let second: Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(first["choices"][0]["delta"]["tool_calls"][0]["index"], 0);
        assert_eq!(second["choices"][0]["delta"]["tool_calls"][0]["index"], 1);
        assert_eq!(
            second["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
            "{\"x\":1}"
        );
        assert_eq!(state.finalize().len(), 2);
        assert_eq!(state.openai_finish_reason(), "tool_calls");
    }

    #[test]
    fn non_streaming_body_aggregates() {
        let mut state = StreamState::new(Dialect::OpenAi, "m");
        state.on_chunk(&serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "let me think", "thought": true },
                { "text": "four" }
            ]}}]
        }));
        state.on_chunk(&serde_json::json!({
            "candidates": [{ "finishReason": "STOP", "content": { "parts": [] } }],
            "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 2 }
        }));
        let body = state.non_streaming_body();
        assert_eq!(body["choices"][0]["message"]["content"], "four");
        assert_eq!(
            body["choices"][0]["message"]["reasoning_content"],
            "let me think"
        );
        assert_eq!(body["usage"]["prompt_tokens"], 5);
    }
}
