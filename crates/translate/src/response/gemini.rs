//! Gemini generate-content rendering.
//!
//! Chunks are already Gemini-shaped; streaming relays them with the model
//! name rewritten, and non-streaming assembles aggregated parts into one
//! candidate.

use serde_json::Value;

use crate::response::{SseFrame, StreamState};

pub(crate) fn stream_frames(state: &mut StreamState, chunk: &Value) -> Vec<SseFrame> {
    let mut relayed = chunk.clone();
    if let Some(obj) = relayed.as_object_mut() {
        obj.insert("modelVersion".into(), Value::String(state.model.clone()));
    }
    vec![SseFrame::data(&relayed)]
}

pub(crate) fn final_frames(state: &mut StreamState) -> Vec<SseFrame> {
    // Upstream normally closes with a finishReason-bearing chunk; synthesize
    // one only when it never arrived.
    if state.finish_reason.is_some() {
        return Vec::new();
    }
    state.finish_reason = Some("STOP".to_string());
    vec![SseFrame::data(&serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [] },
            "finishReason": "STOP",
            "index": 0,
        }],
        "modelVersion": state.model,
    }))]
}

pub(crate) fn body(state: &StreamState) -> Value {
    let mut parts = Vec::new();
    if !state.thinking_buf.is_empty() {
        parts.push(serde_json::json!({
            "text": state.thinking_buf,
            "thought": true,
        }));
    }
    if !state.text_buf.is_empty() {
        parts.push(serde_json::json!({ "text": state.text_buf }));
    }
    for call in &state.tool_calls {
        parts.push(serde_json::json!({
            "functionCall": { "name": call.name, "args": call.args }
        }));
    }
    parts.extend(state.inline_parts.iter().cloned());

    let mut body = serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": parts },
            "finishReason": state.finish_reason.as_deref().unwrap_or("STOP"),
            "index": 0,
        }],
        "modelVersion": state.model,
    });
    if let Some(raw_usage) = &state.raw_usage {
        body["usageMetadata"] = raw_usage.clone();
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{Dialect, text_chunk};

    #[test]
    fn streaming_relays_chunks_with_model_rewrite() {
        let mut state = StreamState::new(Dialect::Gemini, "gemini-2.5-pro");
        let frames = state.on_chunk(&text_chunk("hi"));
        assert_eq!(frames.len(), 1);
        let payload: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(payload["modelVersion"], "gemini-2.5-pro");
        assert_eq!(payload["candidates"][0]["content"]["parts"][0]["text"], "hi");
    }

    #[test]
    fn finalize_synthesizes_terminal_only_when_missing() {
        let mut state = StreamState::new(Dialect::Gemini, "m");
        state.on_chunk(&text_chunk("hi"));
        assert_eq!(state.finalize().len(), 1);

        let mut seen = StreamState::new(Dialect::Gemini, "m");
        seen.on_chunk(&serde_json::json!({
            "candidates": [{ "finishReason": "STOP", "content": { "parts": [] } }]
        }));
        assert!(seen.finalize().is_empty());
    }

    #[test]
    fn non_streaming_body_keeps_usage_metadata() {
        let mut state = StreamState::new(Dialect::Gemini, "m");
        state.on_chunk(&text_chunk("answer"));
        state.on_chunk(&serde_json::json!({
            "candidates": [{ "finishReason": "STOP", "content": { "parts": [] } }],
            "usageMetadata": { "promptTokenCount": 9, "candidatesTokenCount": 2 }
        }));
        let body = state.non_streaming_body();
        assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "answer");
        assert_eq!(body["usageMetadata"]["promptTokenCount"], 9);
        assert_eq!(body["candidates"][0]["finishReason"], "STOP");
    }
}
