//! Internal dialect → public dialect response translation.
//!
//! Streaming keeps a per-request [`StreamState`]; each internal chunk maps
//! to zero or more public SSE frames with per-part ordering preserved, and
//! the terminal event is emitted exactly once. Non-streaming aggregates the
//! same parts into a single body.

pub mod claude;
pub mod gemini;
pub mod openai;

use serde_json::Value;

use crate::usage::{UsageCounts, parse_usage};

/// Which public dialect the response is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Claude,
    Gemini,
}

/// One server-sent-events frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn data(payload: &Value) -> Self {
        Self {
            event: None,
            data: payload.to_string(),
        }
    }

    pub fn event(name: &str, payload: &Value) -> Self {
        Self {
            event: Some(name.to_string()),
            data: payload.to_string(),
        }
    }

    /// The OpenAI stream terminator.
    pub fn done() -> Self {
        Self {
            event: None,
            data: "[DONE]".to_string(),
        }
    }

    pub fn to_wire(&self) -> String {
        match &self.event {
            Some(event) => format!("event: {event}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

/// One decoded part of an internal chunk.
#[derive(Debug, Clone)]
pub(crate) enum ChunkPart {
    Thought(String),
    Text(String),
    ToolCall { name: String, args: Value },
    InlineData { mime_type: String, data: String },
}

/// Aggregated tool call (non-streaming assembly).
#[derive(Debug, Clone)]
pub(crate) struct ToolCallAcc {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Per-request streaming translation state.
#[derive(Debug)]
pub struct StreamState {
    pub(crate) dialect: Dialect,
    pub(crate) id: String,
    pub(crate) created: u64,
    pub(crate) model: String,
    pub(crate) role_sent: bool,
    pub(crate) block_index: usize,
    pub(crate) thinking_open: bool,
    pub(crate) text_open: bool,
    pub(crate) tool_open: bool,
    pub(crate) next_tool_index: u64,
    pub(crate) saw_tool_call: bool,
    pub(crate) finish_reason: Option<String>,
    pub(crate) usage: Option<UsageCounts>,
    pub(crate) raw_usage: Option<Value>,
    terminal_emitted: bool,
    // Non-streaming aggregation.
    pub(crate) thinking_buf: String,
    pub(crate) text_buf: String,
    pub(crate) tool_calls: Vec<ToolCallAcc>,
    pub(crate) inline_parts: Vec<Value>,
}

impl StreamState {
    pub fn new(dialect: Dialect, model: impl Into<String>) -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let id = match dialect {
            Dialect::OpenAi => format!("chatcmpl-{uuid}"),
            Dialect::Claude => format!("msg_{uuid}"),
            Dialect::Gemini => uuid,
        };
        let created = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            dialect,
            id,
            created,
            model: model.into(),
            role_sent: false,
            block_index: 0,
            thinking_open: false,
            text_open: false,
            tool_open: false,
            next_tool_index: 0,
            saw_tool_call: false,
            finish_reason: None,
            usage: None,
            raw_usage: None,
            terminal_emitted: false,
            thinking_buf: String::new(),
            text_buf: String::new(),
            tool_calls: Vec::new(),
            inline_parts: Vec::new(),
        }
    }

    /// Translate one internal chunk into public frames.
    pub fn on_chunk(&mut self, chunk: &Value) -> Vec<SseFrame> {
        if let Some(usage) = parse_usage(chunk) {
            self.usage = Some(usage);
            self.raw_usage = chunk.get("usageMetadata").cloned();
        }
        if let Some(reason) = chunk["candidates"][0]
            .get("finishReason")
            .and_then(Value::as_str)
        {
            self.finish_reason = Some(reason.to_string());
        }

        let parts = decode_parts(chunk);
        for part in &parts {
            self.aggregate(part);
        }

        match self.dialect {
            Dialect::OpenAi => openai::stream_frames(self, &parts),
            Dialect::Claude => claude::stream_frames(self, &parts),
            Dialect::Gemini => gemini::stream_frames(self, chunk),
        }
    }

    /// Emit the terminal event(s). At most once; later calls return nothing.
    pub fn finalize(&mut self) -> Vec<SseFrame> {
        if self.terminal_emitted {
            return Vec::new();
        }
        self.terminal_emitted = true;
        match self.dialect {
            Dialect::OpenAi => openai::final_frames(self),
            Dialect::Claude => claude::final_frames(self),
            Dialect::Gemini => gemini::final_frames(self),
        }
    }

    /// Assemble the non-streaming response body from everything seen.
    pub fn non_streaming_body(&self) -> Value {
        match self.dialect {
            Dialect::OpenAi => openai::body(self),
            Dialect::Claude => claude::body(self),
            Dialect::Gemini => gemini::body(self),
        }
    }

    pub(crate) fn openai_finish_reason(&self) -> &'static str {
        if self.saw_tool_call {
            return "tool_calls";
        }
        match self.finish_reason.as_deref() {
            Some("MAX_TOKENS") => "length",
            Some("SAFETY") => "content_filter",
            _ => "stop",
        }
    }

    pub(crate) fn claude_stop_reason(&self) -> &'static str {
        if self.saw_tool_call {
            return "tool_use";
        }
        match self.finish_reason.as_deref() {
            Some("MAX_TOKENS") => "max_tokens",
            _ => "end_turn",
        }
    }

    fn aggregate(&mut self, part: &ChunkPart) {
        match part {
            ChunkPart::Thought(text) => self.thinking_buf.push_str(text),
            ChunkPart::Text(text) => self.text_buf.push_str(text),
            ChunkPart::ToolCall { name, args } => {
                let id = format!("call_{:08x}", self.tool_calls.len() + 1);
                self.tool_calls.push(ToolCallAcc {
                    id,
                    name: name.clone(),
                    args: args.clone(),
                });
            },
            ChunkPart::InlineData { mime_type, data } => {
                self.inline_parts.push(serde_json::json!({
                    "inlineData": { "mimeType": mime_type, "data": data }
                }));
            },
        }
    }
}

fn decode_parts(chunk: &Value) -> Vec<ChunkPart> {
    let Some(parts) = chunk["candidates"][0]["content"]
        .get("parts")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    parts
        .iter()
        .filter_map(|part| {
            if let Some(call) = part.get("functionCall") {
                return Some(ChunkPart::ToolCall {
                    name: call
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    args: call.get("args").cloned().unwrap_or(Value::Null),
                });
            }
            if let Some(blob) = part.get("inlineData") {
                return Some(ChunkPart::InlineData {
                    mime_type: blob
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .unwrap_or("application/octet-stream")
                        .to_string(),
                    data: blob
                        .get("data")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            let text = part.get("text").and_then(Value::as_str)?;
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                Some(ChunkPart::Thought(text.to_string()))
            } else {
                Some(ChunkPart::Text(text.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn text_chunk(text: &str) -> Value {
    serde_json::json!({
        "candidates": [{ "content": { "role": "model",
            "parts": [{ "text": text }] }, "index": 0 }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frame_wire_formats() {
        let data = SseFrame::data(&serde_json::json!({"a": 1}));
        assert_eq!(data.to_wire(), "data: {\"a\":1}\n\n");

        let event = SseFrame::event("message_stop", &serde_json::json!({"type": "message_stop"}));
        assert!(event.to_wire().starts_with("event: message_stop\ndata: "));
    }

    #[test]
    fn finalize_is_at_most_once() {
        let mut state = StreamState::new(Dialect::OpenAi, "gemini-2.5-pro");
        state.on_chunk(&text_chunk("hello"));
        let first = state.finalize();
        assert!(!first.is_empty());
        assert!(state.finalize().is_empty());
    }

    #[test]
    fn finish_reason_mapping() {
        let mut state = StreamState::new(Dialect::OpenAi, "m");
        state.finish_reason = Some("MAX_TOKENS".into());
        assert_eq!(state.openai_finish_reason(), "length");
        assert_eq!(state.claude_stop_reason(), "max_tokens");

        state.finish_reason = Some("SAFETY".into());
        assert_eq!(state.openai_finish_reason(), "content_filter");
        assert_eq!(state.claude_stop_reason(), "end_turn");

        state.saw_tool_call = true;
        assert_eq!(state.openai_finish_reason(), "tool_calls");
        assert_eq!(state.claude_stop_reason(), "tool_use");
    }

    #[test]
    fn thought_parts_are_distinguished() {
        let chunk = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "pondering", "thought": true },
                { "text": "answer" }
            ]}}]
        });
        let parts = decode_parts(&chunk);
        assert!(matches!(&parts[0], ChunkPart::Thought(t) if t == "pondering"));
        assert!(matches!(&parts[1], ChunkPart::Text(t) if t == "answer"));
    }
}
