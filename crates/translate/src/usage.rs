//! Usage accounting across dialects.

use serde_json::Value;

/// Token counts extracted from the internal `usageMetadata` block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub thoughts_tokens: u64,
    /// Image-modality candidate tokens, reported separately.
    pub image_tokens: u64,
}

impl UsageCounts {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

fn field(usage: &Value, key: &str) -> u64 {
    usage.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Parse the internal chunk's `usageMetadata`.
///
/// Prompt = prompt + tool-use prompt tokens; completion = candidates +
/// thoughts tokens.
pub fn parse_usage(chunk: &Value) -> Option<UsageCounts> {
    let usage = chunk.get("usageMetadata")?;

    let image_tokens = usage
        .get("candidatesTokensDetails")
        .and_then(Value::as_array)
        .map(|details| {
            details
                .iter()
                .filter(|d| d.get("modality").and_then(Value::as_str) == Some("IMAGE"))
                .map(|d| field(d, "tokenCount"))
                .sum()
        })
        .unwrap_or(0);

    Some(UsageCounts {
        prompt_tokens: field(usage, "promptTokenCount") + field(usage, "toolUsePromptTokenCount"),
        completion_tokens: field(usage, "candidatesTokenCount") + field(usage, "thoughtsTokenCount"),
        thoughts_tokens: field(usage, "thoughtsTokenCount"),
        image_tokens,
    })
}

/// OpenAI `usage` object.
pub fn openai_usage(usage: &UsageCounts) -> Value {
    let mut value = serde_json::json!({
        "prompt_tokens": usage.prompt_tokens,
        "completion_tokens": usage.completion_tokens,
        "total_tokens": usage.total_tokens(),
    });
    if usage.thoughts_tokens > 0 {
        value["completion_tokens_details"] =
            serde_json::json!({ "reasoning_tokens": usage.thoughts_tokens });
    }
    if usage.image_tokens > 0 {
        value["completion_tokens_details"]["image_tokens"] =
            serde_json::json!(usage.image_tokens);
    }
    value
}

/// Anthropic `usage` object.
pub fn claude_usage(usage: &UsageCounts) -> Value {
    serde_json::json!({
        "input_tokens": usage.prompt_tokens,
        "output_tokens": usage.completion_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_prompt_and_completion_components() {
        let chunk = serde_json::json!({
            "usageMetadata": {
                "promptTokenCount": 100,
                "toolUsePromptTokenCount": 20,
                "candidatesTokenCount": 50,
                "thoughtsTokenCount": 30,
                "candidatesTokensDetails": [
                    { "modality": "TEXT", "tokenCount": 50 },
                    { "modality": "IMAGE", "tokenCount": 258 }
                ]
            }
        });
        let usage = parse_usage(&chunk).unwrap();
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 80);
        assert_eq!(usage.thoughts_tokens, 30);
        assert_eq!(usage.image_tokens, 258);
        assert_eq!(usage.total_tokens(), 200);
    }

    #[test]
    fn missing_usage_metadata_is_none() {
        assert_eq!(parse_usage(&serde_json::json!({"candidates": []})), None);
    }

    #[test]
    fn openai_usage_reports_reasoning_tokens() {
        let usage = UsageCounts {
            prompt_tokens: 10,
            completion_tokens: 20,
            thoughts_tokens: 5,
            image_tokens: 0,
        };
        let value = openai_usage(&usage);
        assert_eq!(value["total_tokens"], 30);
        assert_eq!(value["completion_tokens_details"]["reasoning_tokens"], 5);
    }
}
