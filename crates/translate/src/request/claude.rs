//! Anthropic messages → internal dialect.

use std::collections::HashMap;

use serde_json::Value;

use crate::{
    error::{Error, Result},
    internal::{
        Content, FunctionCall, FunctionCallingConfig, FunctionResponse, GenerationConfig,
        InternalRequest, Part, ThinkingConfig, ToolConfig,
    },
    model::split_model_suffix,
    request::{
        TranslateOptions, TranslatedRequest, collect_text, finalize, image_part,
        system_instruction,
    },
    schema,
};

pub async fn translate_request(
    body: &Value,
    opts: &TranslateOptions,
) -> Result<TranslatedRequest> {
    let model_raw = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("`model` is required".into()))?;
    let (model, suffix) = split_model_suffix(model_raw);
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidInput("`messages` must be an array".into()))?;

    let tool_names = scan_tool_use_names(messages);

    let mut contents: Vec<Content> = Vec::new();
    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        match role {
            "user" => {
                contents.push(Content::user(
                    user_parts(&message["content"], &tool_names).await?,
                ));
            },
            "assistant" => {
                contents.push(Content::model(assistant_parts(&message["content"])));
            },
            other => {
                return Err(Error::InvalidInput(format!("unsupported role `{other}`")));
            },
        }
    }

    let system_texts = match body.get("system") {
        Some(system) => vec![collect_text(system)],
        None => Vec::new(),
    };

    let mut request = InternalRequest {
        system_instruction: system_instruction(system_texts),
        contents,
        generation_config: generation_config(body),
        tools: tools(body),
        tool_config: tool_config(body),
        ..Default::default()
    };

    let explicit_thinking = thinking(body);
    request = finalize(request, explicit_thinking, suffix, opts);
    Ok(TranslatedRequest {
        model,
        stream,
        request: serde_json::to_value(request)
            .map_err(|e| Error::Internal(e.to_string()))?,
    })
}

fn scan_tool_use_names(messages: &[Value]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for message in messages {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                if let (Some(id), Some(name)) = (
                    block.get("id").and_then(Value::as_str),
                    block.get("name").and_then(Value::as_str),
                ) {
                    names.insert(id.to_string(), name.to_string());
                }
            }
        }
    }
    names
}

async fn user_parts(content: &Value, tool_names: &HashMap<String, String>) -> Result<Vec<Part>> {
    match content {
        Value::String(text) => Ok(vec![Part::text(text.clone())]),
        Value::Array(blocks) => {
            let mut parts = Vec::with_capacity(blocks.len());
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            parts.push(Part::text(text));
                        }
                    },
                    Some("image") => {
                        parts.push(image_block(block).await);
                    },
                    Some("tool_result") => {
                        let id = block
                            .get("tool_use_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let name = tool_names
                            .get(id)
                            .cloned()
                            .unwrap_or_else(|| "unknown_function".to_string());
                        parts.push(Part::FunctionResponse {
                            function_response: FunctionResponse {
                                name,
                                response: serde_json::json!({
                                    "result": collect_text(&block["content"])
                                }),
                            },
                        });
                    },
                    _ => {},
                }
            }
            Ok(parts)
        },
        _ => Err(Error::InvalidInput("unsupported message content".into())),
    }
}

async fn image_block(block: &Value) -> Part {
    let source = &block["source"];
    match source.get("type").and_then(Value::as_str) {
        Some("base64") => {
            let mime = source
                .get("media_type")
                .and_then(Value::as_str)
                .unwrap_or("image/jpeg");
            let data = source.get("data").and_then(Value::as_str).unwrap_or("");
            Part::inline_data(mime, data)
        },
        Some("url") => {
            let url = source.get("url").and_then(Value::as_str).unwrap_or("");
            image_part(url).await
        },
        _ => Part::text("[unsupported image source]"),
    }
}

fn assistant_parts(content: &Value) -> Vec<Part> {
    match content {
        Value::String(text) => vec![Part::text(text.clone())],
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => block
                    .get("text")
                    .and_then(Value::as_str)
                    .map(Part::text),
                Some("tool_use") => Some(Part::FunctionCall {
                    function_call: FunctionCall {
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        args: block.get("input").cloned().unwrap_or(Value::Null),
                    },
                    thought_signature: None,
                }),
                // Prior thinking blocks are not echoed back upstream.
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn generation_config(body: &Value) -> Option<GenerationConfig> {
    let mut config = GenerationConfig {
        temperature: body.get("temperature").and_then(Value::as_f64),
        top_p: body.get("top_p").and_then(Value::as_f64),
        top_k: body.get("top_k").and_then(Value::as_u64),
        max_output_tokens: body.get("max_tokens").and_then(Value::as_u64),
        stop_sequences: body
            .get("stop_sequences")
            .and_then(Value::as_array)
            .map(|stops| {
                stops
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        ..Default::default()
    };

    if body["output_format"].get("type").and_then(Value::as_str) == Some("json_schema") {
        config.response_mime_type = Some("application/json".into());
        let mut response_schema = body["output_format"]
            .get("schema")
            .cloned()
            .unwrap_or(Value::Null);
        if !response_schema.is_null() {
            schema::sanitize_schema(&mut response_schema);
            config.response_schema = Some(response_schema);
        }
    }

    if config.is_empty() {
        None
    } else {
        Some(config)
    }
}

fn thinking(body: &Value) -> Option<ThinkingConfig> {
    let thinking = body.get("thinking")?;
    let enabled = thinking.get("type").and_then(Value::as_str) == Some("enabled")
        || thinking.get("enabled").and_then(Value::as_bool) == Some(true);
    enabled.then(|| ThinkingConfig {
        include_thoughts: true,
        thinking_level: None,
    })
}

fn tools(body: &Value) -> Option<Vec<Value>> {
    let declarations: Vec<Value> = body
        .get("tools")?
        .as_array()?
        .iter()
        .filter_map(|tool| {
            Some(serde_json::json!({
                "name": tool.get("name")?.as_str()?,
                "description": tool.get("description").and_then(Value::as_str).unwrap_or(""),
                "parameters": tool.get("input_schema").cloned()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            }))
        })
        .collect();
    if declarations.is_empty() {
        None
    } else {
        Some(vec![schema::function_declarations_tool(declarations)])
    }
}

fn tool_config(body: &Value) -> Option<ToolConfig> {
    let choice = body.get("tool_choice")?;
    let config = match choice.get("type").and_then(Value::as_str)? {
        "none" => FunctionCallingConfig {
            mode: "NONE".into(),
            allowed_function_names: None,
        },
        "any" => FunctionCallingConfig {
            mode: "ANY".into(),
            allowed_function_names: None,
        },
        "tool" => FunctionCallingConfig {
            mode: "ANY".into(),
            allowed_function_names: choice
                .get("name")
                .and_then(Value::as_str)
                .map(|name| vec![name.to_string()]),
        },
        _ => FunctionCallingConfig {
            mode: "AUTO".into(),
            allowed_function_names: None,
        },
    };
    Some(ToolConfig {
        function_calling_config: config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> TranslateOptions {
        TranslateOptions::default()
    }

    #[tokio::test]
    async fn system_and_messages_translate() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 512,
            "system": "Be helpful.",
            "messages": [
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": [{ "type": "text", "text": "hello" }] }
            ]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        assert_eq!(
            t.request["systemInstruction"]["parts"][0]["text"],
            "Be helpful."
        );
        assert_eq!(t.request["contents"][1]["role"], "model");
        assert_eq!(t.request["generationConfig"]["maxOutputTokens"], 512);
    }

    #[tokio::test]
    async fn tool_result_recovers_function_name() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 100,
            "messages": [
                { "role": "user", "content": "check" },
                { "role": "assistant", "content": [
                    { "type": "tool_use", "id": "tu_1", "name": "probe", "input": {"x": 1} }
                ]},
                { "role": "user", "content": [
                    { "type": "tool_result", "tool_use_id": "tu_1", "content": "ok" }
                ]}
            ]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        let contents = t.request["contents"].as_array().unwrap();
        assert_eq!(
            contents[1]["parts"][0]["functionCall"]["name"],
            "probe"
        );
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["name"],
            "probe"
        );
    }

    #[tokio::test]
    async fn thinking_enabled_maps_to_include_thoughts() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 100,
            "thinking": { "type": "enabled", "budget_tokens": 2048 },
            "messages": [{ "role": "user", "content": "hi" }]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        assert_eq!(
            t.request["generationConfig"]["thinkingConfig"]["includeThoughts"],
            true
        );
    }

    #[tokio::test]
    async fn base64_image_becomes_inline_data() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 100,
            "messages": [
                { "role": "user", "content": [
                    { "type": "image", "source": {
                        "type": "base64", "media_type": "image/webp", "data": "QUJD" } }
                ]}
            ]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        assert_eq!(
            t.request["contents"][0]["parts"][0]["inlineData"]["mimeType"],
            "image/webp"
        );
    }

    #[tokio::test]
    async fn tool_choice_any_maps_to_any_mode() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 100,
            "tools": [{ "name": "probe", "description": "", "input_schema": { "type": "object" } }],
            "tool_choice": { "type": "any" },
            "messages": [{ "role": "user", "content": "hi" }]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        assert_eq!(
            t.request["toolConfig"]["functionCallingConfig"]["mode"],
            "ANY"
        );
    }
}
