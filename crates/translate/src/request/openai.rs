//! OpenAI chat-completions → internal dialect.

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

    // Recover tool-call names before walking the dialogue: role=tool messages
    // only carry the call id.
    let call_names = scan_tool_call_names(messages);

    let mut system_texts = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        match role {
            "system" | "developer" => {
                system_texts.push(collect_text(&message["content"]));
            },
            "user" => {
                contents.push(Content::user(user_parts(&message["content"]).await?));
            },
            "assistant" => {
                contents.push(Content::model(assistant_parts(message)));
            },
            "tool" => {
                let id = message
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let name = call_names
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| "unknown_function".to_string());
                // Tool results ride in user turns; consecutive ones coalesce
                // into a single turn to keep roles alternating.
                contents.push(Content::user(vec![Part::FunctionResponse {
                    function_response: FunctionResponse {
                        name,
                        response: serde_json::json!({
                            "result": collect_text(&message["content"])
                        }),
                    },
                }]));
            },
            other => {
                return Err(Error::InvalidInput(format!("unsupported role `{other}`")));
            },
        }
    }

    let mut request = InternalRequest {
        system_instruction: system_instruction(system_texts),
        contents,
        generation_config: generation_config(body),
        tools: tools(body),
        tool_config: tool_config(body),
        ..Default::default()
    };

    let explicit_thinking = body
        .get("reasoning_effort")
        .and_then(Value::as_str)
        .map(|effort| ThinkingConfig {
            include_thoughts: true,
            thinking_level: Some(effort.to_string()),
        });

    request = finalize(request, explicit_thinking, suffix, opts);
    Ok(TranslatedRequest {
        model,
        stream,
        request: serde_json::to_value(request)
            .map_err(|e| Error::Internal(e.to_string()))?,
    })
}

fn scan_tool_call_names(messages: &[Value]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for message in messages {
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            continue;
        };
        for call in calls {
            if let (Some(id), Some(name)) = (
                call.get("id").and_then(Value::as_str),
                call["function"].get("name").and_then(Value::as_str),
            ) {
                names.insert(id.to_string(), name.to_string());
            }
        }
    }
    names
}

async fn user_parts(content: &Value) -> Result<Vec<Part>> {
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
                    Some("image_url") => {
                        let url = block["image_url"]
                            .get("url")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        parts.push(image_part(url).await);
                    },
                    _ => {},
                }
            }
            Ok(parts)
        },
        _ => Err(Error::InvalidInput("unsupported message content".into())),
    }
}

fn assistant_parts(message: &Value) -> Vec<Part> {
    let mut parts = Vec::new();
    let text = collect_text(&message["content"]);
    if !text.is_empty() {
        parts.push(Part::text(text));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let name = call["function"]
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = call["function"]
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_else(|| serde_json::json!({}));
            parts.push(Part::FunctionCall {
                function_call: FunctionCall { name, args },
                thought_signature: None,
            });
        }
    }
    parts
}

fn generation_config(body: &Value) -> Option<GenerationConfig> {
    let mut config = GenerationConfig {
        temperature: body.get("temperature").and_then(Value::as_f64),
        top_p: body.get("top_p").and_then(Value::as_f64),
        max_output_tokens: body
            .get("max_completion_tokens")
            .or_else(|| body.get("max_tokens"))
            .and_then(Value::as_u64),
        stop_sequences: match body.get("stop") {
            Some(Value::String(stop)) => vec![stop.clone()],
            Some(Value::Array(stops)) => stops
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        },
        ..Default::default()
    };

    match body["response_format"].get("type").and_then(Value::as_str) {
        Some("json_schema") => {
            config.response_mime_type = Some("application/json".into());
            let mut response_schema = body["response_format"]["json_schema"]
                .get("schema")
                .cloned()
                .unwrap_or(Value::Null);
            if !response_schema.is_null() {
                schema::sanitize_schema(&mut response_schema);
                config.response_schema = Some(response_schema);
            }
        },
        Some("json_object") => {
            config.response_mime_type = Some("application/json".into());
        },
        _ => {},
    }

    if config.is_empty() {
        None
    } else {
        Some(config)
    }
}

fn tools(body: &Value) -> Option<Vec<Value>> {
    let declarations: Vec<Value> = body
        .get("tools")?
        .as_array()?
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function")?;
            Some(serde_json::json!({
                "name": function.get("name")?.as_str()?,
                "description": function.get("description").and_then(Value::as_str).unwrap_or(""),
                "parameters": function.get("parameters").cloned()
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
    let config = match choice {
        Value::String(mode) => FunctionCallingConfig {
            mode: match mode.as_str() {
                "none" => "NONE".into(),
                "required" => "ANY".into(),
                _ => "AUTO".into(),
            },
            allowed_function_names: None,
        },
        Value::Object(_) => {
            let name = choice["function"].get("name").and_then(Value::as_str)?;
            FunctionCallingConfig {
                mode: "ANY".into(),
                allowed_function_names: Some(vec![name.to_string()]),
            }
        },
        _ => return None,
    };
    Some(ToolConfig {
        function_calling_config: config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::THOUGHT_SIGNATURE_PLACEHOLDER;

    fn opts() -> TranslateOptions {
        TranslateOptions::default()
    }

    #[tokio::test]
    async fn text_conversation_translates_preserving_roles() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "stream": true,
            "messages": [
                { "role": "system", "content": "Be terse." },
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hello" },
                { "role": "user", "content": "bye" }
            ]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        assert_eq!(t.model, "gemini-2.5-pro");
        assert!(t.stream);

        let contents = t.request["contents"].as_array().unwrap();
        let roles: Vec<&str> = contents
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["user", "model", "user"]);
        assert_eq!(contents[0]["parts"][0]["text"], "hi");
        assert_eq!(
            t.request["systemInstruction"]["parts"][0]["text"],
            "Be terse."
        );
        assert_eq!(t.request["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn tool_calls_coalesce_into_three_turns() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "messages": [
                { "role": "user", "content": "check a and b" },
                { "role": "assistant", "tool_calls": [
                    { "id": "call_a", "type": "function",
                      "function": { "name": "check_a", "arguments": "{}" } },
                    { "id": "call_b", "type": "function",
                      "function": { "name": "check_b", "arguments": "{\"x\":1}" } }
                ]},
                { "role": "tool", "tool_call_id": "call_a", "content": "ok" },
                { "role": "tool", "tool_call_id": "call_b", "content": "done" },
                { "role": "user", "content": "thanks" }
            ]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        let contents = t.request["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 4);

        let model_turn = &contents[1];
        assert_eq!(model_turn["role"], "model");
        let parts = model_turn["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0]["thoughtSignature"],
            serde_json::json!(THOUGHT_SIGNATURE_PLACEHOLDER)
        );
        assert!(parts[1].get("thoughtSignature").is_none());

        let tool_turn = &contents[2];
        assert_eq!(tool_turn["role"], "user");
        let responses = tool_turn["parts"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["functionResponse"]["name"], "check_a");
        assert_eq!(
            responses[1]["functionResponse"]["response"]["result"],
            "done"
        );

        assert_eq!(contents[3]["parts"][0]["text"], "thanks");
    }

    #[tokio::test]
    async fn inline_data_url_image() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "messages": [
                { "role": "user", "content": [
                    { "type": "text", "text": "what is this" },
                    { "type": "image_url",
                      "image_url": { "url": "data:image/png;base64,QUJD" } }
                ]}
            ]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        let parts = t.request["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "QUJD");
    }

    #[tokio::test]
    async fn model_suffix_wins_over_reasoning_effort() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro-high",
            "reasoning_effort": "low",
            "messages": [{ "role": "user", "content": "hi" }]
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        assert_eq!(t.model, "gemini-2.5-pro");
        assert_eq!(
            t.request["generationConfig"]["thinkingConfig"]["thinkingLevel"],
            "high"
        );
    }

    #[tokio::test]
    async fn structured_output_maps_to_response_schema() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "messages": [{ "role": "user", "content": "hi" }],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "answer",
                    "schema": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": { "ok": { "type": "boolean" } }
                    }
                }
            }
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        let config = &t.request["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["responseSchema"]["type"], "OBJECT");
        assert!(config["responseSchema"].get("additionalProperties").is_none());
    }

    #[tokio::test]
    async fn tool_choice_specific_name() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "messages": [{ "role": "user", "content": "hi" }],
            "tools": [
                { "type": "function", "function": {
                    "name": "lookup", "description": "", "parameters": { "type": "object" } } }
            ],
            "tool_choice": { "type": "function", "function": { "name": "lookup" } }
        });
        let t = translate_request(&body, &opts()).await.unwrap();
        let config = &t.request["toolConfig"]["functionCallingConfig"];
        assert_eq!(config["mode"], "ANY");
        assert_eq!(config["allowedFunctionNames"][0], "lookup");
    }

    #[tokio::test]
    async fn force_web_search_injects_tool() {
        let body = serde_json::json!({
            "model": "gemini-2.5-pro",
            "messages": [{ "role": "user", "content": "hi" }]
        });
        let t = translate_request(
            &body,
            &TranslateOptions {
                force_web_search: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let tools = t.request["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t.get("googleSearch").is_some()));
    }
}
