//! Gemini generate-content → internal dialect.
//!
//! The public body is already Gemini-shaped, so translation is a massage
//! pass: schema sanitization, safety override, thinking resolution, and the
//! global tool toggles.

use serde_json::Value;

use crate::{
    error::{Error, Result},
    internal::permissive_safety_settings,
    model::split_model_suffix,
    request::{TranslateOptions, TranslatedRequest},
    schema,
};

/// `model` comes from the URL path; `stream` from which endpoint was hit.
pub fn translate_request(
    model_raw: &str,
    body: &Value,
    stream: bool,
    opts: &TranslateOptions,
) -> Result<TranslatedRequest> {
    if !body.is_object() {
        return Err(Error::InvalidInput("request body must be an object".into()));
    }
    let (model, suffix) = split_model_suffix(model_raw);
    let mut request = body.clone();

    if request.get("contents").and_then(Value::as_array).is_none() {
        return Err(Error::InvalidInput("`contents` must be an array".into()));
    }

    // Sanitize function-declaration schemas in place.
    if let Some(tools) = request.get_mut("tools").and_then(Value::as_array_mut) {
        for tool in tools {
            if let Some(declarations) = tool
                .get_mut("functionDeclarations")
                .and_then(Value::as_array_mut)
            {
                for declaration in declarations {
                    if let Some(parameters) = declaration.get_mut("parameters") {
                        schema::sanitize_schema(parameters);
                    }
                }
            }
        }
    }

    let config = request
        .as_object_mut()
        .and_then(|obj| {
            obj.entry("generationConfig")
                .or_insert_with(|| serde_json::json!({}))
                .as_object_mut()
        })
        .ok_or_else(|| Error::InvalidInput("`generationConfig` must be an object".into()))?;

    if let Some(response_schema) = config.get_mut("responseSchema") {
        schema::sanitize_schema(response_schema);
    }

    // Thinking: a model suffix always wins; otherwise the request's own
    // thinkingConfig stands; otherwise the force flag applies.
    if let Some(level) = suffix {
        config.insert(
            "thinkingConfig".into(),
            serde_json::json!({ "includeThoughts": true, "thinkingLevel": level }),
        );
    } else if !config.contains_key("thinkingConfig") && opts.force_thinking {
        config.insert(
            "thinkingConfig".into(),
            serde_json::json!({ "includeThoughts": true }),
        );
    }
    if config.is_empty() {
        if let Some(obj) = request.as_object_mut() {
            obj.remove("generationConfig");
        }
    }

    if opts.force_web_search {
        ensure_tool_entry(&mut request, "googleSearch");
    }
    if opts.force_url_context {
        ensure_tool_entry(&mut request, "urlContext");
    }

    request["safetySettings"] = serde_json::to_value(permissive_safety_settings())
        .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(TranslatedRequest {
        model,
        stream,
        request,
    })
}

fn ensure_tool_entry(request: &mut Value, key: &str) {
    let Some(obj) = request.as_object_mut() else {
        return;
    };
    let tools = obj
        .entry("tools")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(list) = tools.as_array_mut() else {
        return;
    };
    if list.iter().any(|t| t.get(key).is_some()) {
        return;
    }
    list.push(serde_json::json!({ key: {} }));
}
