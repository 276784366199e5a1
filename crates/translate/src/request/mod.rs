//! Public dialect → internal dialect request translation.

pub mod claude;
pub mod gemini;
pub mod openai;

use {base64::Engine, serde_json::Value, tracing::warn};

use crate::internal::{
    Content, InternalRequest, Part, THOUGHT_SIGNATURE_PLACEHOLDER, ThinkingConfig,
    permissive_safety_settings,
};

/// Global toggles applied to every translated request.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions {
    /// Request thoughts when the caller did not specify anything.
    pub force_thinking: bool,
    pub force_web_search: bool,
    pub force_url_context: bool,
}

/// A translated request ready for dispatch over the control channel.
#[derive(Debug, Clone)]
pub struct TranslatedRequest {
    /// Model name with any thinking suffix stripped.
    pub model: String,
    pub stream: bool,
    /// Internal-dialect body.
    pub request: Value,
}

/// Thinking precedence: a model-name suffix always wins, then the request's
/// own signal, then the global force flag.
pub(crate) fn resolve_thinking(
    explicit: Option<ThinkingConfig>,
    suffix: Option<&str>,
    forced: bool,
) -> Option<ThinkingConfig> {
    if let Some(level) = suffix {
        return Some(ThinkingConfig {
            include_thoughts: true,
            thinking_level: Some(level.to_string()),
        });
    }
    if explicit.is_some() {
        return explicit;
    }
    forced.then(|| ThinkingConfig {
        include_thoughts: true,
        thinking_level: None,
    })
}

/// Keep the placeholder signature on the first `functionCall` part of each
/// model turn and strip it everywhere else.
pub(crate) fn apply_thought_signatures(request: &mut InternalRequest) {
    for content in &mut request.contents {
        if content.role != crate::internal::roles::MODEL {
            continue;
        }
        let mut seen = false;
        for part in &mut content.parts {
            if let Part::FunctionCall {
                thought_signature, ..
            } = part
            {
                *thought_signature = if seen {
                    None
                } else {
                    seen = true;
                    Some(THOUGHT_SIGNATURE_PLACEHOLDER.to_string())
                };
            }
        }
    }
}

/// Common translation tail: thinking, toggles, safety, role coalescing,
/// thought signatures.
pub(crate) fn finalize(
    mut request: InternalRequest,
    explicit_thinking: Option<ThinkingConfig>,
    suffix: Option<&str>,
    opts: &TranslateOptions,
) -> InternalRequest {
    if let Some(thinking) = resolve_thinking(explicit_thinking, suffix, opts.force_thinking) {
        request
            .generation_config
            .get_or_insert_with(Default::default)
            .thinking_config = Some(thinking);
    }
    if opts.force_web_search {
        request.ensure_tool("googleSearch");
    }
    if opts.force_url_context {
        request.ensure_tool("urlContext");
    }
    request.safety_settings = permissive_safety_settings();
    request.coalesce_roles();
    apply_thought_signatures(&mut request);
    request
}

/// Parse a `data:<mime>;base64,<payload>` URL.
pub(crate) fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    if mime.is_empty() {
        return None;
    }
    Some((mime.to_string(), payload.to_string()))
}

/// Turn an image reference into an inline-data part.
///
/// Remote URLs are fetched at translation time; a fetch failure substitutes
/// a textual placeholder so the request still goes through.
pub(crate) async fn image_part(url: &str) -> Part {
    if let Some((mime, data)) = parse_data_url(url) {
        return Part::inline_data(mime, data);
    }

    match fetch_image(url).await {
        Ok((mime, data)) => Part::inline_data(mime, data),
        Err(e) => {
            warn!(url, error = %e, "image fetch failed, substituting placeholder");
            Part::text(format!("[image unavailable: {url}]"))
        },
    }
}

async fn fetch_image(url: &str) -> Result<(String, String), String> {
    let response = reqwest::get(url).await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string());
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    Ok((
        mime,
        base64::engine::general_purpose::STANDARD.encode(&bytes),
    ))
}

/// Extract plain text from a content value that is either a string or an
/// array of text blocks.
pub(crate) fn collect_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| {
                block
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Fold accumulated system texts into a system-instruction block.
pub(crate) fn system_instruction(texts: Vec<String>) -> Option<Content> {
    let joined = texts
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if joined.is_empty() {
        None
    } else {
        Some(Content::user(vec![Part::text(joined)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::FunctionCall;

    #[test]
    fn data_url_parses() {
        let (mime, data) = parse_data_url("data:image/png;base64,AAAA").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, "AAAA");
        assert!(parse_data_url("https://example.com/x.png").is_none());
    }

    #[test]
    fn suffix_beats_explicit_thinking() {
        let explicit = Some(ThinkingConfig {
            include_thoughts: true,
            thinking_level: Some("low".into()),
        });
        let resolved = resolve_thinking(explicit, Some("high"), false).unwrap();
        assert_eq!(resolved.thinking_level.as_deref(), Some("high"));
    }

    #[test]
    fn forced_thinking_applies_only_as_fallback() {
        assert!(resolve_thinking(None, None, true).is_some());
        assert!(resolve_thinking(None, None, false).is_none());
    }

    #[test]
    fn signature_on_first_call_part_only() {
        let call = |name: &str| Part::FunctionCall {
            function_call: FunctionCall {
                name: name.into(),
                args: serde_json::json!({}),
            },
            thought_signature: None,
        };
        let mut request = InternalRequest {
            contents: vec![Content::model(vec![call("a"), Part::text("x"), call("b")])],
            ..Default::default()
        };
        apply_thought_signatures(&mut request);

        let parts = &request.contents[0].parts;
        match (&parts[0], &parts[2]) {
            (
                Part::FunctionCall {
                    thought_signature: first,
                    ..
                },
                Part::FunctionCall {
                    thought_signature: second,
                    ..
                },
            ) => {
                assert_eq!(first.as_deref(), Some(THOUGHT_SIGNATURE_PLACEHOLDER));
                assert!(second.is_none());
            },
            other => panic!("unexpected parts: {other:?}"),
        }
    }
}
