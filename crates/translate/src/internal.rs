//! The internal Gemini-shaped dialect.
//!
//! Typed structs enforce the shapes the in-page client forwards verbatim to
//! the studio backend; free-form pieces (tool schemas, response schemas)
//! stay as `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// Fixed opaque literal placed on the first `functionCall` part of a model
/// turn. The upstream engine validates that a signature is present but not
/// what it says.
pub const THOUGHT_SIGNATURE_PLACEHOLDER: &str = "context_engineering_is_the_way_to_go";

pub mod roles {
    pub const USER: &str = "user";
    pub const MODEL: &str = "model";
}

/// One message part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
        #[serde(rename = "thoughtSignature", skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: None,
        }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InlineData {
            inline_data: Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: roles::USER.into(),
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: roles::MODEL.into(),
            parts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub include_thoughts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

impl GenerationConfig {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// All four harm categories, fully open. The proxy never filters; upstream
/// policy enforcement happens in the studio itself.
pub fn permissive_safety_settings() -> Vec<SafetySetting> {
    HARM_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: (*category).to_string(),
            threshold: "BLOCK_NONE".to_string(),
        })
        .collect()
}

/// The complete internal request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub safety_settings: Vec<SafetySetting>,
}

impl InternalRequest {
    /// Ensure a tool entry with `key` exists (e.g. `googleSearch`,
    /// `urlContext`). Used by the global force toggles.
    pub fn ensure_tool(&mut self, key: &str) {
        let tools = self.tools.get_or_insert_with(Vec::new);
        if tools.iter().any(|t| t.get(key).is_some()) {
            return;
        }
        tools.push(serde_json::json!({ key: {} }));
    }

    /// Merge consecutive same-role turns so the contents alternate strictly.
    pub fn coalesce_roles(&mut self) {
        let mut merged: Vec<Content> = Vec::with_capacity(self.contents.len());
        for content in self.contents.drain(..) {
            match merged.last_mut() {
                Some(last) if last.role == content.role => {
                    last.parts.extend(content.parts);
                },
                _ => merged.push(content),
            }
        }
        self.contents = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_serialize_with_camel_case_keys() {
        let part = Part::FunctionCall {
            function_call: FunctionCall {
                name: "get_weather".into(),
                args: serde_json::json!({"city": "Paris"}),
            },
            thought_signature: Some(THOUGHT_SIGNATURE_PLACEHOLDER.into()),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert!(value.get("functionCall").is_some());
        assert_eq!(
            value["thoughtSignature"],
            serde_json::json!(THOUGHT_SIGNATURE_PLACEHOLDER)
        );
    }

    #[test]
    fn ensure_tool_is_idempotent() {
        let mut request = InternalRequest::default();
        request.ensure_tool("googleSearch");
        request.ensure_tool("googleSearch");
        request.ensure_tool("urlContext");
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn coalesce_merges_consecutive_roles() {
        let mut request = InternalRequest {
            contents: vec![
                Content::user(vec![Part::text("a")]),
                Content::user(vec![Part::text("b")]),
                Content::model(vec![Part::text("c")]),
            ],
            ..Default::default()
        };
        request.coalesce_roles();
        assert_eq!(request.contents.len(), 2);
        assert_eq!(request.contents[0].parts.len(), 2);
    }

    #[test]
    fn safety_settings_cover_all_categories() {
        let settings = permissive_safety_settings();
        assert_eq!(settings.len(), 4);
        assert!(settings.iter().all(|s| s.threshold == "BLOCK_NONE"));
    }
}
