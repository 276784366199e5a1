//! The served model catalog.
//!
//! Thinking-suffix variants are listed as distinct entries so clients can
//! pick an effort level by model name alone.

const BASE_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.5-flash-lite"];
const LEVELS: &[&str] = &["minimal", "low", "medium", "high"];

pub fn model_ids() -> Vec<String> {
    let mut ids = Vec::with_capacity(BASE_MODELS.len() * (LEVELS.len() + 1));
    for base in BASE_MODELS {
        ids.push((*base).to_string());
        for level in LEVELS {
            ids.push(format!("{base}-{level}"));
        }
    }
    ids
}

/// OpenAI `GET /v1/models` shape.
pub fn openai_listing() -> serde_json::Value {
    let data: Vec<serde_json::Value> = model_ids()
        .into_iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "created": 0,
                "owned_by": "atelier",
            })
        })
        .collect();
    serde_json::json!({ "object": "list", "data": data })
}

/// Gemini `GET /v1beta/models` shape.
pub fn gemini_listing() -> serde_json::Value {
    let models: Vec<serde_json::Value> = model_ids()
        .into_iter()
        .map(|id| {
            serde_json::json!({
                "name": format!("models/{id}"),
                "displayName": id,
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
            })
        })
        .collect();
    serde_json::json!({ "models": models })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_includes_suffix_variants() {
        let ids = model_ids();
        assert!(ids.iter().any(|id| id == "gemini-2.5-pro"));
        assert!(ids.iter().any(|id| id == "gemini-2.5-pro-high"));
        assert!(ids.iter().any(|id| id == "gemini-2.5-flash-minimal"));
    }

    #[test]
    fn listings_have_expected_shapes() {
        let openai = openai_listing();
        assert_eq!(openai["object"], "list");
        assert!(openai["data"].as_array().unwrap().len() >= BASE_MODELS.len());

        let gemini = gemini_listing();
        assert!(
            gemini["models"][0]["name"]
                .as_str()
                .unwrap()
                .starts_with("models/")
        );
    }
}
