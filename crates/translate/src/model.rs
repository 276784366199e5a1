//! Model-name handling: thinking suffixes and cleanup.

const LEVELS: &[&str] = &["minimal", "low", "medium", "high"];

/// Split a thinking level off a model name.
///
/// Accepts both `-low|-medium|-high|-minimal` suffixes and a parenthesized
/// form: `gemini-2.5-pro-high` and `gemini-2.5-pro(high)` both resolve to
/// `("gemini-2.5-pro", Some("high"))`. A suffix always wins over any other
/// thinking signal in the request.
pub fn split_model_suffix(model: &str) -> (String, Option<&'static str>) {
    let model = model.trim();

    for level in LEVELS {
        let paren = format!("({level})");
        if let Some(base) = model.strip_suffix(&paren) {
            return (base.trim().to_string(), Some(level));
        }
        let dashed = format!("-{level}");
        if let Some(base) = model.strip_suffix(&dashed) {
            return (base.to_string(), Some(level));
        }
    }

    (model.to_string(), None)
}
