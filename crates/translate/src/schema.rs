//! JSON-schema sanitization for the upstream engine.
//!
//! The studio backend accepts a restricted schema dialect: no `$ref`-style
//! indirection, uppercase `type` values, and `nullable` instead of
//! null-typed variants.

use serde_json::Value;

/// Keys the upstream validator rejects outright.
const STRIP_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "definitions",
    "additionalProperties",
    "patternProperties",
    "strict",
];

/// Sanitize a JSON schema in place for use as a function-declaration
/// parameter schema or a response schema.
pub fn sanitize_schema(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };

    for key in STRIP_KEYS {
        obj.remove(*key);
    }

    // `type: [T, "null"]` → `type: T, nullable: true`;
    // `type: [A, B, ...]` → `anyOf` over the variants.
    if let Some(Value::Array(types)) = obj.get("type").cloned() {
        let (nulls, others): (Vec<_>, Vec<_>) = types
            .iter()
            .filter_map(Value::as_str)
            .partition(|t| *t == "null");
        match others.as_slice() {
            [single] => {
                obj.insert("type".into(), Value::String((*single).to_string()));
                if !nulls.is_empty() {
                    obj.insert("nullable".into(), Value::Bool(true));
                }
            },
            many => {
                obj.remove("type");
                let variants: Vec<Value> = many
                    .iter()
                    .map(|t| serde_json::json!({ "type": t }))
                    .collect();
                obj.insert("anyOf".into(), Value::Array(variants));
                if !nulls.is_empty() {
                    obj.insert("nullable".into(), Value::Bool(true));
                }
            },
        }
    }

    // Collapse `anyOf` with a single non-null variant; lift null variants
    // into `nullable: true`.
    if let Some(Value::Array(variants)) = obj.get("anyOf").cloned() {
        let (nulls, mut others): (Vec<Value>, Vec<Value>) = variants
            .into_iter()
            .partition(|v| v.get("type").and_then(Value::as_str) == Some("null"));
        let nullable = !nulls.is_empty();
        match others.len() {
            0 => {
                obj.remove("anyOf");
            },
            1 => {
                obj.remove("anyOf");
                let mut only = others.remove(0);
                sanitize_schema(&mut only);
                if let Some(inner) = only.as_object() {
                    for (k, v) in inner {
                        obj.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            },
            _ => {
                for variant in &mut others {
                    sanitize_schema(variant);
                }
                obj.insert("anyOf".into(), Value::Array(others));
            },
        }
        if nullable {
            obj.insert("nullable".into(), Value::Bool(true));
        }
    }

    if let Some(Value::String(t)) = obj.get("type") {
        let upper = t.to_ascii_uppercase();
        obj.insert("type".into(), Value::String(upper));
    }

    if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
        for (_, prop) in props.iter_mut() {
            sanitize_schema(prop);
        }
    }
    if let Some(items) = obj.get_mut("items") {
        sanitize_schema(items);
    }
    for key in ["allOf", "oneOf"] {
        if let Some(variants) = obj.get_mut(key).and_then(Value::as_array_mut) {
            for variant in variants {
                sanitize_schema(variant);
            }
        }
    }
}

/// Convert public function declarations to the internal tool entry.
///
/// Each declaration keeps `name`, `description`, and a sanitized
/// `parameters` schema.
pub fn function_declarations_tool(declarations: Vec<Value>) -> Value {
    let cleaned: Vec<Value> = declarations
        .into_iter()
        .map(|mut decl| {
            if let Some(params) = decl.get_mut("parameters") {
                sanitize_schema(params);
            }
            decl
        })
        .collect();
    serde_json::json!({ "functionDeclarations": cleaned })
}
