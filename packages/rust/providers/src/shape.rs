//! JSON schema derivation for extraction targets.
//!
//! Each section type derives `JsonSchema`; an [`ExtractionShape`] carries
//! both renderings the backends need. OpenAI takes a draft-07 schema, Gemini
//! takes an OpenAPI 3 subset that rejects several keywords, so the Gemini
//! rendering is sanitized after generation.

use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde_json::{Map, Value};

/// Keywords Gemini's `responseSchema` does not accept.
const GEMINI_UNSUPPORTED: &[&str] = &[
    "$schema",
    "$ref",
    "title",
    "default",
    "format",
    "definitions",
    "additionalProperties",
    "examples",
];

/// The target shape of one extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionShape {
    /// Schema name, `[a-z0-9_]` only (used as the OpenAI schema name).
    pub name: String,
    /// Draft-07 schema with all subschemas inlined.
    pub json_schema: Value,
    /// OpenAPI 3 schema, inlined and sanitized for Gemini.
    pub openapi_schema: Value,
}

impl ExtractionShape {
    /// Derive both schema renderings for `T`.
    pub fn of<T: JsonSchema>(name: &str) -> Self {
        let json_schema = SchemaSettings::draft07()
            .with(|s| s.inline_subschemas = true)
            .into_generator()
            .into_root_schema_for::<T>();
        let openapi_schema = SchemaSettings::openapi3()
            .with(|s| s.inline_subschemas = true)
            .into_generator()
            .into_root_schema_for::<T>();

        let mut openapi_schema = serde_json::to_value(openapi_schema).unwrap_or(Value::Null);
        sanitize_for_gemini(&mut openapi_schema);

        Self {
            name: name.to_string(),
            json_schema: serde_json::to_value(json_schema).unwrap_or(Value::Null),
            openapi_schema,
        }
    }
}

/// Strip keywords Gemini rejects, recursing only through schema positions
/// so that property names such as `title` survive.
pub(crate) fn sanitize_for_gemini(schema: &mut Value) {
    let Value::Object(map) = schema else {
        return;
    };

    flatten_single_all_of(map);
    for key in GEMINI_UNSUPPORTED {
        map.remove(*key);
    }

    if let Some(Value::Object(properties)) = map.get_mut("properties") {
        for property in properties.values_mut() {
            sanitize_for_gemini(property);
        }
    }
    if let Some(items) = map.get_mut("items") {
        sanitize_for_gemini(items);
    }
    for key in ["anyOf", "allOf", "oneOf"] {
        if let Some(Value::Array(variants)) = map.get_mut(key) {
            for variant in variants {
                sanitize_for_gemini(variant);
            }
        }
    }
}

/// `{"allOf": [X], "description": d}` becomes `X` plus `description`.
fn flatten_single_all_of(map: &mut Map<String, Value>) {
    let single = matches!(map.get("allOf"), Some(Value::Array(v)) if v.len() == 1);
    if !single {
        return;
    }
    if let Some(Value::Array(mut variants)) = map.remove("allOf") {
        if let Some(Value::Object(inner)) = variants.pop() {
            for (key, value) in inner {
                map.entry(key).or_insert(value);
            }
        }
    }
}
