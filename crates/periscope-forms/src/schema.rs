//! Build form fields from a JSON schema (tool input schemas, prompt arguments).

use serde_json::Value;
use tracing::warn;

use crate::field::{ElementKind, FieldKind, FieldSpec, SelectOption};
use crate::session::FormSession;

/// Derive field declarations from an object schema.
///
/// Properties become fields in the order the schema map yields them. Names
/// listed under `required` are marked required. Unknown or missing types
/// fall back to a text field.
#[must_use]
pub fn fields_from_schema(schema: &Value) -> Vec<FieldSpec> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, property)| {
            let mut spec = FieldSpec::new(name.clone(), field_kind(name, property));
            spec.required = required.contains(&name.as_str());
            spec.description = property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            spec
        })
        .collect()
}

/// JSON schema `type` may be a string or a list like `["string", "null"]`.
fn schema_type(property: &Value) -> Option<&str> {
    match property.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

fn field_kind(name: &str, property: &Value) -> FieldKind {
    if let Some(options) = property.get("enum").and_then(Value::as_array) {
        return FieldKind::Select {
            options: options.iter().cloned().map(SelectOption::from_value).collect(),
        };
    }

    match schema_type(property) {
        Some("string") | None => FieldKind::Text,
        Some("integer") => FieldKind::Number { integer: true },
        Some("number") => FieldKind::Number { integer: false },
        Some("boolean") => FieldKind::Checkbox,
        Some("array") => FieldKind::Array {
            items: element_kind(property.get("items")),
        },
        Some(other) => {
            warn!(field = %name, schema_type = %other, "Unsupported schema type, using text input");
            FieldKind::Text
        },
    }
}

fn element_kind(items: Option<&Value>) -> ElementKind {
    match items.and_then(schema_type) {
        Some("integer") => ElementKind::Integer,
        Some("number") => ElementKind::Number,
        Some("boolean") => ElementKind::Boolean,
        _ => ElementKind::Text,
    }
}

impl FormSession {
    /// Build a session from an object schema.
    #[must_use]
    pub fn from_schema(target: impl Into<String>, schema: &Value) -> Self {
        Self::new(target, fields_from_schema(schema))
    }
}
