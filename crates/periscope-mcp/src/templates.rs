//! Resource URI templates (`file:///{path}`, `repo://{owner}/{name*}`).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{McpError, McpResult};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}").expect("invalid regex"));

/// Whether `uri` contains at least one `{param}` placeholder.
#[must_use]
pub fn is_template(uri: &str) -> bool {
    PLACEHOLDER.is_match(uri)
}

fn param_name(placeholder: &str) -> &str {
    placeholder.strip_suffix('*').unwrap_or(placeholder)
}

/// Parameter names in order of appearance, duplicates removed. A trailing
/// `*` (wildcard) is not part of the name.
#[must_use]
pub fn template_parameters(uri_template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in PLACEHOLDER.captures_iter(uri_template) {
        let name = param_name(&capture[1]);
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Substitute every placeholder with its value.
///
/// String values are inserted as-is; other JSON values use their JSON text.
///
/// # Errors
///
/// Returns [`McpError::InvalidTarget`] if a parameter has no value or an
/// empty one.
pub fn expand_template(uri_template: &str, values: &Map<String, Value>) -> McpResult<String> {
    let mut missing = Vec::new();
    let expanded = PLACEHOLDER.replace_all(uri_template, |caps: &regex::Captures<'_>| {
        let name = param_name(&caps[1]);
        match values.get(name) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Null | Value::String(_)) | None => {
                missing.push(name.to_string());
                String::new()
            },
            Some(other) => other.to_string(),
        }
    });

    if missing.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(McpError::InvalidTarget(format!(
            "missing value for {} in {uri_template}",
            missing.join(", ")
        )))
    }
}
