//! Form fields and the per-field validity rule.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input kind of a form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text.
    Text,
    /// Numeric input, kept as text while editing.
    Number {
        /// Only whole numbers are accepted.
        #[serde(default)]
        integer: bool,
    },
    /// One value out of a fixed option list.
    Select {
        /// Allowed options.
        options: Vec<SelectOption>,
    },
    /// Boolean toggle.
    Checkbox,
    /// Variable-length list of elements, edited as text.
    Array {
        /// How elements convert when the form is submitted.
        #[serde(default)]
        items: ElementKind,
    },
}

/// Element type of an array field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Elements are sent as strings.
    #[default]
    Text,
    /// Elements are sent as whole numbers.
    Integer,
    /// Elements are sent as numbers.
    Number,
    /// Elements are sent as booleans.
    Boolean,
}

impl ElementKind {
    /// Convert one element, keeping the text when it does not parse.
    #[must_use]
    pub fn to_json(self, text: &str) -> Value {
        let parsed = match self {
            Self::Text => None,
            Self::Integer => parse_integer(text),
            Self::Number => parse_number(text),
            Self::Boolean => text.trim().parse::<bool>().ok().map(Value::Bool),
        };
        parsed.unwrap_or_else(|| Value::String(text.to_string()))
    }

    fn mismatch(self, text: &str) -> Option<&'static str> {
        if is_blank(text) {
            return None;
        }
        match self {
            Self::Text => None,
            Self::Integer => parse_integer(text).is_none().then_some("expected a whole number"),
            Self::Number => parse_number(text).is_none().then_some("expected a number"),
            Self::Boolean => text
                .trim()
                .parse::<bool>()
                .is_err()
                .then_some("expected true or false"),
        }
    }
}

/// One entry of a select field: the label shown and the value submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Text the user picks.
    pub label: String,
    /// Value sent when this option is picked.
    pub value: Value,
}

impl SelectOption {
    /// Option whose label and value are the same string.
    #[must_use]
    pub fn text(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            value: Value::String(label.clone()),
            label,
        }
    }

    /// Option for an arbitrary schema value. Strings label themselves,
    /// anything else is labelled with its JSON text.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let label = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self { label, value }
    }
}

pub(crate) fn parse_integer(text: &str) -> Option<Value> {
    text.trim().parse::<i64>().ok().map(Value::from)
}

pub(crate) fn parse_number(text: &str) -> Option<Value> {
    text.trim()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

impl FieldKind {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number { .. } => "number",
            Self::Select { .. } => "select",
            Self::Checkbox => "checkbox",
            Self::Array { .. } => "array",
        }
    }

    /// The value a freshly mounted field of this kind starts with.
    #[must_use]
    pub fn empty_value(&self) -> FieldValue {
        match self {
            Self::Text | Self::Number { .. } | Self::Select { .. } => {
                FieldValue::Text(String::new())
            },
            Self::Checkbox => FieldValue::Bool(false),
            Self::Array { .. } => FieldValue::List(Vec::new()),
        }
    }

    /// Whether `value` has the shape this kind stores.
    #[must_use]
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (
                Self::Text | Self::Number { .. } | Self::Select { .. },
                FieldValue::Text(_)
            ) | (Self::Checkbox, FieldValue::Bool(_))
                | (Self::Array { .. }, FieldValue::List(_))
        )
    }
}

/// Current value of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Text, number and select fields.
    Text(String),
    /// Checkbox fields.
    Bool(bool),
    /// Array fields.
    List(Vec<String>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Declaration of a field before it is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name (unique within a form).
    pub name: String,
    /// Input kind.
    pub kind: FieldKind,
    /// Whether a value is mandatory.
    #[serde(default)]
    pub required: bool,
    /// Help text shown next to the input.
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldSpec {
    /// Create an optional field.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: None,
        }
    }

    /// Create an optional text field.
    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    /// Create an optional array field.
    #[must_use]
    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Array {
            items: ElementKind::Text,
        })
    }

    /// Create an optional select field over string options.
    #[must_use]
    pub fn select<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, FieldKind::Select {
            options: options.into_iter().map(SelectOption::text).collect(),
        })
    }

    /// Mark the field required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach help text.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A mounted field with its live value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormField {
    /// Field name.
    pub name: String,
    /// Input kind.
    pub kind: FieldKind,
    /// Whether a value is mandatory.
    pub required: bool,
    /// Help text.
    pub description: Option<String>,
    /// Current value.
    pub value: FieldValue,
}

impl FormField {
    /// Mount a field from its declaration with an empty value.
    #[must_use]
    pub fn from_spec(spec: FieldSpec) -> Self {
        let value = spec.kind.empty_value();
        Self {
            name: spec.name,
            kind: spec.kind,
            required: spec.required,
            description: spec.description,
            value,
        }
    }

    /// Whether the field currently holds an acceptable value.
    ///
    /// A field is valid when it is optional, or required and non-empty
    /// (whitespace counts as empty). Array elements are held to the same
    /// rule individually, so one blank element invalidates the whole array
    /// even when the array itself is optional.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match &self.value {
            FieldValue::List(items) => {
                (!self.required || !items.is_empty()) && items.iter().all(|i| !is_blank(i))
            },
            FieldValue::Bool(_) => true,
            FieldValue::Text(text) => !self.required || !is_blank(text),
        }
    }

    /// Advisory note when a non-empty value will not convert the way the
    /// field's kind expects. Hints never affect validity.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match (&self.kind, &self.value) {
            (FieldKind::Number { integer }, FieldValue::Text(text)) => {
                let items = if *integer {
                    ElementKind::Integer
                } else {
                    ElementKind::Number
                };
                items.mismatch(text).map(str::to_string)
            },
            (FieldKind::Select { options }, FieldValue::Text(text)) => {
                if is_blank(text) || options.iter().any(|o| o.label == *text) {
                    None
                } else {
                    Some(format!("'{text}' is not one of the options"))
                }
            },
            (FieldKind::Array { items }, FieldValue::List(values)) => values
                .iter()
                .enumerate()
                .find_map(|(i, v)| items.mismatch(v).map(|m| format!("element {i}: {m}"))),
            _ => None,
        }
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
