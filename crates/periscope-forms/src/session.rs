//! Form sessions: aggregate validity and transition events.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{FormError, FormResult};
use crate::field::{FieldKind, FieldSpec, FieldValue, FormField, parse_integer, parse_number};

/// Emitted when a session's aggregate validity changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityChanged {
    /// Action the session gates.
    pub target: String,
    /// New aggregate validity.
    pub valid: bool,
}

#[derive(Debug)]
struct FormState {
    fields: Vec<FormField>,
    mounted: HashSet<String>,
    initial_done: bool,
    last_validity: Option<bool>,
}

impl FormState {
    fn aggregate(&self) -> bool {
        self.fields.iter().all(FormField::is_valid)
    }

    fn all_mounted(&self) -> bool {
        self.fields.iter().all(|f| self.mounted.contains(&f.name))
    }

    fn field_mut(&mut self, name: &str) -> FormResult<&mut FormField> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| FormError::UnknownField(name.to_string()))
    }

    fn list_mut(&mut self, name: &str) -> FormResult<&mut Vec<String>> {
        let field = self.field_mut(name)?;
        match &mut field.value {
            FieldValue::List(items) => Ok(items),
            _ => Err(FormError::NotAnArray(name.to_string())),
        }
    }
}

/// The set of fields feeding one action, with derived validity.
///
/// Fields are declared up front and mounted individually as their inputs
/// come up. Once every declared field is mounted, a single initial pass
/// computes and emits the aggregate validity. After that, every edit
/// recomputes it and a [`ValidityChanged`] is emitted only when the value
/// actually flips. Edits made before the initial pass update values but emit
/// nothing.
#[derive(Debug)]
pub struct FormSession {
    target: String,
    state: Mutex<FormState>,
    events: Option<mpsc::UnboundedSender<ValidityChanged>>,
}

impl FormSession {
    /// Create a session for `target` with the given declared fields.
    #[must_use]
    pub fn new(target: impl Into<String>, specs: Vec<FieldSpec>) -> Self {
        Self {
            target: target.into(),
            state: Mutex::new(FormState {
                fields: specs.into_iter().map(FormField::from_spec).collect(),
                mounted: HashSet::new(),
                initial_done: false,
                last_validity: None,
            }),
            events: None,
        }
    }

    /// One required text field per URI template parameter, in order.
    #[must_use]
    pub fn for_template_parameters<I, S>(target: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let specs = parameters
            .into_iter()
            .map(|p| FieldSpec::text(p).required())
            .collect();
        Self::new(target, specs)
    }

    /// Deliver validity transitions to `tx`.
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ValidityChanged>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Identifier of the action this session gates.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FormState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, valid: bool) {
        if let Some(tx) = &self.events {
            // A closed receiver means nobody is watching this form any more.
            let _ = tx.send(ValidityChanged {
                target: self.target.clone(),
                valid,
            });
        }
    }

    /// Run the initial pass if the field set just became complete.
    fn maybe_initial_pass(&self, state: &mut FormState) {
        if state.initial_done || !state.all_mounted() {
            return;
        }
        state.initial_done = true;
        let valid = state.aggregate();
        state.last_validity = Some(valid);
        debug!(
            target_action = %self.target,
            fields = state.fields.len(),
            valid,
            "Initial form validation"
        );
        self.emit(valid);
    }

    fn after_edit(&self, state: &mut FormState) {
        if !state.initial_done {
            return;
        }
        let valid = state.aggregate();
        if state.last_validity != Some(valid) {
            state.last_validity = Some(valid);
            trace!(target_action = %self.target, valid, "Form validity changed");
            self.emit(valid);
        }
    }

    /// Mark one declared field as mounted.
    ///
    /// # Errors
    ///
    /// Returns [`FormError::UnknownField`] if no such field was declared.
    pub fn mount(&self, name: &str) -> FormResult<()> {
        let mut state = self.lock();
        if !state.fields.iter().any(|f| f.name == name) {
            return Err(FormError::UnknownField(name.to_string()));
        }
        state.mounted.insert(name.to_string());
        self.maybe_initial_pass(&mut state);
        Ok(())
    }

    /// Mark every declared field as mounted.
    pub fn mount_all(&self) {
        let mut state = self.lock();
        let names: Vec<String> = state.fields.iter().map(|f| f.name.clone()).collect();
        state.mounted.extend(names);
        self.maybe_initial_pass(&mut state);
    }

    /// Whether the initial validation pass has run.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lock().initial_done
    }

    /// Replace a field's value.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is unknown or the value does not fit
    /// its kind.
    pub fn set_value(&self, name: &str, value: impl Into<FieldValue>) -> FormResult<()> {
        let value = value.into();
        let mut state = self.lock();
        let field = state.field_mut(name)?;
        if !field.kind.accepts(&value) {
            return Err(FormError::KindMismatch {
                field: name.to_string(),
                expected: field.kind.label(),
            });
        }
        field.value = value;
        self.after_edit(&mut state);
        Ok(())
    }

    /// Append an element to an array field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is unknown or not an array.
    pub fn push_element(&self, name: &str, value: impl Into<String>) -> FormResult<()> {
        let mut state = self.lock();
        state.list_mut(name)?.push(value.into());
        self.after_edit(&mut state);
        Ok(())
    }

    /// Replace one element of an array field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is unknown, not an array, or `index` is
    /// out of range.
    pub fn set_element(&self, name: &str, index: usize, value: impl Into<String>) -> FormResult<()> {
        let mut state = self.lock();
        let items = state.list_mut(name)?;
        let len = items.len();
        let slot = items.get_mut(index).ok_or_else(|| FormError::IndexOutOfRange {
            field: name.to_string(),
            index,
            len,
        })?;
        *slot = value.into();
        self.after_edit(&mut state);
        Ok(())
    }

    /// Remove one element of an array field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is unknown, not an array, or `index` is
    /// out of range.
    pub fn remove_element(&self, name: &str, index: usize) -> FormResult<String> {
        let mut state = self.lock();
        let items = state.list_mut(name)?;
        if index >= items.len() {
            return Err(FormError::IndexOutOfRange {
                field: name.to_string(),
                index,
                len: items.len(),
            });
        }
        let removed = items.remove(index);
        self.after_edit(&mut state);
        Ok(removed)
    }

    /// Aggregate validity over all fields.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lock().aggregate()
    }

    /// Whether the gated action may run: mounted, validated and valid.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        let state = self.lock();
        state.initial_done && state.aggregate()
    }

    /// Snapshot of all fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> Vec<FormField> {
        self.lock().fields.clone()
    }

    /// Snapshot of one field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<FormField> {
        self.lock().fields.iter().find(|f| f.name == name).cloned()
    }

    /// Field values as a JSON object suitable for tool or prompt arguments.
    ///
    /// Numbers are parsed, blank optional values and empty optional arrays
    /// are left out. Checkboxes are always present.
    #[must_use]
    pub fn values(&self) -> Map<String, Value> {
        let state = self.lock();
        let mut out = Map::new();
        for field in &state.fields {
            if let Some(value) = json_value(field) {
                out.insert(field.name.clone(), value);
            }
        }
        out
    }
}

fn json_value(field: &FormField) -> Option<Value> {
    match (&field.kind, &field.value) {
        (_, FieldValue::Bool(b)) => Some(Value::Bool(*b)),
        (_, FieldValue::List(items)) if items.is_empty() && !field.required => None,
        (FieldKind::Array { items: kind }, FieldValue::List(items)) => Some(Value::Array(
            items.iter().map(|i| kind.to_json(i)).collect(),
        )),
        (_, FieldValue::List(items)) => Some(Value::Array(
            items.iter().map(|i| Value::String(i.clone())).collect(),
        )),
        (_, FieldValue::Text(text)) if text.trim().is_empty() && !field.required => None,
        (FieldKind::Number { integer }, FieldValue::Text(text)) => {
            let number = if *integer {
                parse_integer(text)
            } else {
                parse_number(text)
            };
            Some(number.unwrap_or_else(|| Value::String(text.clone())))
        },
        (FieldKind::Select { options }, FieldValue::Text(text)) => Some(
            options
                .iter()
                .find(|o| o.label == *text)
                .map_or_else(|| Value::String(text.clone()), |o| o.value.clone()),
        ),
        (_, FieldValue::Text(text)) => Some(Value::String(text.clone())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn tags_form() -> (FormSession, mpsc::UnboundedReceiver<ValidityChanged>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = FormSession::new(
            "tool:tag_item",
            vec![
                FieldSpec::text("name").required(),
                FieldSpec::array("tags").required(),
            ],
        )
        .with_events(tx);
        (session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ValidityChanged>) -> Vec<bool> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.valid);
        }
        out
    }

    #[test]
    fn test_no_events_before_all_fields_mount() {
        let (session, mut rx) = tags_form();
        session.mount("name").unwrap();
        session.set_value("name", "widget").unwrap();

        assert!(drain(&mut rx).is_empty());
        assert!(!session.is_ready());
        assert!(!session.can_execute());

        session.mount("tags").unwrap();
        assert_eq!(drain(&mut rx), vec![false]);
        assert!(session.is_ready());
    }

    #[test]
    fn test_initial_pass_runs_once() {
        let (session, mut rx) = tags_form();
        session.mount_all();
        session.mount_all();
        session.mount("name").unwrap();

        assert_eq!(drain(&mut rx), vec![false]);
    }

    #[test]
    fn test_tags_field_element_rules() {
        let (session, mut rx) = tags_form();
        session.mount_all();
        session.set_value("name", "widget").unwrap();
        assert!(!session.is_valid());

        session.push_element("tags", "").unwrap();
        assert!(!session.is_valid());

        session.set_element("tags", 0, "blue").unwrap();
        assert!(session.is_valid());
        assert!(session.can_execute());

        assert_eq!(session.remove_element("tags", 0).unwrap(), "blue");
        assert!(!session.is_valid());

        assert_eq!(drain(&mut rx), vec![false, true, false]);
    }

    #[test]
    fn test_filling_last_required_field_emits_once() {
        let (session, mut rx) = tags_form();
        session.mount_all();
        session.push_element("tags", "red").unwrap();
        assert_eq!(drain(&mut rx), vec![false]);

        session.set_value("name", "w").unwrap();
        assert_eq!(drain(&mut rx), vec![true]);

        session.set_value("name", "widget").unwrap();
        session.push_element("tags", "green").unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_edit_errors() {
        let (session, _rx) = tags_form();
        assert_eq!(
            session.set_value("missing", "x"),
            Err(FormError::UnknownField("missing".to_string()))
        );
        assert!(matches!(
            session.set_value("name", true),
            Err(FormError::KindMismatch { .. })
        ));
        assert_eq!(
            session.push_element("name", "x"),
            Err(FormError::NotAnArray("name".to_string()))
        );
        assert!(matches!(
            session.remove_element("tags", 3),
            Err(FormError::IndexOutOfRange { index: 3, len: 0, .. })
        ));
        assert!(session.mount("nope").is_err());
    }

    #[test]
    fn test_values_omit_blank_optionals() {
        let session = FormSession::new(
            "tool:search",
            vec![
                FieldSpec::text("query").required(),
                FieldSpec::new("limit", FieldKind::Number { integer: true }),
                FieldSpec::new("ratio", FieldKind::Number { integer: false }),
                FieldSpec::new("exact", FieldKind::Checkbox),
                FieldSpec::array("filters"),
                FieldSpec::text("note"),
            ],
        );
        session.set_value("query", "rust").unwrap();
        session.set_value("ratio", "0.5").unwrap();

        let values = session.values();
        assert_eq!(values.get("query"), Some(&Value::String("rust".into())));
        assert_eq!(values.get("ratio"), Some(&serde_json::json!(0.5)));
        assert_eq!(values.get("exact"), Some(&Value::Bool(false)));
        assert!(!values.contains_key("limit"));
        assert!(!values.contains_key("filters"));
        assert!(!values.contains_key("note"));

        session.set_value("limit", " 10 ").unwrap();
        assert_eq!(session.values().get("limit"), Some(&serde_json::json!(10)));
    }

    #[test]
    fn test_unparsable_optional_number_does_not_block() {
        let session = FormSession::new(
            "tool:search",
            vec![
                FieldSpec::text("query").required(),
                FieldSpec::new("limit", FieldKind::Number { integer: true }),
            ],
        );
        session.mount_all();
        session.set_value("query", "rust").unwrap();
        session.set_value("limit", "abc").unwrap();

        assert!(session.can_execute());
        assert!(session.field("limit").unwrap().hint().is_some());
        assert_eq!(session.values().get("limit"), Some(&Value::String("abc".into())));
    }

    #[test]
    fn test_template_parameter_form() {
        let session = FormSession::for_template_parameters("template", ["owner", "repo"]);
        session.mount_all();
        assert!(!session.can_execute());

        session.set_value("owner", "rust-lang").unwrap();
        session.set_value("repo", "cargo").unwrap();
        assert!(session.can_execute());
        let names: Vec<String> = session.fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["owner", "repo"]);
    }

    #[test]
    fn test_empty_form_is_valid_after_mount() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = FormSession::new("prompt:greet", Vec::new()).with_events(tx);
        assert!(!session.can_execute());
        session.mount_all();
        assert!(session.can_execute());
        assert_eq!(drain(&mut rx), vec![true]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mounts_validate_exactly_once() {
        let names: Vec<String> = (0..16).map(|i| format!("field_{i}")).collect();
        let specs = names.iter().map(|n| FieldSpec::text(n.as_str())).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(FormSession::new("tool:wide", specs).with_events(tx));

        let handles: Vec<_> = names
            .into_iter()
            .map(|name| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.mount(&name) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let first = rx.recv().await.unwrap();
        assert!(first.valid);
        assert_eq!(first.target, "tool:wide");
        assert!(rx.try_recv().is_err());
    }
}
