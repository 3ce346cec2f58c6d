//! Canonical notification values produced from raw server pushes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Method the transports synthesize when a server goes away on its own.
pub const DISCONNECTED_METHOD: &str = "notifications/transport/disconnected";

/// Routing class of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NotificationKind {
    /// `notifications/resources/list_changed`
    ResourcesListChanged,
    /// `notifications/tools/list_changed`
    ToolsListChanged,
    /// `notifications/prompts/list_changed`
    PromptsListChanged,
    /// `notifications/message` (server log output).
    Message,
    /// Anything else, including malformed pushes.
    Other,
}

impl NotificationKind {
    /// Classify a wire method name.
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method {
            "notifications/resources/list_changed" => Self::ResourcesListChanged,
            "notifications/tools/list_changed" => Self::ToolsListChanged,
            "notifications/prompts/list_changed" => Self::PromptsListChanged,
            "notifications/message" => Self::Message,
            _ => Self::Other,
        }
    }

    /// The list this notification invalidates, if any.
    #[must_use]
    pub fn list_kind(self) -> Option<ListKind> {
        match self {
            Self::ResourcesListChanged => Some(ListKind::Resources),
            Self::ToolsListChanged => Some(ListKind::Tools),
            Self::PromptsListChanged => Some(ListKind::Prompts),
            Self::Message | Self::Other => None,
        }
    }
}

/// A discoverable list that can be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ListKind {
    /// Static resources and resource templates.
    Resources,
    /// Tools.
    Tools,
    /// Prompts.
    Prompts,
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Resources => "resources",
            Self::Tools => "tools",
            Self::Prompts => "prompts",
        })
    }
}

/// A server push in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Routing class.
    pub kind: NotificationKind,
    /// Wire method, when the push carried one.
    pub method: Option<String>,
    /// Server the push came from.
    pub server_id: String,
    /// Payload exactly as received.
    pub raw: String,
    /// Parsed `params`, when present.
    pub params: Option<Value>,
    /// When the bridge saw it.
    pub received_at: DateTime<Utc>,
    /// Server-assigned event id (SSE `id:` field).
    pub event_id: Option<String>,
    /// Why the payload could not be understood.
    pub parse_error: Option<String>,
}

impl Notification {
    /// Build from a raw text payload. Never fails: anything that is not a
    /// JSON object with a string `method` becomes [`NotificationKind::Other`]
    /// carrying the reason.
    #[must_use]
    pub fn from_text(server_id: &str, raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Self::from_parsed(server_id, raw, &value),
            Err(e) => Self::unparsed(server_id, raw, format!("invalid JSON: {e}")),
        }
    }

    /// Build from an already-parsed JSON message.
    #[must_use]
    pub fn from_value(server_id: &str, value: &Value) -> Self {
        Self::from_parsed(server_id, value.to_string(), value)
    }

    fn from_parsed(server_id: &str, raw: String, value: &Value) -> Self {
        let Some(method) = value.get("method").and_then(Value::as_str) else {
            return Self::unparsed(server_id, raw, "missing method".to_string());
        };
        Self {
            kind: NotificationKind::from_method(method),
            method: Some(method.to_string()),
            server_id: server_id.to_string(),
            params: value.get("params").cloned(),
            raw,
            received_at: Utc::now(),
            event_id: None,
            parse_error: None,
        }
    }

    fn unparsed(server_id: &str, raw: String, reason: String) -> Self {
        Self {
            kind: NotificationKind::Other,
            method: None,
            server_id: server_id.to_string(),
            raw,
            params: None,
            received_at: Utc::now(),
            event_id: None,
            parse_error: Some(reason),
        }
    }

    /// Notification announcing that the transport closed without being asked to.
    #[must_use]
    pub fn disconnected(server_id: &str, reason: &str) -> Self {
        let value = serde_json::json!({
            "jsonrpc": "2.0",
            "method": DISCONNECTED_METHOD,
            "params": { "reason": reason },
        });
        Self::from_value(server_id, &value)
    }

    /// Attach the server-assigned event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: Option<String>) -> Self {
        self.event_id = event_id;
        self
    }

    /// The list this notification invalidates, if any.
    #[must_use]
    pub fn list_kind(&self) -> Option<ListKind> {
        self.kind.list_kind()
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.method, &self.parse_error) {
            (Some(method), _) => format!("{}: {method}", self.server_id),
            (None, Some(err)) => format!("{}: unparseable push ({err})", self.server_id),
            (None, None) => format!("{}: push", self.server_id),
        }
    }
}

/// Whether a JSON-RPC message is a server push rather than a response or a
/// server-to-client request: it has a method and no correlating id.
#[must_use]
pub fn is_push(message: &Value) -> bool {
    message.get("method").is_some_and(Value::is_string) && message.get("id").is_none()
}
