//! User-facing toasts for background refreshes.

use serde::Serialize;

use crate::connection::ServerConnection;
use crate::notification::{ListKind, Notification};
use crate::refresh::RefreshOutcome;

/// Tabs of the inspector UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tab {
    /// Resources and resource templates.
    Resources,
    /// Tools.
    Tools,
    /// Prompts.
    Prompts,
    /// Request/response history.
    History,
}

impl From<ListKind> for Tab {
    fn from(kind: ListKind) -> Self {
        match kind {
            ListKind::Resources => Self::Resources,
            ListKind::Tools => Self::Tools,
            ListKind::Prompts => Self::Prompts,
        }
    }
}

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToastLevel {
    /// Informational.
    Info,
    /// Something failed.
    Error,
}

/// A short message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    /// Server the toast is about.
    pub server_id: String,
    /// Severity.
    pub level: ToastLevel,
    /// Rendered text.
    pub message: String,
}

impl Toast {
    /// Toast for a finished refresh.
    #[must_use]
    pub fn for_outcome(connection: &ServerConnection, outcome: &RefreshOutcome) -> Self {
        let (level, message) = match &outcome.result {
            Ok(count) => (
                ToastLevel::Info,
                format!(
                    "{}: {} list refreshed ({count} items)",
                    connection.name, outcome.kind
                ),
            ),
            Err(e) => (
                ToastLevel::Error,
                format!("{}: failed to refresh {}: {e}", connection.name, outcome.kind),
            ),
        };
        Self {
            server_id: connection.id.clone(),
            level,
            message,
        }
    }
}

/// Whether a refresh toast caused by `notification` should be withheld.
///
/// Toasts are withheld when the server has them switched off, or when the
/// user is already looking at the tab of the refreshed list.
#[must_use]
pub fn suppress(
    connection: &ServerConnection,
    active_tab: Option<Tab>,
    notification: &Notification,
) -> bool {
    if !connection.toast_notifications {
        return true;
    }
    match (notification.list_kind(), active_tab) {
        (Some(kind), Some(tab)) => Tab::from(kind) == tab,
        _ => false,
    }
}
