//! `PeriscopeClientHandler`: the rmcp client handler used for every
//! connection.
//!
//! Server-initiated notifications are re-encoded as JSON-RPC messages and
//! forwarded to the connection's [`NotificationBridge`]. The only request
//! answered here is `roots/list`.

use std::sync::{Arc, PoisonError, RwLock};

use rmcp::model::{
    CancelledNotificationParam, ClientCapabilities, ClientInfo, CustomNotification,
    Implementation, ListRootsResult, LoggingMessageNotificationParam, ProgressNotificationParam,
    ProtocolVersion, ResourceUpdatedNotificationParam, RootsCapabilities,
};
use rmcp::service::{NotificationContext, RequestContext, RoleClient};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::bridge::{NotificationBridge, RawPush};
use crate::types::Root;

/// Roots shared between a session and its handler.
pub(crate) type SharedRoots = Arc<RwLock<Vec<Root>>>;

/// rmcp client handler forwarding pushes to a [`NotificationBridge`].
#[derive(Debug, Clone)]
pub struct PeriscopeClientHandler {
    bridge: NotificationBridge,
    roots: SharedRoots,
}

impl PeriscopeClientHandler {
    pub(crate) fn new(bridge: NotificationBridge, roots: SharedRoots) -> Self {
        Self { bridge, roots }
    }

    fn forward(&self, method: &str, params: Option<Value>) {
        let mut message = json!({ "jsonrpc": "2.0", "method": method });
        if let (Some(params), Some(obj)) = (params, message.as_object_mut()) {
            obj.insert("params".to_string(), params);
        }
        self.bridge.on_raw_push(RawPush::Json(message));
    }

    fn forward_params<P: Serialize>(&self, method: &str, params: &P) {
        match serde_json::to_value(params) {
            Ok(value) => self.forward(method, Some(value)),
            Err(e) => {
                warn!(server = %self.bridge.server_id(), method, error = %e, "Failed to encode push params");
                self.forward(method, None);
            },
        }
    }
}

impl rmcp::ClientHandler for PeriscopeClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: ProtocolVersion::default(),
            capabilities: ClientCapabilities {
                roots: Some(RootsCapabilities {
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
            client_info: Implementation {
                name: "periscope".to_string(),
                title: Some("Periscope MCP Inspector".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }

    async fn list_roots(
        &self,
        _context: RequestContext<RoleClient>,
    ) -> Result<ListRootsResult, rmcp::ErrorData> {
        let roots = self
            .roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .map(rmcp::model::Root::from)
            .collect::<Vec<_>>();
        debug!(server = %self.bridge.server_id(), count = roots.len(), "Answering roots/list");
        Ok(ListRootsResult { roots })
    }

    async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward("notifications/resources/list_changed", None);
    }

    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward("notifications/tools/list_changed", None);
    }

    async fn on_prompt_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward("notifications/prompts/list_changed", None);
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        self.forward_params("notifications/message", &params);
    }

    async fn on_resource_updated(
        &self,
        params: ResourceUpdatedNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        self.forward_params("notifications/resources/updated", &params);
    }

    async fn on_progress(
        &self,
        params: ProgressNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        self.forward_params("notifications/progress", &params);
    }

    async fn on_cancelled(
        &self,
        params: CancelledNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        self.forward_params("notifications/cancelled", &params);
    }

    async fn on_custom_notification(
        &self,
        notification: CustomNotification,
        _context: NotificationContext<RoleClient>,
    ) {
        self.forward(&notification.method, notification.params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationKind;
    use rmcp::ClientHandler;
    use tokio::sync::mpsc;

    fn handler() -> (PeriscopeClientHandler, mpsc::Receiver<crate::Notification>) {
        let (tx, rx) = mpsc::channel(8);
        let roots = Arc::new(RwLock::new(vec![Root::new("file:///work")]));
        (
            PeriscopeClientHandler::new(NotificationBridge::new("fs", tx), roots),
            rx,
        )
    }

    #[test]
    fn test_client_info_advertises_roots() {
        let (handler, _rx) = handler();
        let info = handler.get_info();
        assert_eq!(info.client_info.name, "periscope");
        assert!(info.capabilities.roots.is_some());
        assert!(info.capabilities.sampling.is_none());
    }

    #[test]
    fn test_forward_wraps_params() {
        let (handler, mut rx) = handler();
        handler.forward("notifications/message", Some(json!({"level": "info", "data": 1})));
        handler.forward("notifications/tools/list_changed", None);

        let message = rx.try_recv().unwrap();
        assert_eq!(message.kind, NotificationKind::Message);
        assert_eq!(message.params, Some(json!({"level": "info", "data": 1})));

        let changed = rx.try_recv().unwrap();
        assert_eq!(changed.kind, NotificationKind::ToolsListChanged);
        assert!(changed.params.is_none());
    }
}
