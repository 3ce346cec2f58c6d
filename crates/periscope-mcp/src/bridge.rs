//! Per-connection adapter from raw server pushes to [`Notification`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::notification::Notification;

/// A push as the transport saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPush {
    /// Undecoded text (SSE `data:` payloads, anything that failed to decode).
    Text(String),
    /// A message the protocol library already decoded.
    Json(Value),
}

/// Turns raw pushes from one server into canonical notifications and hands
/// them to the router without ever waiting.
///
/// The channel is bounded; when it is full the notification is dropped,
/// counted and logged so a slow consumer cannot stall a transport's read
/// loop.
#[derive(Debug, Clone)]
pub struct NotificationBridge {
    server_id: Arc<str>,
    tx: mpsc::Sender<Notification>,
    dropped: Arc<AtomicU64>,
}

impl NotificationBridge {
    /// Create a bridge for `server_id` feeding `tx`.
    #[must_use]
    pub fn new(server_id: impl Into<Arc<str>>, tx: mpsc::Sender<Notification>) -> Self {
        Self {
            server_id: server_id.into(),
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Share a drop counter with other bridges.
    #[must_use]
    pub fn with_drop_counter(mut self, dropped: Arc<AtomicU64>) -> Self {
        self.dropped = dropped;
        self
    }

    /// Server this bridge belongs to.
    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Notifications lost to a full or closed channel.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Convert one push. Every call yields exactly one notification.
    pub fn on_raw_push(&self, raw: RawPush) {
        self.on_raw_push_with_id(raw, None);
    }

    /// Convert one push that carries a server-assigned event id.
    pub fn on_raw_push_with_id(&self, raw: RawPush, event_id: Option<String>) {
        let notification = match raw {
            RawPush::Text(text) => Notification::from_text(&self.server_id, text),
            RawPush::Json(value) => Notification::from_value(&self.server_id, &value),
        }
        .with_event_id(event_id);

        if let Some(err) = &notification.parse_error {
            debug!(server = %self.server_id, error = %err, "Unparseable push kept as Other");
        }
        self.emit(notification);
    }

    /// Report that the transport closed without being asked to.
    pub fn on_disconnect(&self, reason: &str) {
        self.emit(Notification::disconnected(&self.server_id, reason));
    }

    fn emit(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                server = %self.server_id,
                error = %e,
                "Notification channel full or closed, dropping"
            );
        }
    }
}
