//! Connection records published to the presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{ServerConfig, TransportKind};
use crate::types::{ServerCapabilities, ServerInfo};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Not connected (never connected, or closed locally).
    Disconnected,
    /// Spawning / handshaking.
    Connecting,
    /// Handshake complete.
    Connected,
    /// Connect failed or the transport dropped.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        })
    }
}

/// Read-only snapshot of one server connection.
///
/// Only the owning session writes these; everyone else sees them through a
/// `tokio::sync::watch` receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConnection {
    /// Server id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Transport.
    pub transport: TransportKind,
    /// Command line or URL.
    pub endpoint: String,
    /// Current state.
    pub state: ConnectionState,
    /// Negotiated capabilities, once connected.
    pub capabilities: Option<ServerCapabilities>,
    /// Server identity, once connected.
    pub server_info: Option<ServerInfo>,
    /// Whether refreshes raise toasts.
    pub toast_notifications: bool,
    /// Why the connection last failed.
    pub last_error: Option<String>,
    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
}

impl ServerConnection {
    /// Fresh, disconnected record for `config`.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.display_name().to_string(),
            transport: config.transport,
            endpoint: config.endpoint(),
            state: ConnectionState::Disconnected,
            capabilities: None,
            server_info: None,
            toast_notifications: config.toast_notifications,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether the connection is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.set_state(ConnectionState::Failed);
    }
}
