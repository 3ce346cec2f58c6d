//! The three transports behind one connect/release contract.
//!
//! Everything after the handshake (discovery, calls, roots) goes through the
//! rmcp peer and is identical for all transports. What differs is how the
//! connection is set up, how pushes reach the [`NotificationBridge`], and
//! what has to be released on disconnect:
//!
//! - [`TransportKind::Stdio`]: owns a child process. A supervisor task
//!   watches for exit and reports an unexpected one as a hard disconnect.
//! - [`TransportKind::StreamableHttp`]: rmcp owns the HTTP machinery; pushes
//!   arrive through the client handler. A keepalive task pings the server
//!   and reports an unreachable one as a hard disconnect.
//! - [`TransportKind::Sse`]: an event-stream reader and a POST writer of our
//!   own. Pushes are routed to the bridge directly with their SSE event id.

mod http;
mod sse;
mod stdio;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::service::{RoleClient, RunningService};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use crate::bridge::NotificationBridge;
use crate::config::{InspectorSettings, ServerConfig, TransportKind};
use crate::connection::{ConnectionState, ServerConnection};
use crate::error::{McpError, McpResult};
use crate::handler::PeriscopeClientHandler;

pub use sse::{SseDecoder, SseEvent};

/// A running rmcp client service.
pub(crate) type McpService = RunningService<RoleClient, PeriscopeClientHandler>;

/// State shared between a session and the tasks its transport spawns.
#[derive(Debug)]
pub(crate) struct Link {
    server_id: String,
    bridge: NotificationBridge,
    state: watch::Sender<ServerConnection>,
    cancel: CancellationToken,
    closing: AtomicBool,
    lost: AtomicBool,
}

impl Link {
    pub(crate) fn new(
        server_id: impl Into<String>,
        bridge: NotificationBridge,
        state: watch::Sender<ServerConnection>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            bridge,
            state,
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
            lost: AtomicBool::new(false),
        }
    }

    pub(crate) fn server_id(&self) -> &str {
        &self.server_id
    }

    pub(crate) fn bridge(&self) -> &NotificationBridge {
        &self.bridge
    }

    pub(crate) fn snapshot(&self) -> ServerConnection {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ServerConnection> {
        self.state.subscribe()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ServerConnection)) {
        self.state.send_modify(f);
    }

    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Mark the connection as being closed on purpose. Returns `true` the
    /// first time.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn fail(&self, reason: &str) {
        self.update(|c| c.fail(reason));
        self.cancel.cancel();
    }

    /// Local close: interrupt pending calls as `Disconnected`.
    pub(crate) fn interrupt(&self) {
        self.cancel.cancel();
    }

    /// The transport went away without being asked to. Reported once, by
    /// whichever of the transport task or a failing call notices first.
    pub(crate) fn transport_lost(&self, reason: &str) {
        if self.is_closing() {
            debug!(server = %self.server_id, reason, "Transport closed during disconnect");
            return;
        }
        if self.lost.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(server = %self.server_id, reason, "Transport lost");
        self.bridge.on_disconnect(reason);
        self.fail(reason);
    }

    /// Error for a call interrupted by cancellation.
    pub(crate) fn interrupted_error(&self) -> McpError {
        let snapshot = self.state.borrow();
        if snapshot.state == ConnectionState::Failed {
            McpError::TransportFailure {
                server: self.server_id.clone(),
                reason: snapshot
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "connection lost".to_string()),
            }
        } else {
            McpError::Disconnected {
                server: self.server_id.clone(),
            }
        }
    }

    pub(crate) fn connect_error(&self, reason: impl Into<String>) -> McpError {
        McpError::Connect {
            server: self.server_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Transport-specific resources owned by a live connection.
#[derive(Debug)]
pub(crate) enum Transport {
    /// Child process and its supervisor.
    Stdio(stdio::StdioTransport),
    /// Keepalive task.
    StreamableHttp(http::HttpTransport),
    /// Event-stream reader and POST writer.
    Sse(sse::SseTransport),
}

impl Transport {
    /// Open the transport described by `config` and run the handshake.
    pub(crate) async fn connect(
        config: &ServerConfig,
        settings: &InspectorSettings,
        handler: PeriscopeClientHandler,
        link: &Arc<Link>,
    ) -> McpResult<(McpService, Self)> {
        match config.transport {
            TransportKind::Stdio => stdio::connect(config, handler, link).await,
            TransportKind::StreamableHttp => {
                http::connect(config, settings.keepalive(), handler, link).await
            },
            TransportKind::Sse => sse::connect(config, handler, link).await,
        }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::StreamableHttp(_) => TransportKind::StreamableHttp,
            Self::Sse(_) => TransportKind::Sse,
        }
    }

    /// Release owned OS resources and wait until they are gone.
    pub(crate) async fn release(self, server_id: &str) {
        debug!(server = %server_id, transport = %self.kind(), "Releasing transport");
        match self {
            Self::Stdio(process) => process.release(server_id).await,
            Self::StreamableHttp(keepalive) => keepalive.release().await,
            Self::Sse(tasks) => tasks.release().await,
        }
    }
}

/// Configured request headers as a reqwest header map.
fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid header name {name:?}: {e}"))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| format!("invalid value for {name}: {e}"))?;
        map.insert(name, value);
    }
    Ok(map)
}
