//! One live connection to one MCP server.

use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rmcp::model::{CallToolRequestParams, GetPromptRequestParams, ReadResourceRequestParams};
use rmcp::service::{Peer, RoleClient};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::bridge::NotificationBridge;
use crate::config::{InspectorSettings, ServerConfig};
use crate::connection::{ConnectionState, ServerConnection};
use crate::error::{McpError, McpResult, ServiceFailure};
use crate::handler::{PeriscopeClientHandler, SharedRoots};
use crate::recorder::{Direction, InteractionRecorder};
use crate::transport::{Link, McpService, Transport};
use crate::types::{
    PromptContent, PromptDefinition, ResourceContent, ResourceDefinition, ResourceListing,
    ResourceTemplateDefinition, Root, ServerCapabilities, ServerInfo, ToolDefinition, ToolResult,
};

struct Live {
    service: McpService,
    transport: Transport,
}

/// A connection to one server over one transport.
///
/// A session connects once. All calls race against the connection's
/// cancellation token, so closing the session (or losing the transport)
/// resolves every outstanding call instead of leaving it hanging. Only
/// transport-level failures change the connection state; a server rejecting
/// a single request does not.
pub struct ServerSession {
    config: ServerConfig,
    settings: InspectorSettings,
    link: Arc<Link>,
    recorder: Arc<InteractionRecorder>,
    roots: SharedRoots,
    started: AtomicBool,
    peer: RwLock<Option<Peer<RoleClient>>>,
    live: Mutex<Option<Live>>,
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("server", &self.config.id)
            .field("transport", &self.config.transport)
            .field("state", &self.link.snapshot().state)
            .finish_non_exhaustive()
    }
}

impl ServerSession {
    /// Create a disconnected session.
    ///
    /// `bridge` receives this server's pushes; `recorder` receives every
    /// request and response.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        settings: InspectorSettings,
        bridge: NotificationBridge,
        recorder: Arc<InteractionRecorder>,
    ) -> Self {
        let (state, _) = watch::channel(ServerConnection::new(&config));
        Self {
            link: Arc::new(Link::new(config.id.clone(), bridge, state)),
            config,
            settings,
            recorder,
            roots: Arc::new(RwLock::new(Vec::new())),
            started: AtomicBool::new(false),
            peer: RwLock::new(None),
            live: Mutex::new(None),
        }
    }

    /// Server id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Configuration this session was created from.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current connection snapshot.
    #[must_use]
    pub fn connection(&self) -> ServerConnection {
        self.link.snapshot()
    }

    /// Receiver that sees every connection state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ServerConnection> {
        self.link.subscribe()
    }

    /// Spawn or dial the server and run the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Connect`] for invalid configuration, spawn or
    /// network failures, handshake failures and timeouts. The connection is
    /// left in `Failed`. Returns [`McpError::Disconnected`] if
    /// [`disconnect`](Self::disconnect) ran while the handshake was in flight.
    pub async fn connect(&self) -> McpResult<ServerCapabilities> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(self.link.connect_error("session already used; create a new one"));
        }
        if let Err(e) = self.config.validate() {
            return Err(self.connect_failed(e.to_string()));
        }

        self.link.update(|c| c.set_state(ConnectionState::Connecting));
        info!(server = %self.id(), transport = %self.config.transport, "Connecting to MCP server");

        let handler = PeriscopeClientHandler::new(self.link.bridge().clone(), Arc::clone(&self.roots));
        let timeout = self.settings.connect_timeout();
        let (service, transport) =
            match tokio::time::timeout(
                timeout,
                Transport::connect(&self.config, &self.settings, handler, &self.link),
            )
            .await
            {
                Ok(Ok(connected)) => connected,
                Ok(Err(McpError::Connect { reason, .. })) => {
                    return Err(self.connect_failed(reason));
                },
                Ok(Err(e)) => return Err(self.connect_failed(e.to_string())),
                Err(_) => {
                    return Err(self.connect_failed(format!(
                        "timed out after {}s",
                        timeout.as_secs()
                    )));
                },
            };

        let info = service.peer_info().map(ServerInfo::from_rmcp);
        let capabilities = info.as_ref().map(|i| i.capabilities).unwrap_or_default();

        // Checked under the lock `disconnect` takes, so a close that started
        // during the handshake either sees the live service or is seen here.
        let mut live = self.live.lock().await;
        if self.link.is_closing() {
            drop(live);
            debug!(server = %self.id(), "Disconnected during handshake; closing new session");
            Self::close_live(self.id(), self.settings.shutdown_timeout(), service, transport).await;
            return Err(McpError::Disconnected {
                server: self.id().to_string(),
            });
        }
        if self.link.is_lost() {
            drop(live);
            let reason = self
                .link
                .snapshot()
                .last_error
                .unwrap_or_else(|| "transport lost during handshake".to_string());
            Self::close_live(self.id(), self.settings.shutdown_timeout(), service, transport).await;
            return Err(self.connect_failed(reason));
        }
        *self.peer.write().unwrap_or_else(PoisonError::into_inner) = Some(service.peer().clone());
        *live = Some(Live { service, transport });
        self.link.update(|c| {
            c.capabilities = Some(capabilities);
            c.server_info = info.clone();
            c.last_error = None;
            c.set_state(ConnectionState::Connected);
        });
        drop(live);

        info!(
            server = %self.id(),
            remote = info.as_ref().map_or("unknown", |i| i.name.as_str()),
            "MCP connection established"
        );
        Ok(capabilities)
    }

    fn connect_failed(&self, reason: String) -> McpError {
        warn!(server = %self.id(), reason = %reason, "MCP connect failed");
        self.link.update(|c| c.fail(reason.clone()));
        self.link.connect_error(reason)
    }

    fn peer_slot(&self) -> Option<Peer<RoleClient>> {
        self.peer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn peer(&self) -> McpResult<Peer<RoleClient>> {
        self.peer_slot().ok_or_else(|| McpError::NotConnected {
            server: self.id().to_string(),
        })
    }

    /// Run one request: record it, race it against cancellation, classify
    /// the failure, record the outcome.
    async fn request<T, F>(
        &self,
        method: &str,
        params: Value,
        call: F,
        application_error: impl FnOnce(String) -> McpError,
    ) -> McpResult<T>
    where
        T: Serialize,
        F: Future<Output = Result<T, rmcp::ServiceError>>,
    {
        self.recorder.record(
            Direction::Sent,
            self.id(),
            json!({ "method": method, "params": params }),
        );

        let outcome = tokio::select! {
            biased;
            () = self.link.cancelled() => Err(self.link.interrupted_error()),
            result = call => result.map_err(|e| match ServiceFailure::from(e) {
                ServiceFailure::Application(message) => application_error(message),
                ServiceFailure::Closed(reason) => McpError::TransportFailure {
                    server: self.id().to_string(),
                    reason,
                },
                ServiceFailure::Protocol(reason) => McpError::Protocol {
                    server: self.id().to_string(),
                    reason,
                },
            }),
        };

        match &outcome {
            Ok(value) => {
                let payload = serde_json::to_value(value)
                    .unwrap_or_else(|e| json!({ "unserializable": e.to_string() }));
                self.recorder.record(
                    Direction::Received,
                    self.id(),
                    json!({ "method": method, "result": payload }),
                );
            },
            Err(e) => {
                self.recorder.record(
                    Direction::Received,
                    self.id(),
                    json!({ "method": method, "error": e.to_string() }),
                );
                if let McpError::TransportFailure { reason, .. } = e {
                    self.link.transport_lost(reason);
                } else {
                    debug!(server = %self.id(), method, error = %e, "Request failed");
                }
            },
        }
        outcome
    }

    fn protocol_error(&self) -> impl FnOnce(String) -> McpError + '_ {
        move |reason| McpError::Protocol {
            server: self.id().to_string(),
            reason,
        }
    }

    /// List tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or the request fails.
    pub async fn list_tools(&self) -> McpResult<Vec<ToolDefinition>> {
        let peer = self.peer()?;
        let tools = self
            .request("tools/list", Value::Null, peer.list_all_tools(), self.protocol_error())
            .await?;
        Ok(tools
            .iter()
            .map(|t| ToolDefinition::from_rmcp(t, self.id()))
            .collect())
    }

    /// List prompts.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or the request fails.
    pub async fn list_prompts(&self) -> McpResult<Vec<PromptDefinition>> {
        let peer = self.peer()?;
        let prompts = self
            .request("prompts/list", Value::Null, peer.list_all_prompts(), self.protocol_error())
            .await?;
        Ok(prompts
            .iter()
            .map(|p| PromptDefinition::from_rmcp(p, self.id()))
            .collect())
    }

    /// List static resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or the request fails.
    pub async fn list_resources(&self) -> McpResult<Vec<ResourceDefinition>> {
        let peer = self.peer()?;
        let resources = self
            .request(
                "resources/list",
                Value::Null,
                peer.list_all_resources(),
                self.protocol_error(),
            )
            .await?;
        Ok(resources
            .iter()
            .map(|r| ResourceDefinition::from_rmcp(r, self.id()))
            .collect())
    }

    /// List resource templates.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or the request fails.
    pub async fn list_resource_templates(&self) -> McpResult<Vec<ResourceTemplateDefinition>> {
        let peer = self.peer()?;
        let templates = self
            .request(
                "resources/templates/list",
                Value::Null,
                peer.list_all_resource_templates(),
                self.protocol_error(),
            )
            .await?;
        Ok(templates
            .iter()
            .map(|t| ResourceTemplateDefinition::from_rmcp(t, self.id()))
            .collect())
    }

    /// List static resources and templates concurrently.
    ///
    /// A server that rejects the template listing (for example because it
    /// does not implement it) yields an empty template list.
    ///
    /// # Errors
    ///
    /// Returns an error if the static listing fails or the template listing
    /// fails at the transport level.
    pub async fn list_all_resources(&self) -> McpResult<ResourceListing> {
        let (resources, templates) =
            tokio::join!(self.list_resources(), self.list_resource_templates());
        let templates = match templates {
            Err(McpError::Protocol { reason, .. }) => {
                debug!(server = %self.id(), reason = %reason, "No resource templates");
                Vec::new()
            },
            other => other?,
        };
        Ok(ResourceListing {
            resources: resources?,
            templates,
        })
    }

    /// Call a tool.
    ///
    /// A tool that reports failure in-band (`isError`) still returns `Ok`;
    /// only a JSON-RPC error becomes [`McpError::Tool`].
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or the request fails.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> McpResult<ToolResult> {
        let peer = self.peer()?;
        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(name.to_string()),
            arguments: Some(arguments),
            task: None,
        };
        let recorded = serde_json::to_value(&params).unwrap_or(Value::Null);
        let result = self
            .request("tools/call", recorded, peer.call_tool(params), |message| {
                McpError::Tool {
                    server: self.id().to_string(),
                    tool: name.to_string(),
                    message,
                }
            })
            .await?;
        Ok(ToolResult::from(result))
    }

    /// Read a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or the request fails.
    pub async fn read_resource(&self, uri: &str) -> McpResult<Vec<ResourceContent>> {
        let peer = self.peer()?;
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let result = self
            .request(
                "resources/read",
                json!({ "uri": uri }),
                peer.read_resource(params),
                |message| McpError::Resource {
                    server: self.id().to_string(),
                    uri: uri.to_string(),
                    message,
                },
            )
            .await?;
        Ok(result.contents.iter().map(ResourceContent::from_rmcp).collect())
    }

    /// Render a prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or the request fails.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<PromptContent> {
        let peer = self.peer()?;
        let recorded = json!({ "name": name, "arguments": arguments });
        let params = GetPromptRequestParams {
            meta: None,
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let result = self
            .request("prompts/get", recorded, peer.get_prompt(params), |message| {
                McpError::Prompt {
                    server: self.id().to_string(),
                    prompt: name.to_string(),
                    message,
                }
            })
            .await?;
        Ok(PromptContent::from(result))
    }

    /// Roots currently exposed to the server.
    #[must_use]
    pub fn get_roots(&self) -> Vec<Root> {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Expose another root and tell the server the list changed.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Root`] for an empty or duplicate URI.
    pub async fn add_root(&self, root: Root) -> McpResult<Vec<Root>> {
        if root.uri.trim().is_empty() {
            return Err(self.root_error("root URI must not be empty"));
        }
        let roots = {
            let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
            if roots.iter().any(|r| r.uri == root.uri) {
                return Err(self.root_error(format!("root {} already exists", root.uri)));
            }
            roots.push(root);
            roots.clone()
        };
        self.announce_roots().await;
        Ok(roots)
    }

    /// Stop exposing a root and tell the server the list changed.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Root`] if no root has this URI.
    pub async fn remove_root(&self, uri: &str) -> McpResult<Vec<Root>> {
        let roots = {
            let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
            let Some(index) = roots.iter().position(|r| r.uri == uri) else {
                return Err(self.root_error(format!("no root {uri}")));
            };
            roots.remove(index);
            roots.clone()
        };
        self.announce_roots().await;
        Ok(roots)
    }

    fn root_error(&self, message: impl Into<String>) -> McpError {
        McpError::Root {
            server: self.id().to_string(),
            message: message.into(),
        }
    }

    async fn announce_roots(&self) {
        let Some(peer) = self.peer_slot() else {
            return;
        };
        self.recorder.record(
            Direction::Sent,
            self.id(),
            json!({ "method": "notifications/roots/list_changed" }),
        );
        if let Err(e) = peer.notify_roots_list_changed().await {
            warn!(server = %self.id(), error = %e, "Failed to announce roots change");
        }
    }

    /// Close the rmcp service, then release the transport.
    async fn close_live(
        server_id: &str,
        timeout: std::time::Duration,
        mut service: McpService,
        transport: Transport,
    ) {
        match service.close_with_timeout(timeout).await {
            Ok(Some(reason)) => {
                debug!(server = %server_id, ?reason, "MCP session closed gracefully");
            },
            Ok(None) => {
                warn!(
                    server = %server_id,
                    timeout_secs = timeout.as_secs(),
                    "MCP session close timed out; dropping"
                );
            },
            Err(e) => {
                warn!(server = %server_id, error = %e, "MCP session close join error");
            },
        }
        drop(service);
        transport.release(server_id).await;
    }

    /// Close the connection and release its process or sockets.
    ///
    /// Safe to call any number of times. Outstanding calls resolve as
    /// [`McpError::Disconnected`] (or `TransportFailure` if the transport had
    /// already dropped).
    pub async fn disconnect(&self) {
        let first = self.link.begin_close();
        self.link.interrupt();
        self.peer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let live = self.live.lock().await.take();
        if let Some(Live { service, transport }) = live {
            Self::close_live(self.id(), self.settings.shutdown_timeout(), service, transport).await;
        }

        self.link.update(|c| {
            if c.state != ConnectionState::Failed {
                c.set_state(ConnectionState::Disconnected);
            }
        });
        if first {
            info!(server = %self.id(), "Disconnected from MCP server");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    fn session(config: ServerConfig) -> (ServerSession, Arc<InteractionRecorder>) {
        let (tx, _rx) = mpsc::channel(8);
        let bridge = NotificationBridge::new(config.id.clone(), tx);
        let recorder = Arc::new(InteractionRecorder::new());
        let settings = InspectorSettings::default();
        (
            ServerSession::new(config, settings, bridge, Arc::clone(&recorder)),
            recorder,
        )
    }

    #[tokio::test]
    async fn test_calls_before_connect_are_rejected() {
        let (session, recorder) = session(ServerConfig::stdio("fs", "true"));

        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::NotConnected { ref server } if server == "fs"));
        let err = session.call_tool("echo", Map::new()).await.unwrap_err();
        assert!(matches!(err, McpError::NotConnected { .. }));
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_connection() {
        let (session, _) = session(ServerConfig::streamable_http("web", "ftp://example.com"));

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Connect { .. }));
        let snapshot = session.connection();
        assert_eq!(snapshot.state, ConnectionState::Failed);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_connect_is_single_use() {
        let (session, _) = session(ServerConfig::streamable_http("web", "ftp://example.com"));
        let _ = session.connect().await;

        let err = session.connect().await.unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_connect_error() {
        let (session, _) = session(ServerConfig::stdio(
            "ghost",
            "/definitely/not/a/real/periscope/binary",
        ));

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Connect { ref reason, .. } if reason.contains("spawn")));
        assert_eq!(session.connection().state, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_roots_are_managed_offline() {
        let (session, _) = session(ServerConfig::stdio("fs", "true"));

        let roots = session
            .add_root(Root::new("file:///work").with_name("work"))
            .await
            .unwrap();
        assert_eq!(roots.len(), 1);

        let dup = session.add_root(Root::new("file:///work")).await.unwrap_err();
        assert!(matches!(dup, McpError::Root { .. }));
        let empty = session.add_root(Root::new("  ")).await.unwrap_err();
        assert!(matches!(empty, McpError::Root { .. }));

        assert!(session.remove_root("file:///work").await.unwrap().is_empty());
        let missing = session.remove_root("file:///work").await.unwrap_err();
        assert!(matches!(missing, McpError::Root { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, _) = session(ServerConfig::stdio("fs", "true"));
        let mut watch = session.watch();

        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(session.connection().state, ConnectionState::Disconnected);
        assert!(
            tokio::time::timeout(Duration::from_millis(10), watch.changed())
                .await
                .is_ok()
        );
    }
}
