//! The inspector facade: every connection, its notifications, and the
//! actions the presentation layer can run against it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use periscope_forms::{FieldSpec, FormSession};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bridge::NotificationBridge;
use crate::config::{InspectorSettings, ServerConfig, ServersConfig};
use crate::connection::ServerConnection;
use crate::error::{McpError, McpResult};
use crate::notification::{ListKind, Notification};
use crate::recorder::{InteractionRecord, InteractionRecorder};
use crate::refresh::ListRefresher;
use crate::router::{ConnectionDirectory, EventCallback, NotificationRouter, SubscriptionId};
use crate::session::ServerSession;
use crate::templates::{expand_template, template_parameters};
use crate::toast::Tab;
use crate::types::{
    PromptContent, PromptDefinition, ResourceContent, ResourceListing, Root, ServerCapabilities,
    ToolDefinition, ToolResult,
};

/// Something the user can run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionTarget {
    /// Call a tool by name.
    Tool(String),
    /// Render a prompt by name.
    Prompt(String),
    /// Read a static resource by URI.
    Resource(String),
    /// Expand a URI template and read the result.
    ResourceTemplate(String),
}

impl ActionTarget {
    /// Stable identifier, also used as the form target.
    #[must_use]
    pub fn identifier(&self) -> String {
        match self {
            Self::Tool(name) => format!("tool:{name}"),
            Self::Prompt(name) => format!("prompt:{name}"),
            Self::Resource(uri) => format!("resource:{uri}"),
            Self::ResourceTemplate(template) => format!("template:{template}"),
        }
    }
}

/// What running an [`ActionTarget`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Tool output.
    Tool(ToolResult),
    /// Rendered prompt.
    Prompt(PromptContent),
    /// Resource contents.
    Resource(Vec<ResourceContent>),
}

/// Latest discovery lists of one server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryCache {
    /// Tools, once listed.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Prompts, once listed.
    pub prompts: Option<Vec<PromptDefinition>>,
    /// Resources and templates, once listed.
    pub resources: Option<ResourceListing>,
}

struct Entry {
    session: Arc<ServerSession>,
    cache: DiscoveryCache,
}

/// Sessions by server id, shared with the router.
#[derive(Default)]
struct SessionRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl SessionRegistry {
    fn session(&self, server_id: &str) -> McpResult<Arc<ServerSession>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_id)
            .map(|e| Arc::clone(&e.session))
            .ok_or_else(|| McpError::ServerNotFound {
                server: server_id.to_string(),
            })
    }

    fn insert(&self, session: Arc<ServerSession>) -> Option<Arc<ServerSession>> {
        let id = session.id().to_string();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Entry {
                    session,
                    cache: DiscoveryCache::default(),
                },
            )
            .map(|old| old.session)
    }

    fn remove(&self, server_id: &str) -> Option<Arc<ServerSession>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(server_id)
            .map(|e| e.session)
    }

    fn drain(&self) -> Vec<Arc<ServerSession>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, e)| e.session)
            .collect()
    }

    /// Update the cache, unless the session was replaced meanwhile.
    fn update_cache(&self, session: &Arc<ServerSession>, f: impl FnOnce(&mut DiscoveryCache)) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(session.id()) {
            Some(entry) if Arc::ptr_eq(&entry.session, session) => f(&mut entry.cache),
            _ => debug!(server = %session.id(), "Session replaced; discarding listing"),
        }
    }

    fn cache(&self, server_id: &str) -> Option<DiscoveryCache> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_id)
            .map(|e| e.cache.clone())
    }

    fn snapshots(&self) -> Vec<ServerConnection> {
        let mut list: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.session.connection())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    async fn fetch_tools(&self, server_id: &str) -> McpResult<Vec<ToolDefinition>> {
        let session = self.session(server_id)?;
        let tools = session.list_tools().await?;
        self.update_cache(&session, |c| c.tools = Some(tools.clone()));
        Ok(tools)
    }

    async fn fetch_prompts(&self, server_id: &str) -> McpResult<Vec<PromptDefinition>> {
        let session = self.session(server_id)?;
        let prompts = session.list_prompts().await?;
        self.update_cache(&session, |c| c.prompts = Some(prompts.clone()));
        Ok(prompts)
    }

    async fn fetch_resources(&self, server_id: &str) -> McpResult<ResourceListing> {
        let session = self.session(server_id)?;
        let listing = session.list_all_resources().await?;
        self.update_cache(&session, |c| c.resources = Some(listing.clone()));
        Ok(listing)
    }
}

#[async_trait]
impl ListRefresher for SessionRegistry {
    async fn refresh(&self, server_id: &str, kind: ListKind) -> McpResult<usize> {
        match kind {
            ListKind::Tools => self.fetch_tools(server_id).await.map(|l| l.len()),
            ListKind::Prompts => self.fetch_prompts(server_id).await.map(|l| l.len()),
            ListKind::Resources => self.fetch_resources(server_id).await.map(|l| l.len()),
        }
    }
}

impl ConnectionDirectory for SessionRegistry {
    fn connection(&self, server_id: &str) -> Option<ServerConnection> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_id)
            .map(|e| e.session.connection())
    }
}

/// Owns every server session, the shared notification pipeline and the
/// interaction history.
///
/// Must be created inside a Tokio runtime: it starts the router task.
pub struct Inspector {
    settings: InspectorSettings,
    registry: Arc<SessionRegistry>,
    recorder: Arc<InteractionRecorder>,
    notifications: mpsc::Sender<Notification>,
    dropped: Arc<AtomicU64>,
    router: NotificationRouter,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("settings", &self.settings)
            .field("connections", &self.registry.snapshots().len())
            .finish_non_exhaustive()
    }
}

impl Inspector {
    /// Create an inspector with no connections.
    #[must_use]
    pub fn new(settings: InspectorSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.channel_capacity());
        let registry = Arc::new(SessionRegistry::default());
        let recorder = Arc::new(InteractionRecorder::with_capacity(settings.history_capacity()));
        let router = NotificationRouter::spawn(
            rx,
            Arc::clone(&recorder),
            Arc::clone(&registry) as Arc<dyn ConnectionDirectory>,
            Arc::clone(&registry) as Arc<dyn ListRefresher>,
            settings.debounce(),
        );
        Self {
            settings,
            registry,
            recorder,
            notifications: tx,
            dropped: Arc::new(AtomicU64::new(0)),
            router,
        }
    }

    /// Settings in effect.
    #[must_use]
    pub fn settings(&self) -> &InspectorSettings {
        &self.settings
    }

    /// Connect to `config`, replacing any session with the same id.
    ///
    /// The connection stays listed after a failed attempt so its `Failed`
    /// state and error remain visible.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Connect`] if the server cannot be reached.
    pub async fn connect(&self, config: ServerConfig) -> McpResult<ServerCapabilities> {
        let server_id = config.id.clone();
        let bridge = NotificationBridge::new(server_id.as_str(), self.notifications.clone())
            .with_drop_counter(Arc::clone(&self.dropped));
        let session = Arc::new(ServerSession::new(
            config,
            self.settings.clone(),
            bridge,
            Arc::clone(&self.recorder),
        ));

        if let Some(old) = self.registry.insert(Arc::clone(&session)) {
            info!(server = %server_id, "Replacing existing connection");
            self.router.forget_server(&server_id);
            old.disconnect().await;
        }
        session.connect().await
    }

    /// Connect every server in `config`. One failure does not stop the rest.
    pub async fn connect_all(&self, config: &ServersConfig) -> Vec<(String, McpResult<ServerCapabilities>)> {
        let mut results = Vec::with_capacity(config.servers.len());
        for server in config.servers.values() {
            let result = self.connect(server.clone()).await;
            if let Err(e) = &result {
                warn!(server = %server.id, error = %e, "Failed to connect configured server");
            }
            results.push((server.id.clone(), result));
        }
        results
    }

    /// Close and forget one connection.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ServerNotFound`] for an unknown id.
    pub async fn disconnect(&self, server_id: &str) -> McpResult<()> {
        let session = self
            .registry
            .remove(server_id)
            .ok_or_else(|| McpError::ServerNotFound {
                server: server_id.to_string(),
            })?;
        self.router.forget_server(server_id);
        session.disconnect().await;
        Ok(())
    }

    /// Close every connection and stop the router.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|s| s.disconnect())).await;
        self.router.shutdown().await;
        info!(count, "Inspector shut down");
    }

    /// Register a callback for events about `server_id`.
    pub fn subscribe(&self, server_id: impl Into<String>, callback: EventCallback) -> SubscriptionId {
        self.router.subscribe(server_id, callback)
    }

    /// Remove a callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    /// Tell the toast policy which tab is visible.
    pub fn set_active_tab(&self, tab: Option<Tab>) {
        self.router.set_active_tab(tab);
    }

    /// The notification router.
    #[must_use]
    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    /// Snapshots of all connections, ordered by id.
    #[must_use]
    pub fn connections(&self) -> Vec<ServerConnection> {
        self.registry.snapshots()
    }

    /// Snapshot of one connection.
    #[must_use]
    pub fn connection(&self, server_id: &str) -> Option<ServerConnection> {
        self.registry.connection(server_id)
    }

    /// Receiver that sees every state change of one connection.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ServerNotFound`] for an unknown id.
    pub fn watch(&self, server_id: &str) -> McpResult<watch::Receiver<ServerConnection>> {
        Ok(self.registry.session(server_id)?.watch())
    }

    /// Latest interactions with every server, oldest first.
    #[must_use]
    pub fn interactions(&self) -> Vec<InteractionRecord> {
        self.recorder.snapshot()
    }

    /// Latest interactions with one server, oldest first.
    #[must_use]
    pub fn interactions_for(&self, server_id: &str) -> Vec<InteractionRecord> {
        self.recorder.for_server(server_id)
    }

    /// Notifications lost to a full channel.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// List tools and cache the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unknown or the request fails.
    pub async fn list_tools(&self, server_id: &str) -> McpResult<Vec<ToolDefinition>> {
        self.registry.fetch_tools(server_id).await
    }

    /// List prompts and cache the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unknown or the request fails.
    pub async fn list_prompts(&self, server_id: &str) -> McpResult<Vec<PromptDefinition>> {
        self.registry.fetch_prompts(server_id).await
    }

    /// List resources and templates concurrently and cache the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unknown or either request fails.
    pub async fn list_resources(&self, server_id: &str) -> McpResult<ResourceListing> {
        self.registry.fetch_resources(server_id).await
    }

    /// Cached discovery lists of one server.
    #[must_use]
    pub fn cached(&self, server_id: &str) -> Option<DiscoveryCache> {
        self.registry.cache(server_id)
    }

    /// Roots exposed to a server.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ServerNotFound`] for an unknown id.
    pub fn get_roots(&self, server_id: &str) -> McpResult<Vec<Root>> {
        Ok(self.registry.session(server_id)?.get_roots())
    }

    /// Expose a root to a server.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown id, or an empty or duplicate URI.
    pub async fn add_root(&self, server_id: &str, root: Root) -> McpResult<Vec<Root>> {
        self.registry.session(server_id)?.add_root(root).await
    }

    /// Stop exposing a root.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown id or URI.
    pub async fn remove_root(&self, server_id: &str, uri: &str) -> McpResult<Vec<Root>> {
        self.registry.session(server_id)?.remove_root(uri).await
    }

    /// Build the form that gates `target`.
    ///
    /// Tool and prompt definitions come from the cache, listing them first
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unknown, listing fails, or the
    /// tool or prompt does not exist.
    pub async fn form_for(&self, server_id: &str, target: &ActionTarget) -> McpResult<FormSession> {
        let identifier = target.identifier();
        match target {
            ActionTarget::Tool(name) => {
                let cached = self.cached(server_id).and_then(|c| c.tools);
                let tools = match cached {
                    Some(tools) => tools,
                    None => self.list_tools(server_id).await?,
                };
                let tool = tools
                    .iter()
                    .find(|t| &t.name == name)
                    .ok_or_else(|| McpError::InvalidTarget(format!("unknown tool {name}")))?;
                Ok(FormSession::from_schema(identifier, &tool.input_schema))
            },
            ActionTarget::Prompt(name) => {
                let cached = self.cached(server_id).and_then(|c| c.prompts);
                let prompts = match cached {
                    Some(prompts) => prompts,
                    None => self.list_prompts(server_id).await?,
                };
                let prompt = prompts
                    .iter()
                    .find(|p| &p.name == name)
                    .ok_or_else(|| McpError::InvalidTarget(format!("unknown prompt {name}")))?;
                let specs = prompt
                    .arguments
                    .iter()
                    .map(|arg| {
                        let mut spec = FieldSpec::text(&arg.name);
                        if arg.required {
                            spec = spec.required();
                        }
                        match &arg.description {
                            Some(desc) => spec.with_description(desc),
                            None => spec,
                        }
                    })
                    .collect();
                Ok(FormSession::new(identifier, specs))
            },
            ActionTarget::Resource(_) => Ok(FormSession::new(identifier, Vec::new())),
            ActionTarget::ResourceTemplate(template) => Ok(FormSession::for_template_parameters(
                identifier,
                template_parameters(template),
            )),
        }
    }

    /// Run `target` with the values of a form.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidTarget`] if the form is for another target
    /// or is not ready, otherwise whatever [`Inspector::execute`] returns.
    pub async fn execute_form(
        &self,
        server_id: &str,
        target: &ActionTarget,
        form: &FormSession,
    ) -> McpResult<ExecutionResult> {
        if form.target() != target.identifier() {
            return Err(McpError::InvalidTarget(format!(
                "form is for {}, not {}",
                form.target(),
                target.identifier()
            )));
        }
        if !form.can_execute() {
            return Err(McpError::InvalidTarget(format!(
                "{} has invalid or unmounted fields",
                form.target()
            )));
        }
        self.execute(server_id, target, form.values()).await
    }

    /// Run `target` on a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unknown, a template cannot be
    /// expanded, or the request fails.
    pub async fn execute(
        &self,
        server_id: &str,
        target: &ActionTarget,
        values: Map<String, Value>,
    ) -> McpResult<ExecutionResult> {
        let session = self.registry.session(server_id)?;
        debug!(server = %server_id, target = %target.identifier(), "Executing action");
        match target {
            ActionTarget::Tool(name) => session.call_tool(name, values).await.map(ExecutionResult::Tool),
            ActionTarget::Prompt(name) => {
                session.get_prompt(name, values).await.map(ExecutionResult::Prompt)
            },
            ActionTarget::Resource(uri) => {
                session.read_resource(uri).await.map(ExecutionResult::Resource)
            },
            ActionTarget::ResourceTemplate(template) => {
                let uri = expand_template(template, &values)?;
                session.read_resource(&uri).await.map(ExecutionResult::Resource)
            },
        }
    }
}
