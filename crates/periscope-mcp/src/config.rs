//! Server records and inspector settings.
//!
//! Both live in one TOML file:
//!
//! ```toml
//! [inspector]
//! debounce_ms = 250
//!
//! [servers.filesystem]
//! transport = "stdio"
//! command = "npx"
//! args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
//!
//! [servers.remote]
//! transport = "streamable_http"
//! url = "https://example.com/mcp"
//! toast_notifications = false
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{McpError, McpResult};

/// Maximum number of interaction records kept in memory.
pub const HISTORY_CAPACITY: usize = 200;

/// Transport used to reach a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Spawned child process speaking over stdin/stdout.
    #[default]
    Stdio,
    /// Streamable HTTP: POST requests, optional streamed responses.
    StreamableHttp,
    /// Legacy HTTP+SSE: one event stream plus a POST endpoint.
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::StreamableHttp => "streamable_http",
            Self::Sse => "sse",
        })
    }
}

fn default_true() -> bool {
    true
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server id (the key in `[servers]`).
    #[serde(skip)]
    pub id: String,
    /// Display name; falls back to the id.
    pub name: Option<String>,
    /// Transport type.
    #[serde(default)]
    pub transport: TransportKind,
    /// Command to run (stdio).
    pub command: Option<String>,
    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the command.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Endpoint URL (HTTP transports).
    pub url: Option<String>,
    /// Extra request headers (HTTP transports).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whether refreshes of this server raise toasts.
    #[serde(default = "default_true")]
    pub toast_notifications: bool,
    /// Description for users.
    pub description: Option<String>,
}

impl ServerConfig {
    fn empty(id: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            transport,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            headers: HashMap::new(),
            toast_notifications: true,
            description: None,
        }
    }

    /// Create a stdio server config.
    #[must_use]
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        let mut config = Self::empty(id, TransportKind::Stdio);
        config.command = Some(command.into());
        config
    }

    /// Create a streamable HTTP server config.
    #[must_use]
    pub fn streamable_http(id: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::empty(id, TransportKind::StreamableHttp);
        config.url = Some(url.into());
        config
    }

    /// Create a legacy SSE server config.
    #[must_use]
    pub fn sse(id: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::empty(id, TransportKind::Sse);
        config.url = Some(url.into());
        config
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Never raise toasts for this server.
    #[must_use]
    pub fn without_toasts(mut self) -> Self {
        self.toast_notifications = false;
        self
    }

    /// Set description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Name shown to users.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Short human-readable description of where the server lives.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match self.transport {
            TransportKind::Stdio => {
                let mut line = self.command.clone().unwrap_or_default();
                for arg in &self.args {
                    line.push(' ');
                    line.push_str(arg);
                }
                line
            },
            TransportKind::StreamableHttp | TransportKind::Sse => {
                self.url.clone().unwrap_or_default()
            },
        }
    }

    /// Parsed endpoint URL for the HTTP transports.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ConfigError`] if the URL is missing, does not
    /// parse, or is not http(s).
    pub fn parsed_url(&self) -> McpResult<url::Url> {
        let raw = self.url.as_deref().filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            McpError::ConfigError(format!("No url specified for {} server {}", self.transport, self.id))
        })?;
        let parsed = url::Url::parse(raw)
            .map_err(|e| McpError::ConfigError(format!("Invalid url {raw:?} for {}: {e}", self.id)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(McpError::ConfigError(format!(
                "Unsupported url scheme {:?} for {}",
                parsed.scheme(),
                self.id
            )));
        }
        Ok(parsed)
    }

    /// Check that the record carries what its transport needs.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ConfigError`] for a missing command (stdio) or a
    /// missing or invalid URL (HTTP transports).
    pub fn validate(&self) -> McpResult<()> {
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                    return Err(McpError::ConfigError(format!(
                        "No command specified for stdio server {}",
                        self.id
                    )));
                }
                Ok(())
            },
            TransportKind::StreamableHttp | TransportKind::Sse => self.parsed_url().map(|_| ()),
        }
    }
}

/// Inspector-wide settings (the `[inspector]` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectorSettings {
    /// Quiet period before a burst of list-changed notifications refreshes.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Bound of the bridge → router notification channel.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// Time allowed for spawn/handshake.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Time allowed for a graceful session close before dropping it.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Interval between liveness pings on streamable HTTP connections.
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
}

fn default_debounce_ms() -> u64 {
    250
}

fn default_notification_capacity() -> usize {
    256
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_keepalive_ms() -> u64 {
    15_000
}

impl Default for InspectorSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            notification_capacity: default_notification_capacity(),
            connect_timeout_secs: default_connect_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            keepalive_ms: default_keepalive_ms(),
        }
    }
}

impl InspectorSettings {
    /// Set the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the streamable HTTP liveness ping interval.
    #[must_use]
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Liveness ping interval, never below 10ms.
    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms.max(10))
    }

    /// Debounce window as a duration.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Shutdown timeout as a duration.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Channel bound, never zero.
    #[must_use]
    pub fn channel_capacity(&self) -> usize {
        self.notification_capacity.max(1)
    }

    /// Interaction history bound. Fixed.
    #[must_use]
    pub fn history_capacity(&self) -> usize {
        HISTORY_CAPACITY
    }
}

/// Configuration file for the inspector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersConfig {
    /// Inspector settings.
    #[serde(default)]
    pub inspector: InspectorSettings,
    /// Server records keyed by id.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl ServersConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ConfigError`] if the text is not valid.
    pub fn from_toml(content: &str) -> McpResult<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| McpError::ConfigError(format!("Invalid config: {e}")))?;

        for (id, server) in &mut config.servers {
            server.id.clone_from(id);
        }

        Ok(config)
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> McpResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Get a server config by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.get(id)
    }

    /// Add a server config.
    pub fn add(&mut self, config: ServerConfig) {
        self.servers.insert(config.id.clone(), config);
    }

    /// Remove a server config.
    pub fn remove(&mut self, id: &str) -> Option<ServerConfig> {
        self.servers.remove(id)
    }

    /// All server ids, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }
}
