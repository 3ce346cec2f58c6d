//! Error types for inspector operations.

use thiserror::Error;

/// Errors that can occur while inspecting MCP servers.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server could not be reached or spawned, or the handshake failed.
    #[error("Failed to connect to {server}: {reason}")]
    Connect {
        /// Server id.
        server: String,
        /// Reason for failure.
        reason: String,
    },

    /// The server sent something we could not make sense of.
    #[error("Protocol error from {server}: {reason}")]
    Protocol {
        /// Server id.
        server: String,
        /// Description of the problem.
        reason: String,
    },

    /// The server rejected a tool call.
    #[error("Tool {tool} failed on {server}: {message}")]
    Tool {
        /// Server id.
        server: String,
        /// Tool name.
        tool: String,
        /// Server-reported message.
        message: String,
    },

    /// The server rejected a resource read.
    #[error("Resource {uri} failed on {server}: {message}")]
    Resource {
        /// Server id.
        server: String,
        /// Resource URI.
        uri: String,
        /// Server-reported message.
        message: String,
    },

    /// The server rejected a prompt request.
    #[error("Prompt {prompt} failed on {server}: {message}")]
    Prompt {
        /// Server id.
        server: String,
        /// Prompt name.
        prompt: String,
        /// Server-reported message.
        message: String,
    },

    /// A roots operation was rejected.
    #[error("Roots error on {server}: {message}")]
    Root {
        /// Server id.
        server: String,
        /// Description of the problem.
        message: String,
    },

    /// The transport went away underneath us.
    #[error("Transport failure on {server}: {reason}")]
    TransportFailure {
        /// Server id.
        server: String,
        /// What happened.
        reason: String,
    },

    /// The call was interrupted because the connection was closed locally.
    #[error("Disconnected from {server}")]
    Disconnected {
        /// Server id.
        server: String,
    },

    /// No server with this id is known.
    #[error("MCP server not found: {server}")]
    ServerNotFound {
        /// Server id.
        server: String,
    },

    /// The server is known but has no live connection.
    #[error("MCP server not connected: {server}")]
    NotConnected {
        /// Server id.
        server: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The action target cannot be executed as given.
    #[error("Invalid action target: {0}")]
    InvalidTarget(String),
}

/// Coarse classification of [`McpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad config, unreachable endpoint, spawn or handshake failure.
    Connect,
    /// Malformed or unexpected response.
    Protocol,
    /// Server-reported failure of a tool, resource, prompt or roots request.
    Application,
    /// Abrupt disconnect.
    Transport,
    /// Locally closed connection.
    Disconnected,
    /// Lookup, config or argument problems on our side.
    Usage,
}

impl McpError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect { .. } => ErrorKind::Connect,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Tool { .. } | Self::Resource { .. } | Self::Prompt { .. } | Self::Root { .. } => {
                ErrorKind::Application
            },
            Self::TransportFailure { .. } => ErrorKind::Transport,
            Self::Disconnected { .. } => ErrorKind::Disconnected,
            Self::ServerNotFound { .. }
            | Self::NotConnected { .. }
            | Self::ConfigError(_)
            | Self::IoError(_)
            | Self::InvalidTarget(_) => ErrorKind::Usage,
        }
    }

    /// Whether this error moves the connection to `Failed`.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connect | ErrorKind::Transport)
    }

    /// Server id this error refers to, if any.
    #[must_use]
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Connect { server, .. }
            | Self::Protocol { server, .. }
            | Self::Tool { server, .. }
            | Self::Resource { server, .. }
            | Self::Prompt { server, .. }
            | Self::Root { server, .. }
            | Self::TransportFailure { server, .. }
            | Self::Disconnected { server }
            | Self::ServerNotFound { server }
            | Self::NotConnected { server } => Some(server),
            Self::ConfigError(_) | Self::IoError(_) | Self::InvalidTarget(_) => None,
        }
    }
}

/// How an rmcp request failed, before server context is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServiceFailure {
    /// The server answered with a JSON-RPC error.
    Application(String),
    /// The transport is closed.
    Closed(String),
    /// Anything else the service reports.
    Protocol(String),
}

impl From<rmcp::ServiceError> for ServiceFailure {
    fn from(err: rmcp::ServiceError) -> Self {
        match err {
            rmcp::ServiceError::McpError(data) => Self::Application(data.message.to_string()),
            rmcp::ServiceError::TransportClosed => Self::Closed("transport closed".to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Result type for inspector operations.
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connect_and_transport_are_fatal() {
        let connect = McpError::Connect {
            server: "fs".into(),
            reason: "spawn failed".into(),
        };
        let transport = McpError::TransportFailure {
            server: "fs".into(),
            reason: "process exited".into(),
        };
        let tool = McpError::Tool {
            server: "fs".into(),
            tool: "read".into(),
            message: "no such file".into(),
        };
        let disconnected = McpError::Disconnected { server: "fs".into() };

        assert!(connect.is_fatal());
        assert!(transport.is_fatal());
        assert!(!tool.is_fatal());
        assert!(!disconnected.is_fatal());
        assert_eq!(tool.kind(), ErrorKind::Application);
    }

    #[test]
    fn test_errors_render_server_context() {
        let err = McpError::Resource {
            server: "docs".into(),
            uri: "file:///a".into(),
            message: "denied".into(),
        };
        assert_eq!(err.to_string(), "Resource file:///a failed on docs: denied");
        assert_eq!(err.server(), Some("docs"));
        assert_eq!(McpError::InvalidTarget("x".into()).server(), None);
    }

    #[test]
    fn test_service_error_classification() {
        let app = rmcp::ServiceError::McpError(rmcp::ErrorData::invalid_params("bad path", None));
        assert_eq!(
            ServiceFailure::from(app),
            ServiceFailure::Application("bad path".to_string())
        );
        assert!(matches!(
            ServiceFailure::from(rmcp::ServiceError::TransportClosed),
            ServiceFailure::Closed(_)
        ));
    }
}
