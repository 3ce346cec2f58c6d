//! Prelude module - commonly used types for convenient import.
//!
//! Use `use periscope_mcp::prelude::*;` to import all essential types.

// Errors
pub use crate::{ErrorKind, McpError, McpResult};

// Configuration
pub use crate::{InspectorSettings, ServerConfig, ServersConfig, TransportKind};

// Connections
pub use crate::{ConnectionState, Inspector, ServerConnection, ServerSession};

// Notifications
pub use crate::{ListKind, Notification, NotificationKind, Tab, UiEvent};

// Actions
pub use crate::{ActionTarget, ExecutionResult};

// Discovery types
pub use crate::{
    PromptDefinition, ResourceContent, ResourceDefinition, ResourceTemplateDefinition, Root,
    ServerCapabilities, ToolDefinition, ToolResult,
};
