//! Periscope MCP - transports, notification pipeline and sessions for an
//! interactive MCP inspector.
//!
//! This crate provides:
//! - One connect/discover/call/disconnect contract over three transports
//!   (spawned process, streamable HTTP, legacy SSE)
//! - A notification bridge turning every server push into a canonical
//!   [`Notification`] without ever blocking a transport
//! - A router that records pushes, debounces list-changed bursts into single
//!   refreshes and decides which refreshes deserve a toast
//! - A bounded history of raw protocol traffic
//!
//! # Architecture
//!
//! ```text
//! transport ──push──> NotificationBridge ──bounded channel──> NotificationRouter
//!                                                               ├─> InteractionRecorder
//!                                                               ├─> AutoRefreshController ──> toast policy
//!                                                               └─> UI log
//! ```
//!
//! The wire protocol itself is handled by the official `rmcp` SDK.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use periscope_mcp::{ActionTarget, Inspector, InspectorSettings, ServerConfig, UiEvent};
//!
//! # async fn example() -> Result<(), periscope_mcp::McpError> {
//! let inspector = Inspector::new(InspectorSettings::default());
//! inspector.subscribe(
//!     "filesystem",
//!     Arc::new(|event: &UiEvent| println!("{event:?}")),
//! );
//!
//! inspector
//!     .connect(
//!         ServerConfig::stdio("filesystem", "npx")
//!             .with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]),
//!     )
//!     .await?;
//!
//! for tool in inspector.list_tools("filesystem").await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let target = ActionTarget::Tool("read_file".into());
//! let form = inspector.form_for("filesystem", &target).await?;
//! form.mount_all();
//! form.set_value("path", "/tmp/test.txt").ok();
//! let result = inspector.execute_form("filesystem", &target, &form).await?;
//! println!("{result:?}");
//!
//! inspector.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bridge;
mod config;
mod connection;
mod error;
mod handler;
mod inspector;
mod notification;
mod recorder;
mod refresh;
mod router;
mod session;
mod toast;
mod transport;
mod types;

pub mod preview;
pub mod templates;

pub use bridge::{NotificationBridge, RawPush};
pub use config::{HISTORY_CAPACITY, InspectorSettings, ServerConfig, ServersConfig, TransportKind};
pub use connection::{ConnectionState, ServerConnection};
pub use error::{ErrorKind, McpError, McpResult};
pub use handler::PeriscopeClientHandler;
pub use inspector::{ActionTarget, DiscoveryCache, ExecutionResult, Inspector};
pub use notification::{DISCONNECTED_METHOD, ListKind, Notification, NotificationKind, is_push};
pub use recorder::{Direction, InteractionRecord, InteractionRecorder};
pub use refresh::{AutoRefreshController, ListRefresher, RefreshOutcome, RefreshState};
pub use router::{ConnectionDirectory, EventCallback, NotificationRouter, SubscriptionId, UiEvent};
pub use session::ServerSession;
pub use toast::{Tab, Toast, ToastLevel, suppress};
pub use transport::{SseDecoder, SseEvent};
pub use types::{
    ContentBlock, PromptArgument, PromptContent, PromptDefinition, PromptMessage, ResourceContent,
    ResourceDefinition, ResourceListing, ResourceTemplateDefinition, Root, ServerCapabilities,
    ServerInfo, ToolDefinition, ToolResult,
};
