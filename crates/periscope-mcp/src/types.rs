//! Discovery and result types shown by the inspector.
//!
//! These are owned, serializable views over the rmcp model so the
//! presentation layer never has to touch protocol types directly.

use rmcp::model::{self as rmcp_model, RawContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool offered by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Server id.
    pub server: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// JSON Schema for the arguments.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Convert an rmcp `Tool`.
    #[must_use]
    pub fn from_rmcp(tool: &rmcp_model::Tool, server: &str) -> Self {
        Self {
            name: tool.name.to_string(),
            server: server.to_string(),
            description: tool.description.as_deref().map(String::from),
            input_schema: Value::Object((*tool.input_schema).clone()),
        }
    }
}

/// A static resource offered by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: String,
    /// Server id.
    pub server: String,
    /// Human-readable name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// MIME type.
    pub mime_type: Option<String>,
}

impl ResourceDefinition {
    /// Convert an rmcp `Resource`.
    #[must_use]
    pub fn from_rmcp(resource: &rmcp_model::Resource, server: &str) -> Self {
        Self {
            uri: resource.uri.clone(),
            server: server.to_string(),
            name: resource.name.clone(),
            description: resource.description.clone(),
            mime_type: resource.mime_type.clone(),
        }
    }
}

/// A parameterized resource (`file:///{path}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplateDefinition {
    /// RFC 6570 style URI template.
    pub uri_template: String,
    /// Server id.
    pub server: String,
    /// Human-readable name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// MIME type of expanded resources.
    pub mime_type: Option<String>,
}

impl ResourceTemplateDefinition {
    /// Convert an rmcp `ResourceTemplate`.
    #[must_use]
    pub fn from_rmcp(template: &rmcp_model::ResourceTemplate, server: &str) -> Self {
        Self {
            uri_template: template.uri_template.clone(),
            server: server.to_string(),
            name: template.name.clone(),
            description: template.description.clone(),
            mime_type: template.mime_type.clone(),
        }
    }

    /// Parameter names in the template, in order.
    #[must_use]
    pub fn parameters(&self) -> Vec<String> {
        crate::templates::template_parameters(&self.uri_template)
    }
}

/// Static resources and templates discovered together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceListing {
    /// Static resources.
    pub resources: Vec<ResourceDefinition>,
    /// Resource templates.
    pub templates: Vec<ResourceTemplateDefinition>,
}

impl ResourceListing {
    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len().saturating_add(self.templates.len())
    }

    /// Whether the listing has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.templates.is_empty()
    }
}

/// One block of content in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image.
    Image {
        /// Base64 data.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Base64 audio.
    Audio {
        /// Base64 data.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Embedded resource.
    Resource(ResourceContent),
    /// Link to a resource the client may read separately.
    Link {
        /// Resource URI.
        uri: String,
        /// Resource name.
        name: String,
    },
}

impl ContentBlock {
    fn from_rmcp(content: &rmcp_model::Content) -> Self {
        match &**content {
            RawContent::Text(text) => Self::Text {
                text: text.text.clone(),
            },
            RawContent::Image(image) => Self::Image {
                data: image.data.clone(),
                mime_type: image.mime_type.clone(),
            },
            RawContent::Audio(audio) => Self::Audio {
                data: audio.data.clone(),
                mime_type: audio.mime_type.clone(),
            },
            RawContent::Resource(embedded) => {
                Self::Resource(ResourceContent::from_rmcp(&embedded.resource))
            },
            RawContent::ResourceLink(link) => Self::Link {
                uri: link.uri.clone(),
                name: link.name.clone(),
            },
        }
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content blocks.
    pub content: Vec<ContentBlock>,
    /// Structured output, if the tool declares an output schema.
    pub structured: Option<Value>,
    /// The tool reported failure in-band.
    pub is_error: bool,
}

impl ToolResult {
    /// Text blocks joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<rmcp_model::CallToolResult> for ToolResult {
    fn from(result: rmcp_model::CallToolResult) -> Self {
        Self {
            content: result.content.iter().map(ContentBlock::from_rmcp).collect(),
            structured: result.structured_content,
            is_error: result.is_error.unwrap_or(false),
        }
    }
}

/// Content of a read resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContent {
    /// Resource URI.
    pub uri: String,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Text body.
    pub text: Option<String>,
    /// Base64 body.
    pub blob: Option<String>,
}

impl ResourceContent {
    /// Convert rmcp `ResourceContents`.
    #[must_use]
    pub fn from_rmcp(contents: &rmcp_model::ResourceContents) -> Self {
        match contents {
            rmcp_model::ResourceContents::TextResourceContents {
                uri,
                mime_type,
                text,
                ..
            } => Self {
                uri: uri.clone(),
                mime_type: mime_type.clone(),
                text: Some(text.clone()),
                blob: None,
            },
            rmcp_model::ResourceContents::BlobResourceContents {
                uri,
                mime_type,
                blob,
                ..
            } => Self {
                uri: uri.clone(),
                mime_type: mime_type.clone(),
                text: None,
                blob: Some(blob.clone()),
            },
        }
    }

    /// Whether this content should be rendered as text.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.text.is_some() && self.mime_type.as_deref().is_none_or(crate::preview::is_text_mime)
    }

    /// Short single-line preview of text content.
    #[must_use]
    pub fn preview(&self) -> Option<String> {
        self.text.as_deref().map(crate::preview::text_preview)
    }
}

/// A prompt offered by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Prompt name.
    pub name: String,
    /// Server id.
    pub server: String,
    /// Description.
    pub description: Option<String>,
    /// Declared arguments.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl PromptDefinition {
    /// Convert an rmcp `Prompt`.
    #[must_use]
    pub fn from_rmcp(prompt: &rmcp_model::Prompt, server: &str) -> Self {
        Self {
            name: prompt.name.clone(),
            server: server.to_string(),
            description: prompt.description.clone(),
            arguments: prompt
                .arguments
                .iter()
                .flatten()
                .map(|a| PromptArgument {
                    name: a.name.clone(),
                    description: a.description.clone(),
                    required: a.required.unwrap_or(false),
                })
                .collect(),
        }
    }
}

/// A prompt argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Whether required.
    #[serde(default)]
    pub required: bool,
}

/// A rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptContent {
    /// Description of the prompt.
    pub description: Option<String>,
    /// Rendered messages.
    pub messages: Vec<PromptMessage>,
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// Text rendering of the content.
    pub content: String,
}

impl From<rmcp_model::GetPromptResult> for PromptContent {
    fn from(result: rmcp_model::GetPromptResult) -> Self {
        let messages = result
            .messages
            .iter()
            .map(|m| PromptMessage {
                role: match m.role {
                    rmcp_model::PromptMessageRole::User => "user".to_string(),
                    rmcp_model::PromptMessageRole::Assistant => "assistant".to_string(),
                },
                content: match &m.content {
                    rmcp_model::PromptMessageContent::Text { text } => text.clone(),
                    rmcp_model::PromptMessageContent::Image { image } => {
                        format!("[image {}]", image.mime_type)
                    },
                    rmcp_model::PromptMessageContent::Resource { resource } => {
                        resource.get_text()
                    },
                    rmcp_model::PromptMessageContent::ResourceLink { link } => {
                        format!("[link {}]", link.uri)
                    },
                },
            })
            .collect();
        Self {
            description: result.description,
            messages,
        }
    }
}

/// What the server said it supports during the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ServerCapabilities {
    /// Tools are offered.
    pub tools: bool,
    /// The server announces tool list changes.
    pub tools_list_changed: bool,
    /// Resources are offered.
    pub resources: bool,
    /// The server announces resource list changes.
    pub resources_list_changed: bool,
    /// Resource subscriptions are supported.
    pub resources_subscribe: bool,
    /// Prompts are offered.
    pub prompts: bool,
    /// The server announces prompt list changes.
    pub prompts_list_changed: bool,
    /// The server emits log messages.
    pub logging: bool,
}

impl ServerCapabilities {
    /// Convert rmcp `ServerCapabilities`.
    #[must_use]
    pub fn from_rmcp(caps: &rmcp_model::ServerCapabilities) -> Self {
        Self {
            tools: caps.tools.is_some(),
            tools_list_changed: caps
                .tools
                .as_ref()
                .and_then(|t| t.list_changed)
                .unwrap_or(false),
            resources: caps.resources.is_some(),
            resources_list_changed: caps
                .resources
                .as_ref()
                .and_then(|r| r.list_changed)
                .unwrap_or(false),
            resources_subscribe: caps
                .resources
                .as_ref()
                .and_then(|r| r.subscribe)
                .unwrap_or(false),
            prompts: caps.prompts.is_some(),
            prompts_list_changed: caps
                .prompts
                .as_ref()
                .and_then(|p| p.list_changed)
                .unwrap_or(false),
            logging: caps.logging.is_some(),
        }
    }
}

/// Server identity learned during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Name the server reports for itself.
    pub name: String,
    /// Version the server reports.
    pub version: String,
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Capabilities.
    pub capabilities: ServerCapabilities,
    /// Usage instructions.
    pub instructions: Option<String>,
}

impl ServerInfo {
    /// Convert an rmcp `InitializeResult`.
    #[must_use]
    pub fn from_rmcp(info: &rmcp_model::InitializeResult) -> Self {
        Self {
            name: info.server_info.name.clone(),
            version: info.server_info.version.clone(),
            protocol_version: info.protocol_version.to_string(),
            capabilities: ServerCapabilities::from_rmcp(&info.capabilities),
            instructions: info.instructions.clone(),
        }
    }
}

/// A filesystem or URI root exposed to servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Root URI (`file:///home/user/project`).
    pub uri: String,
    /// Optional display name.
    pub name: Option<String>,
}

impl Root {
    /// Create a root.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl From<Root> for rmcp_model::Root {
    fn from(root: Root) -> Self {
        Self {
            uri: root.uri,
            name: root.name,
        }
    }
}
