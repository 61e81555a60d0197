// Tool definitions, handler trait and result shaping

use crate::context::ExecutionContext;
use crate::error::{ToolError, ToolResult};
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discovery metadata for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Tool handler.
///
/// `execute` only ever sees arguments that already passed the input schema,
/// so implementations deserialize them with [`parse_args`] and trust the shape.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Verb phrase for failure messages: "Failed to <action>: ...".
    fn action(&self) -> &str;

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput>;
}

/// Deserialize validated arguments into the handler's argument struct.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> ToolResult<T> {
    serde_json::from_value(args).map_err(|e| ToolError::validation(e.to_string()))
}

/// One part of a tool result as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Base64 payload plus its content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryBlob {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl BinaryBlob {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    pub fn decode(&self) -> ToolResult<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| ToolError::internal(format!("Invalid base64 payload: {}", e)))
    }
}

/// Successful handler output, before it is flattened into content parts.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Upstream JSON passed through verbatim.
    Json(Value),
    /// Human-readable summary.
    Text(String),
    /// Binary payload.
    Blob(BinaryBlob),
    /// Already shaped multi-part content.
    Content(Vec<ToolContent>),
}

impl ToolOutput {
    pub fn json(value: impl Serialize) -> ToolResult<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn into_content(self) -> Vec<ToolContent> {
        match self {
            Self::Json(value) => vec![ToolContent::text(value.to_string())],
            Self::Text(text) => vec![ToolContent::text(text)],
            Self::Blob(blob) if blob.mime_type.starts_with("image/") => vec![ToolContent::Image {
                data: blob.data,
                mime_type: blob.mime_type,
            }],
            Self::Blob(blob) => {
                let text = serde_json::to_string(&blob).unwrap_or_default();
                vec![ToolContent::text(text)]
            }
            Self::Content(parts) => parts,
        }
    }
}
