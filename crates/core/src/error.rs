//! Error taxonomy shared by every connector.
//!
//! Handlers return [`ToolResult`] all the way down. The invocation pipeline
//! is the only place an error is turned into text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result type for connector operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors raised while validating, configuring or executing a tool.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// Arguments did not match the tool's input schema.
    #[error("Invalid arguments: {0}")]
    Validation(String),

    /// Missing or malformed credentials/setup, or a bad connector declaration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Upstream API answered with a non-2xx status.
    #[error("HTTP {status} {status_text}{}", detail_suffix(.detail))]
    Upstream {
        status: u16,
        status_text: String,
        detail: Option<String>,
        body: Option<Value>,
    },

    /// Upstream API rejected the credentials (401/403).
    #[error("Authentication failed with HTTP {status} {status_text}{}", detail_suffix(.detail))]
    Authentication {
        status: u16,
        status_text: String,
        detail: Option<String>,
    },

    /// Request never produced a response (DNS, TLS, connection reset, timeout).
    #[error("Request failed: {0}")]
    Transport(String),

    /// The host cancelled the invocation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Anything else, e.g. an upstream body that could not be decoded.
    #[error("{0}")]
    Internal(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) if !d.is_empty() => format!(": {}", d),
        _ => String::new(),
    }
}

/// Machine-readable error discriminant reported next to the text result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Configuration,
    Upstream,
    Authentication,
    Transport,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Transport => "transport",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const MAX_DETAIL_LEN: usize = 300;

impl ToolError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Build an error from a non-2xx response.
    ///
    /// 401 and 403 become [`ToolError::Authentication`]. A JSON body is kept
    /// and its most likely message field is surfaced as the detail.
    pub fn from_status(status: u16, status_text: &str, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let detail = match &parsed {
            Some(json) => vendor_message(json).or_else(|| truncate(&json.to_string())),
            None => truncate(body.trim()),
        };

        if status == 401 || status == 403 {
            Self::Authentication {
                status,
                status_text: status_text.to_string(),
                detail,
            }
        } else {
            Self::Upstream {
                status,
                status_text: status_text.to_string(),
                detail,
                body: parsed,
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status of the upstream response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } | Self::Authentication { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether invoking the tool again unchanged could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", e))
    }
}

/// Pull a human message out of the usual vendor error envelopes.
fn vendor_message(json: &Value) -> Option<String> {
    let candidates = [
        json.get("message"),
        json.get("detail"),
        json.get("error_description"),
        json.get("error").and_then(|e| e.get("message")),
        json.get("error"),
        json.get("meta").and_then(|m| m.get("error")),
        json.get("errors")
            .and_then(|e| e.get(0))
            .and_then(|e| e.get("message").or_else(|| e.get("detail"))),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .and_then(|s| truncate(&s))
}

fn truncate(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    if text.chars().count() <= MAX_DETAIL_LEN {
        return Some(text.to_string());
    }
    let mut cut: String = text.chars().take(MAX_DETAIL_LEN).collect();
    cut.push_str("...");
    Some(cut)
}
