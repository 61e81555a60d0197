// Tool invocation pipeline: validate, execute, shape.
//
// Nothing escapes this boundary. Validation errors, handler errors, panics and
// cancellation all come back as an Invocation whose text starts with
// "Failed to <action>: ".

use crate::context::ExecutionContext;
use crate::error::{ErrorKind, ToolError, ToolResult};
use crate::schema;
use crate::tool::{Tool, ToolContent, ToolDefinition, ToolOutput};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

/// Structured description of a failed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub retryable: bool,
}

/// What the host receives for every tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
}

impl Invocation {
    pub fn success(output: ToolOutput) -> Self {
        Self {
            content: output.into_content(),
            error: None,
        }
    }

    pub fn failure(action: &str, error: &ToolError) -> Self {
        Self {
            content: vec![ToolContent::text(format!("Failed to {}: {}", action, error))],
            error: Some(InvocationError {
                kind: error.kind(),
                status: error.status(),
                retryable: error.is_retryable(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Single-string form of the result.
    ///
    /// Text parts are joined with newlines; image parts are rendered as the
    /// `{data, mimeType}` blob JSON.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|part| match part {
                ToolContent::Text { text } => text.clone(),
                ToolContent::Image { data, mime_type } => {
                    serde_json::json!({ "data": data, "mimeType": mime_type }).to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse the text form as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.text()).ok()
    }
}

/// Run `tool` with raw, unvalidated arguments.
pub async fn invoke(tool: &dyn Tool, args: Value, ctx: &dyn ExecutionContext) -> Invocation {
    let definition = tool.definition();
    let started = Instant::now();

    tracing::info!(tool = %definition.name, "Invoking tool");

    let outcome = AssertUnwindSafe(run(tool, &definition, args, ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(ToolError::internal("Tool handler panicked")));

    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(output) => {
            tracing::info!(tool = %definition.name, elapsed_ms, "Tool completed");
            Invocation::success(output)
        }
        Err(error) => {
            tracing::warn!(
                tool = %definition.name,
                kind = %error.kind(),
                elapsed_ms,
                "Tool failed: {}",
                error
            );
            Invocation::failure(tool.action(), &error)
        }
    }
}

async fn run(
    tool: &dyn Tool,
    definition: &ToolDefinition,
    args: Value,
    ctx: &dyn ExecutionContext,
) -> ToolResult<ToolOutput> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };

    // Must happen before the handler touches credentials or the network.
    schema::validate(&definition.input_schema, &args)?;

    let cancel = ctx.cancellation();
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        result = tool.execute(args, ctx) => result,
    }
}
