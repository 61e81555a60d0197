// Orchestrator connector: batches of tool calls across every registered connector

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use switchboard_core::batch::{DEFAULT_MAX_CONCURRENT, MAX_CONCURRENT_LIMIT};
use switchboard_core::schema::{json_schema_boolean, json_schema_integer, json_schema_object};
use switchboard_core::{
    parse_args, BatchExecutor, BatchOptions, BatchStep, ConnectorDescriptor, ExecutionContext,
    Tool, ToolDefinition, ToolDispatcher, ToolError, ToolOutput, ToolResult,
};

pub const KEY: &str = "orchestrator";

/// The orchestrator needs no secrets; both schemas accept an empty object.
pub fn connector(dispatcher: Arc<dyn ToolDispatcher>) -> ToolResult<ConnectorDescriptor> {
    ConnectorDescriptor::builder(KEY)
        .name("Orchestrator")
        .version("1.0.0")
        .description("Run several tool calls in one request and discover available tools")
        .credentials_schema(json_schema_object(json!({}), vec![]))
        .setup_schema(json_schema_object(json!({}), vec![]))
        .tool(ExecuteBatchTool {
            executor: BatchExecutor::new(dispatcher.clone()),
        })
        .tool(ListAvailableToolsTool { dispatcher })
        .define()
}

fn step_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "connector": { "type": "string", "minLength": 1, "description": "Connector key, e.g. \"sentry\"" },
            "tool": { "type": "string", "minLength": 1, "description": "Tool name within the connector" },
            "args": { "type": "object", "description": "Tool arguments" },
            "order": { "type": "integer", "description": "Execution order (default: position in the list)" },
            "dependsOn": {
                "type": "array",
                "items": { "type": "integer", "minimum": 1 },
                "description": "1-based step numbers that must have completed earlier"
            },
            "outputMapping": {
                "type": "object",
                "description": "Map \"<step>.<field>\" of an earlier result to an argument of this step"
            }
        },
        "required": ["connector", "tool"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteBatchArgs {
    steps: Vec<BatchStep>,
    #[serde(default)]
    max_concurrent: Option<usize>,
    #[serde(default)]
    continue_on_error: Option<bool>,
}

/// Runs a list of steps in bounded-concurrency chunks.
pub struct ExecuteBatchTool {
    executor: BatchExecutor,
}

#[async_trait::async_trait]
impl Tool for ExecuteBatchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "execute_batch".to_string(),
            description: "Execute several tool calls, in chunks of up to maxConcurrent at a time. \
                Failed steps are reported and, unless continueOnError is false, do not stop the batch."
                .to_string(),
            input_schema: json_schema_object(
                json!({
                    "steps": {
                        "type": "array",
                        "items": step_schema(),
                        "minItems": 1,
                        "description": "Tool calls to run"
                    },
                    "maxConcurrent": json_schema_integer(
                        "Steps run at the same time (default: 3)",
                        Some(1),
                        Some(MAX_CONCURRENT_LIMIT as i64)
                    ),
                    "continueOnError": json_schema_boolean("Keep going after a failed step (default: true)")
                }),
                vec!["steps"],
            ),
        }
    }

    fn action(&self) -> &str {
        "execute batch"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: ExecuteBatchArgs = parse_args(args)?;

        if let Some(position) = args.steps.iter().position(|s| s.connector == KEY) {
            return Err(ToolError::validation(format!(
                "Step {} targets the orchestrator itself, which cannot be nested",
                position + 1
            )));
        }

        let options = BatchOptions {
            max_concurrent: args.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT),
            continue_on_error: args.continue_on_error.unwrap_or(true),
        };

        let report = self
            .executor
            .execute(args.steps, options, ctx.cancellation())
            .await?;

        let summary = report.summary();
        let mut value = serde_json::to_value(&report)?;
        if let Value::Object(fields) = &mut value {
            fields.insert("summary".to_string(), Value::String(summary));
        }
        Ok(ToolOutput::Json(value))
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsArgs {
    #[serde(default)]
    connector: Option<String>,
}

/// Catalog of every tool the batch executor can reach.
pub struct ListAvailableToolsTool {
    dispatcher: Arc<dyn ToolDispatcher>,
}

#[async_trait::async_trait]
impl Tool for ListAvailableToolsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_available_tools".to_string(),
            description: "List the connectors and tools that execute_batch can call".to_string(),
            input_schema: json_schema_object(
                json!({ "connector": { "type": "string", "description": "Only list this connector's tools" } }),
                vec![],
            ),
        }
    }

    fn action(&self) -> &str {
        "list available tools"
    }

    async fn execute(&self, args: Value, _ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: ListToolsArgs = parse_args(args)?;

        let mut tools = self.dispatcher.catalog().await;
        tools.retain(|entry| entry.connector != KEY);
        if let Some(connector) = args.connector.as_deref() {
            tools.retain(|entry| entry.connector == connector);
            if tools.is_empty() {
                return Err(ToolError::validation(format!("Unknown connector `{}`", connector)));
            }
        }

        Ok(ToolOutput::Json(json!({
            "count": tools.len(),
            "tools": tools,
        })))
    }
}
