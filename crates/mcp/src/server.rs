// MCP server: newline-delimited JSON-RPC over stdio
//
// Requests are read in order. `tools/call` runs on its own task so that a
// later `notifications/cancelled` can reach it; every other method is answered
// inline. Responses funnel through one writer task.

use crate::protocol::{
    CallToolParams, CallToolResult, CancelledParams, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo,
    ToolsCapability, PROTOCOL_VERSION,
};
use crate::registry::ConnectorRegistry;
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

pub struct McpServer {
    registry: ConnectorRegistry,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(registry: ConnectorRegistry, info: ServerInfo) -> Self {
        Self { registry, info }
    }

    pub async fn run_stdio(self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until the reader reaches EOF, then wait for in-flight calls.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(
            "{} MCP server ready ({} connectors)",
            self.info.name,
            self.registry.connector_count().await
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(async move {
            let mut sink = FramedWrite::new(writer, LinesCodec::new());
            while let Some(response) = rx.recv().await {
                sink.send(serde_json::to_string(&response)?).await?;
            }
            anyhow::Ok(())
        });

        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let in_flight: InFlight = Arc::default();
        let mut calls = JoinSet::new();

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("Dropping request longer than {} bytes", MAX_LINE_LENGTH);
                    let _ = tx.send(JsonRpcResponse::error(Value::Null, JsonRpcError::invalid_request()));
                    continue;
                }
                Err(LinesCodecError::Io(e)) => return Err(e.into()),
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(response) = self.handle_line(line, &tx, &in_flight, &mut calls).await {
                let _ = tx.send(response);
            }

            while let Some(finished) = calls.try_join_next() {
                if let Err(e) = finished {
                    error!("Tool call task failed: {}", e);
                }
            }
        }

        while let Some(finished) = calls.join_next().await {
            if let Err(e) = finished {
                error!("Tool call task failed: {}", e);
            }
        }

        drop(tx);
        writer_task.await??;
        info!("MCP server shutting down");
        Ok(())
    }

    async fn handle_line(
        &self,
        line: &str,
        tx: &mpsc::UnboundedSender<JsonRpcResponse>,
        in_flight: &InFlight,
        calls: &mut JoinSet<()>,
    ) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Unparseable request: {}", e);
                return Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error()));
            }
        };

        let request: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
            Ok(request) => request,
            Err(_) => {
                let id = raw.get("id").cloned().unwrap_or(Value::Null);
                return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request()));
            }
        };

        if request.jsonrpc != "2.0" {
            let id = request.id.unwrap_or(Value::Null);
            return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request()));
        }

        debug!(method = %request.method, "Received request");

        let Some(id) = request.id else {
            self.handle_notification(&request.method, request.params, in_flight);
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => self.initialize(id, request.params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                ListToolsResult {
                    tools: self.registry.list_tools().await,
                },
            ),
            "tools/call" => {
                let params = request
                    .params
                    .map(serde_json::from_value::<CallToolParams>);
                match params {
                    Some(Ok(params)) => {
                        self.spawn_call(id, params, tx, in_flight, calls);
                        return None;
                    }
                    Some(Err(e)) => JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params(format!("Invalid tools/call params: {}", e)),
                    ),
                    None => JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params("Missing tools/call params"),
                    ),
                }
            }
            method => JsonRpcResponse::error(id, JsonRpcError::method_not_found(method)),
        };
        Some(response)
    }

    fn initialize(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let client = params.and_then(|p| serde_json::from_value::<InitializeParams>(p).ok());
        if let Some(client) = &client {
            info!(
                "Client: {} v{} (protocol {})",
                client.client_info.name, client.client_info.version, client.protocol_version
            );
        }

        JsonRpcResponse::success(
            id,
            InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: false,
                    }),
                },
                server_info: self.info.clone(),
            },
        )
    }

    fn handle_notification(&self, method: &str, params: Option<Value>, in_flight: &InFlight) {
        match method {
            "notifications/cancelled" => {
                let Some(params) = params.and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
                else {
                    warn!("Ignoring malformed cancellation");
                    return;
                };
                let key = params.request_id.to_string();
                let token = in_flight.lock().ok().and_then(|calls| calls.get(&key).cloned());
                match token {
                    Some(token) => {
                        info!(request = %key, reason = ?params.reason, "Cancelling tool call");
                        token.cancel();
                    }
                    None => debug!(request = %key, "Cancellation for unknown or finished request"),
                }
            }
            other => debug!(method = other, "Notification ignored"),
        }
    }

    fn spawn_call(
        &self,
        id: Value,
        params: CallToolParams,
        tx: &mpsc::UnboundedSender<JsonRpcResponse>,
        in_flight: &InFlight,
        calls: &mut JoinSet<()>,
    ) {
        let key = id.to_string();
        let token = CancellationToken::new();
        if let Ok(mut map) = in_flight.lock() {
            map.insert(key.clone(), token.clone());
        }

        let registry = self.registry.clone();
        let tx = tx.clone();
        let in_flight = in_flight.clone();
        calls.spawn(async move {
            let invocation = registry.call(&params.name, params.arguments, token).await;
            if let Ok(mut map) = in_flight.lock() {
                map.remove(&key);
            }
            let _ = tx.send(JsonRpcResponse::success(id, CallToolResult::from(invocation)));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use std::time::Duration;
    use switchboard_core::schema::json_schema_object;
    use switchboard_core::{
        ConnectorDescriptor, ExecutionContext, Tool, ToolDefinition, ToolOutput, ToolResult,
    };
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf};
    use tokio::io::DuplexStream;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "Return the arguments".to_string(),
                input_schema: json_schema_object(
                    json!({"message": {"type": "string"}}),
                    vec!["message"],
                ),
            }
        }

        fn action(&self) -> &str {
            "echo"
        }

        async fn execute(&self, args: Value, _ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
            Ok(ToolOutput::Json(args))
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".to_string(),
                description: "Never finishes on its own".to_string(),
                input_schema: json_schema_object(json!({}), vec![]),
            }
        }

        fn action(&self) -> &str {
            "wait"
        }

        async fn execute(&self, _args: Value, _ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::text("done"))
        }
    }

    struct Client {
        writer: WriteHalf<DuplexStream>,
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        server: tokio::task::JoinHandle<Result<()>>,
    }

    impl Client {
        async fn send(&mut self, message: Value) {
            let mut line = message.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn send_raw(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("response timed out")
                .unwrap()
                .expect("server closed the stream");
            serde_json::from_str(&line).unwrap()
        }
    }

    async fn start() -> Client {
        let registry = ConnectorRegistry::new();
        let descriptor = ConnectorDescriptor::builder("test")
            .name("Test")
            .version("0.1.0")
            .credentials_schema(json_schema_object(json!({}), vec![]))
            .setup_schema(json_schema_object(json!({}), vec![]))
            .tool(EchoTool)
            .tool(SlowTool)
            .define()
            .unwrap();
        registry
            .register(descriptor, ConnectorConfig::default())
            .await
            .unwrap();

        let server = McpServer::new(
            registry,
            ServerInfo {
                name: "switchboard".to_string(),
                version: "0.1.0".to_string(),
            },
        );

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (client_read, client_write) = tokio::io::split(client_io);

        Client {
            writer: client_write,
            lines: BufReader::new(client_read).lines(),
            server: tokio::spawn(server.serve(server_read, server_write)),
        }
    }

    #[tokio::test]
    async fn test_initialize_and_list_tools() {
        let mut client = start().await;

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0"}
                }
            }))
            .await;
        let init = client.recv().await;
        assert_eq!(init["id"], 1);
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(init["result"]["serverInfo"]["name"], "switchboard");
        assert_eq!(init["result"]["capabilities"]["tools"]["listChanged"], false);

        client
            .send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await;
        let list = client.recv().await;
        let names: Vec<&str> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["test.echo", "test.slow"]);
        assert_eq!(list["result"]["tools"][0]["inputSchema"]["required"], json!(["message"]));
    }

    #[tokio::test]
    async fn test_tools_call_success_and_error() {
        let mut client = start().await;

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": "a",
                "method": "tools/call",
                "params": {"name": "test.echo", "arguments": {"message": "hi"}}
            }))
            .await;
        let ok = client.recv().await;
        assert_eq!(ok["id"], "a");
        assert_eq!(ok["result"]["content"][0]["text"], "{\"message\":\"hi\"}");
        assert!(ok["result"].get("isError").is_none());

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": "b",
                "method": "tools/call",
                "params": {"name": "test.echo", "arguments": {}}
            }))
            .await;
        let failed = client.recv().await;
        assert_eq!(failed["result"]["isError"], true);
        assert_eq!(
            failed["result"]["content"][0]["text"],
            "Failed to echo: Invalid arguments: `message`: required field is missing"
        );
        assert_eq!(failed["result"]["_meta"]["errorKind"], "validation");
        assert_eq!(failed["result"]["_meta"]["retryable"], false);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_call() {
        let mut client = start().await;

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "tools/call",
                "params": {"name": "test.slow"}
            }))
            .await;
        client
            .send(json!({
                "jsonrpc": "2.0",
                "method": "notifications/cancelled",
                "params": {"requestId": 7, "reason": "user aborted"}
            }))
            .await;

        let cancelled = client.recv().await;
        assert_eq!(cancelled["id"], 7);
        assert_eq!(cancelled["result"]["isError"], true);
        assert_eq!(
            cancelled["result"]["content"][0]["text"],
            "Failed to wait: Operation cancelled"
        );
        assert_eq!(cancelled["result"]["_meta"]["errorKind"], "cancelled");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let mut client = start().await;

        client.send_raw("{not json").await;
        let parse = client.recv().await;
        assert_eq!(parse["id"], Value::Null);
        assert_eq!(parse["error"]["code"], -32700);

        client
            .send(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
            .await;
        let unknown = client.recv().await;
        assert_eq!(unknown["error"]["code"], -32601);
        assert_eq!(unknown["error"]["message"], "Method not found: resources/list");

        client
            .send(json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call"}))
            .await;
        let missing = client.recv().await;
        assert_eq!(missing["error"]["code"], -32602);

        client
            .send(json!({"jsonrpc": "1.0", "id": 5, "method": "ping"}))
            .await;
        let version = client.recv().await;
        assert_eq!(version["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let mut client = start().await;

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": 9, "method": "ping"}))
            .await;

        let pong = client.recv().await;
        assert_eq!(pong["id"], 9);
        assert_eq!(pong["result"], json!({}));
    }

    #[tokio::test]
    async fn test_eof_waits_for_calls_then_stops() {
        let mut client = start().await;

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "test.echo", "arguments": {"message": "last"}}
            }))
            .await;
        client.writer.shutdown().await.unwrap();

        let response = client.recv().await;
        assert_eq!(response["result"]["content"][0]["text"], "{\"message\":\"last\"}");

        let Client { server, mut lines, .. } = client;
        server.await.unwrap().unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
