// Customer.io App API connector: transactional email, segments, exports

use crate::transport::{Auth, ClientConfig, HttpTransport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use switchboard_core::schema::{
    json_schema_enum, json_schema_integer, json_schema_object, json_schema_string,
};
use switchboard_core::{
    credentials_as, parse_args, setup_as, ConnectorDescriptor, ExecutionContext, Tool,
    ToolDefinition, ToolError, ToolOutput, ToolResult,
};

pub const KEY: &str = "customerio";

const US_API: &str = "https://api.customer.io";
const EU_API: &str = "https://api-eu.customer.io";

#[derive(Debug, Deserialize)]
struct Credentials {
    app_api_key: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Setup {
    #[serde(default)]
    pub region: Option<String>,
    /// Overrides the regional host, e.g. for a proxy.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Base URL for the App API. Only `region == "eu"` selects the EU host.
pub fn api_base_url(setup: &Setup) -> String {
    if let Some(endpoint) = setup.endpoint.as_deref().filter(|e| !e.is_empty()) {
        return endpoint.trim_end_matches('/').to_string();
    }
    match setup.region.as_deref() {
        Some("eu") => EU_API.to_string(),
        _ => US_API.to_string(),
    }
}

pub fn connector() -> ToolResult<ConnectorDescriptor> {
    ConnectorDescriptor::builder(KEY)
        .name("Customer.io")
        .version("1.0.0")
        .logo("https://customer.io/favicon.ico")
        .description("Send transactional email and work with segments and exports")
        .credentials_schema(json_schema_object(
            json!({ "app_api_key": json_schema_string("App API key (Settings > API Credentials)") }),
            vec!["app_api_key"],
        ))
        .setup_schema(json_schema_object(
            json!({
                "region": json_schema_enum(&["us", "eu"], "Account data center (default: us)"),
                "endpoint": json_schema_string("Override the API base URL")
            }),
            vec![],
        ))
        .tool(SendEmailTool)
        .tool(ListSegmentsTool)
        .tool(CreateExportTool)
        .tool(GetExportTool)
        .tool(DownloadExportTool)
        .define()
}

/// App API client bound to one account's key and region.
pub struct CustomerIoClient {
    http: HttpTransport,
}

impl CustomerIoClient {
    pub async fn from_context(ctx: &dyn ExecutionContext) -> ToolResult<Self> {
        let credentials: Credentials = credentials_as(ctx).await?;
        let setup: Setup = setup_as(ctx).await?;
        let config = ClientConfig::new(&api_base_url(&setup), Auth::Bearer(credentials.app_api_key))?;
        Ok(Self {
            http: HttpTransport::new(config)?,
        })
    }

    pub async fn send_email(&self, request: &SendEmailRequest) -> ToolResult<Value> {
        self.http.post("/v1/send/email", request).await
    }

    pub async fn list_segments(&self) -> ToolResult<Value> {
        self.http.get("/v1/segments").await
    }

    pub async fn create_export(&self, filters: &Value) -> ToolResult<Value> {
        self.http
            .post("/v1/exports/customers", &json!({ "filters": filters }))
            .await
    }

    pub async fn get_export(&self, export_id: u64) -> ToolResult<Value> {
        self.http.get(&format!("/v1/exports/{}", export_id)).await
    }

    pub async fn export_download_url(&self, export_id: u64) -> ToolResult<String> {
        let link: DownloadLink = self
            .http
            .get(&format!("/v1/exports/{}/download", export_id))
            .await?;
        link.url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ToolError::internal(format!("Export {} has no download URL yet", export_id)))
    }

    pub async fn download(&self, url: &str) -> ToolResult<ToolOutput> {
        let response = self.http.fetch(url).await?;
        Ok(response.body.into_output())
    }
}

#[derive(Debug, Default, Deserialize)]
struct DownloadLink {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendEmailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactional_message_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_data: Option<Map<String, Value>>,
    pub identifiers: Identifiers,
}

#[derive(Debug, Serialize)]
pub struct Identifiers {
    pub email: String,
}

/// Send a transactional email.
pub struct SendEmailTool;

#[derive(Debug, Deserialize)]
struct SendEmailArgs {
    to: String,
    subject: String,
    body: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    transactional_message_id: Option<Value>,
    #[serde(default)]
    message_data: Option<Map<String, Value>>,
}

#[async_trait::async_trait]
impl Tool for SendEmailTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "send_email".to_string(),
            description: "Send a transactional email to a single recipient".to_string(),
            input_schema: json_schema_object(
                json!({
                    "to": { "type": "string", "format": "email", "description": "Recipient address" },
                    "subject": { "type": "string", "minLength": 1, "description": "Subject line" },
                    "body": { "type": "string", "minLength": 1, "description": "HTML body" },
                    "from": { "type": "string", "description": "Sender address (defaults to the workspace sender)" },
                    "transactional_message_id": {
                        "type": ["string", "integer"],
                        "description": "Template to render instead of subject/body"
                    },
                    "message_data": { "type": "object", "description": "Liquid data for the template" }
                }),
                vec!["to", "subject", "body"],
            ),
        }
    }

    fn action(&self) -> &str {
        "send email"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: SendEmailArgs = parse_args(args)?;
        let client = CustomerIoClient::from_context(ctx).await?;

        let request = SendEmailRequest {
            identifiers: Identifiers {
                email: args.to.clone(),
            },
            to: args.to,
            subject: args.subject,
            body: args.body,
            from: args.from,
            transactional_message_id: args.transactional_message_id,
            message_data: args.message_data,
        };

        Ok(ToolOutput::Json(client.send_email(&request).await?))
    }
}

/// List every segment in the workspace.
pub struct ListSegmentsTool;

#[async_trait::async_trait]
impl Tool for ListSegmentsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_segments".to_string(),
            description: "List all segments in the workspace".to_string(),
            input_schema: json_schema_object(json!({}), vec![]),
        }
    }

    fn action(&self) -> &str {
        "list segments"
    }

    async fn execute(&self, _args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let client = CustomerIoClient::from_context(ctx).await?;
        Ok(ToolOutput::Json(client.list_segments().await?))
    }
}

/// Start a customer export.
pub struct CreateExportTool;

#[derive(Debug, Deserialize)]
struct CreateExportArgs {
    filters: Value,
}

#[async_trait::async_trait]
impl Tool for CreateExportTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_export".to_string(),
            description: "Start exporting customers that match the given filters. \
                Poll get_export with the returned export id."
                .to_string(),
            input_schema: json_schema_object(
                json!({
                    "filters": {
                        "type": "object",
                        "description": "Customer.io audience filter, e.g. {\"segment\": {\"id\": 4}}"
                    }
                }),
                vec!["filters"],
            ),
        }
    }

    fn action(&self) -> &str {
        "create export"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: CreateExportArgs = parse_args(args)?;
        let client = CustomerIoClient::from_context(ctx).await?;
        Ok(ToolOutput::Json(client.create_export(&args.filters).await?))
    }
}

#[derive(Debug, Deserialize)]
struct ExportArgs {
    export_id: u64,
}

fn export_id_schema() -> Value {
    json_schema_object(
        json!({ "export_id": json_schema_integer("Export id returned by create_export", Some(1), None) }),
        vec!["export_id"],
    )
}

/// Check the status of an export.
pub struct GetExportTool;

#[async_trait::async_trait]
impl Tool for GetExportTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_export".to_string(),
            description: "Get the status of an export".to_string(),
            input_schema: export_id_schema(),
        }
    }

    fn action(&self) -> &str {
        "get export"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: ExportArgs = parse_args(args)?;
        let client = CustomerIoClient::from_context(ctx).await?;
        Ok(ToolOutput::Json(client.get_export(args.export_id).await?))
    }
}

/// Download a finished export: resolve the signed link, then fetch it.
pub struct DownloadExportTool;

#[async_trait::async_trait]
impl Tool for DownloadExportTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "download_export".to_string(),
            description: "Download the file of a completed export".to_string(),
            input_schema: export_id_schema(),
        }
    }

    fn action(&self) -> &str {
        "download export"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: ExportArgs = parse_args(args)?;
        let client = CustomerIoClient::from_context(ctx).await?;
        let url = client.export_download_url(args.export_id).await?;
        client.download(&url).await
    }
}
