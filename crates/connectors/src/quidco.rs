// Quidco connector: cookie session established by `login`, reused from the host cache

use crate::transport::{Auth, ClientConfig, HttpTransport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchboard_core::schema::{json_schema_empty, json_schema_integer, json_schema_object};
use switchboard_core::{
    credentials_as, parse_args, setup_as, ConnectorDescriptor, ExecutionContext, Tool,
    ToolDefinition, ToolError, ToolOutput, ToolResult,
};
use tracing::{info, warn};

pub const KEY: &str = "quidco";

/// Cache key holding the session cookie.
pub const SESSION_KEY: &str = "quidco:session";

pub const LOGIN_FIRST: &str = "Please login first using the login tool.";

const DEFAULT_BASE_URL: &str = "https://www.quidco.com";

#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct Setup {
    #[serde(default)]
    base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    cookie: String,
    email: String,
}

pub fn connector() -> ToolResult<ConnectorDescriptor> {
    ConnectorDescriptor::builder(KEY)
        .name("Quidco")
        .version("1.0.0")
        .logo("https://www.quidco.com/favicon.ico")
        .description("Search cashback merchants and check earnings on a Quidco account")
        .credentials_schema(json_schema_object(
            json!({
                "email": { "type": "string", "format": "email", "description": "Account email" },
                "password": { "type": "string", "minLength": 1, "description": "Account password" }
            }),
            vec!["email", "password"],
        ))
        .setup_schema(json_schema_object(
            json!({ "base_url": { "type": "string", "description": "Override the site URL" } }),
            vec![],
        ))
        .tool(LoginTool)
        .tool(SearchMerchantsTool)
        .tool(CashbackSummaryTool)
        .tool(LogoutTool)
        .define()
}

async fn base_url(ctx: &dyn ExecutionContext) -> ToolResult<String> {
    let setup: Setup = setup_as(ctx).await?;
    Ok(setup
        .base_url
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()))
}

/// Cached session, if any. Unreadable cache entries count as a miss.
async fn cached_session(ctx: &dyn ExecutionContext) -> ToolResult<Option<Session>> {
    let Some(raw) = ctx.read_cache(SESSION_KEY).await? else {
        return Ok(None);
    };
    Ok(serde_json::from_value(raw).ok())
}

async fn session_client(ctx: &dyn ExecutionContext, session: Session) -> ToolResult<HttpTransport> {
    let config = ClientConfig::new(&base_url(ctx).await?, Auth::Cookie(session.cookie))?;
    HttpTransport::new(config)
}

/// Log in and cache the session cookie.
pub struct LoginTool;

#[async_trait::async_trait]
impl Tool for LoginTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "login".to_string(),
            description: "Log in to Quidco with the configured account. \
                Required before any other Quidco tool."
                .to_string(),
            input_schema: json_schema_empty(),
        }
    }

    fn action(&self) -> &str {
        "login"
    }

    async fn execute(&self, _args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let credentials: Credentials = credentials_as(ctx).await?;
        let http = HttpTransport::new(ClientConfig::new(&base_url(ctx).await?, Auth::None)?)?;

        let response = http
            .post_form(
                "/api/v1/auth/login",
                &[
                    ("email", credentials.email.as_str()),
                    ("password", credentials.password.as_str()),
                ],
            )
            .await?;

        let cookies = response.cookies();
        if cookies.is_empty() {
            return Err(ToolError::internal("Login response did not set a session cookie"));
        }

        let session = Session {
            cookie: cookies.join("; "),
            email: credentials.email,
        };
        ctx.write_cache(SESSION_KEY, serde_json::to_value(&session)?, None)
            .await?;
        info!(connector = KEY, "Session stored");

        Ok(ToolOutput::text(format!("Logged in as {}", session.email)))
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    10
}

/// Search merchants offering cashback.
pub struct SearchMerchantsTool;

#[async_trait::async_trait]
impl Tool for SearchMerchantsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_merchants".to_string(),
            description: "Search merchants and their current cashback rates".to_string(),
            input_schema: json_schema_object(
                json!({
                    "query": { "type": "string", "minLength": 1, "description": "Merchant name or keyword" },
                    "limit": json_schema_integer("Maximum results (default: 10)", Some(1), Some(50))
                }),
                vec!["query"],
            ),
        }
    }

    fn action(&self) -> &str {
        "search merchants"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: SearchArgs = parse_args(args)?;
        let Some(session) = cached_session(ctx).await? else {
            return Ok(ToolOutput::text(LOGIN_FIRST));
        };

        let http = session_client(ctx, session).await?;
        let limit = args.limit.to_string();
        let merchants: Value = http
            .get_with_query(
                "/api/v1/merchants/search",
                &[("q", args.query.as_str()), ("limit", limit.as_str())],
            )
            .await?;
        Ok(ToolOutput::Json(merchants))
    }
}

/// Pending, confirmed and paid cashback totals for the logged-in account.
pub struct CashbackSummaryTool;

#[async_trait::async_trait]
impl Tool for CashbackSummaryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_cashback_summary".to_string(),
            description: "Get pending, confirmed and paid cashback totals".to_string(),
            input_schema: json_schema_empty(),
        }
    }

    fn action(&self) -> &str {
        "get cashback summary"
    }

    async fn execute(&self, _args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let Some(session) = cached_session(ctx).await? else {
            return Ok(ToolOutput::text(LOGIN_FIRST));
        };

        let http = session_client(ctx, session).await?;
        let summary: Value = http.get("/api/v1/user/cashback/summary").await?;
        Ok(ToolOutput::Json(summary))
    }
}

/// End the session and drop the cached cookie.
pub struct LogoutTool;

#[async_trait::async_trait]
impl Tool for LogoutTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "logout".to_string(),
            description: "Log out and forget the cached session".to_string(),
            input_schema: json_schema_empty(),
        }
    }

    fn action(&self) -> &str {
        "logout"
    }

    async fn execute(&self, _args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let Some(session) = cached_session(ctx).await? else {
            return Ok(ToolOutput::text("No active session."));
        };

        ctx.evict_cache(SESSION_KEY).await?;

        // The cookie is already forgotten locally; a failed upstream logout only leaves
        // the server-side session to expire on its own.
        let http = session_client(ctx, session).await?;
        let none: [(&str, &str); 0] = [];
        if let Err(e) = http.post_form("/api/v1/auth/logout", &none).await {
            warn!(connector = KEY, error = %e, "Upstream logout failed");
        }

        Ok(ToolOutput::text("Logged out."))
    }
}
