// Sentry Web API connector: organizations, projects and issues

use crate::transport::{path_segment, Auth, ClientConfig, HttpTransport, ResponseBody};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use switchboard_core::schema::{json_schema_empty, json_schema_object, json_schema_string};
use switchboard_core::{
    credentials_as, parse_args, setup_as, ConnectorDescriptor, ExecutionContext, Tool,
    ToolDefinition, ToolError, ToolOutput, ToolResult,
};

pub const KEY: &str = "sentry";

const DEFAULT_HOST: &str = "https://sentry.io";

#[derive(Debug, Deserialize)]
struct Credentials {
    auth_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct Setup {
    #[serde(default)]
    host: Option<String>,
}

pub fn connector() -> ToolResult<ConnectorDescriptor> {
    ConnectorDescriptor::builder(KEY)
        .name("Sentry")
        .version("1.0.0")
        .logo("https://sentry.io/favicon.ico")
        .description("Browse Sentry organizations, projects and issues")
        .credentials_schema(json_schema_object(
            json!({ "auth_token": json_schema_string("User auth token with org:read and event:read scopes") }),
            vec!["auth_token"],
        ))
        .setup_schema(json_schema_object(
            json!({ "host": json_schema_string("Self-hosted Sentry URL (default: https://sentry.io)") }),
            vec![],
        ))
        .tool(ListOrganizationsTool)
        .tool(ListProjectsTool)
        .tool(ListIssuesTool)
        .tool(GetIssueTool)
        .define()
}

struct SentryClient {
    http: HttpTransport,
}

impl SentryClient {
    async fn from_context(ctx: &dyn ExecutionContext) -> ToolResult<Self> {
        let credentials: Credentials = credentials_as(ctx).await?;
        let setup: Setup = setup_as(ctx).await?;
        let host = setup
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOST);
        let base = format!("{}/api/0/", host.trim_end_matches('/'));
        let config = ClientConfig::new(&base, Auth::Bearer(credentials.auth_token))?;
        Ok(Self {
            http: HttpTransport::new(config)?,
        })
    }
}

/// Extract the cursor for the next page from a Sentry `Link` header.
///
/// Sentry always sends a `rel="next"` link; `results="false"` marks the last page.
pub fn next_cursor(link: &str) -> Option<String> {
    link.split(',').find_map(|entry| {
        let mut rel_next = false;
        let mut has_results = false;
        let mut cursor = None;
        for attr in entry.split(';').skip(1) {
            let Some((name, value)) = attr.trim().split_once('=') else {
                continue;
            };
            let value = value.trim_matches('"');
            match name.trim() {
                "rel" => rel_next = value == "next",
                "results" => has_results = value == "true",
                "cursor" => cursor = Some(value.to_string()),
                _ => {}
            }
        }
        if rel_next && has_results {
            cursor
        } else {
            None
        }
    })
}

/// List organizations the token can access.
pub struct ListOrganizationsTool;

#[async_trait::async_trait]
impl Tool for ListOrganizationsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_organizations".to_string(),
            description: "List the organizations available to the auth token".to_string(),
            input_schema: json_schema_empty(),
        }
    }

    fn action(&self) -> &str {
        "list organizations"
    }

    async fn execute(&self, _args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let client = SentryClient::from_context(ctx).await?;
        let organizations: Value = client.http.get("organizations/").await?;
        Ok(ToolOutput::Json(organizations))
    }
}

#[derive(Debug, Deserialize)]
struct OrganizationArgs {
    organization: String,
}

/// List projects in an organization.
pub struct ListProjectsTool;

#[async_trait::async_trait]
impl Tool for ListProjectsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_projects".to_string(),
            description: "List the projects of an organization".to_string(),
            input_schema: json_schema_object(
                json!({ "organization": { "type": "string", "minLength": 1, "description": "Organization slug" } }),
                vec!["organization"],
            ),
        }
    }

    fn action(&self) -> &str {
        "list projects"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: OrganizationArgs = parse_args(args)?;
        let client = SentryClient::from_context(ctx).await?;
        let organization = path_segment("organization", &args.organization)?;
        let projects: Value = client
            .http
            .get(&format!("organizations/{}/projects/", organization))
            .await?;
        Ok(ToolOutput::Json(projects))
    }
}

#[derive(Debug, Deserialize)]
struct ListIssuesArgs {
    organization: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    cursor: Option<String>,
}

/// List issues, one page at a time.
pub struct ListIssuesTool;

#[async_trait::async_trait]
impl Tool for ListIssuesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_issues".to_string(),
            description: "List issues in an organization. Pass `next_cursor` from a previous \
                result as `cursor` to fetch the next page."
                .to_string(),
            input_schema: json_schema_object(
                json!({
                    "organization": { "type": "string", "minLength": 1, "description": "Organization slug" },
                    "project": json_schema_string("Numeric project id to filter by"),
                    "query": json_schema_string("Sentry search query (default: is:unresolved)"),
                    "cursor": json_schema_string("Opaque page cursor")
                }),
                vec!["organization"],
            ),
        }
    }

    fn action(&self) -> &str {
        "list issues"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: ListIssuesArgs = parse_args(args)?;
        let organization = path_segment("organization", &args.organization)?;
        let client = SentryClient::from_context(ctx).await?;

        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(project) = args.project.as_deref() {
            query.push(("project", project));
        }
        if let Some(q) = args.query.as_deref() {
            query.push(("query", q));
        }
        if let Some(cursor) = args.cursor.as_deref() {
            query.push(("cursor", cursor));
        }

        let response = client
            .http
            .get_raw(&format!("organizations/{}/issues/", organization), &query)
            .await?;
        let next = response.header("link").and_then(next_cursor);
        let issues = match response.body {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(_) | ResponseBody::Binary { .. } => {
                return Err(ToolError::internal(
                    "Unexpected response from upstream: issue list is not JSON",
                ))
            }
        };

        Ok(ToolOutput::Json(json!({
            "issues": issues,
            "next_cursor": next,
        })))
    }
}

/// Absent and `null` fields both take the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Subset of the issue payload rendered by `get_issue`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IssueDetails {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub short_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub culprit: String,
    #[serde(deserialize_with = "null_as_default")]
    pub level: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub count: String,
    #[serde(deserialize_with = "null_as_default")]
    pub user_count: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub first_seen: String,
    #[serde(deserialize_with = "null_as_default")]
    pub last_seen: String,
    #[serde(deserialize_with = "null_as_default")]
    pub permalink: String,
    #[serde(deserialize_with = "null_as_default")]
    pub project: ProjectRef,
    #[serde(deserialize_with = "null_as_default")]
    pub metadata: IssueMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProjectRef {
    #[serde(deserialize_with = "null_as_default")]
    pub slug: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IssueMetadata {
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub value: String,
}

impl IssueDetails {
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} {}",
            or_dash(&self.short_id),
            or_dash(&self.title)
        )];
        lines.push(format!(
            "Project: {} | Level: {} | Status: {}",
            or_dash(&self.project.slug),
            or_dash(&self.level),
            or_dash(&self.status)
        ));
        lines.push(format!(
            "Events: {} | Users: {}",
            if self.count.is_empty() { "0" } else { &self.count },
            self.user_count
        ));
        lines.push(format!(
            "First seen: {} | Last seen: {}",
            or_dash(&self.first_seen),
            or_dash(&self.last_seen)
        ));
        if !self.culprit.is_empty() {
            lines.push(format!("Culprit: {}", self.culprit));
        }
        if !self.metadata.kind.is_empty() || !self.metadata.value.is_empty() {
            lines.push(format!("Error: {}: {}", self.metadata.kind, self.metadata.value));
        }
        if !self.permalink.is_empty() {
            lines.push(format!("Link: {}", self.permalink));
        }
        lines.join("\n")
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

#[derive(Debug, Deserialize)]
struct GetIssueArgs {
    organization: String,
    issue_id: String,
}

/// Fetch one issue and render a readable summary.
pub struct GetIssueTool;

#[async_trait::async_trait]
impl Tool for GetIssueTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_issue".to_string(),
            description: "Get a summary of a single issue".to_string(),
            input_schema: json_schema_object(
                json!({
                    "organization": { "type": "string", "minLength": 1, "description": "Organization slug" },
                    "issue_id": { "type": "string", "minLength": 1, "description": "Issue id" }
                }),
                vec!["organization", "issue_id"],
            ),
        }
    }

    fn action(&self) -> &str {
        "get issue"
    }

    async fn execute(&self, args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
        let args: GetIssueArgs = parse_args(args)?;
        let organization = path_segment("organization", &args.organization)?;
        let issue_id = path_segment("issue_id", &args.issue_id)?;
        let client = SentryClient::from_context(ctx).await?;
        let issue: IssueDetails = client
            .http
            .get(&format!("organizations/{}/issues/{}/", organization, issue_id))
            .await?;
        Ok(ToolOutput::text(issue.summary()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use switchboard_core::{ErrorKind, HostContext, MemoryStore};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx(host: &str) -> HostContext {
        HostContext::new(Arc::new(MemoryStore::new()))
            .with_credentials(json!({"auth_token": "sntrys_token"}))
            .with_setup(json!({"host": host}))
    }

    #[tokio::test]
    async fn test_list_organizations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0/organizations/"))
            .and(header("authorization", "Bearer sntrys_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"slug": "acme", "name": "Acme"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = connector()
            .unwrap()
            .invoke("list_organizations", json!({}), &ctx(&server.uri()))
            .await;
        assert_eq!(result.json().unwrap(), json!([{"slug": "acme", "name": "Acme"}]));
    }

    #[tokio::test]
    async fn test_list_organizations_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0/organizations/"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token"})),
            )
            .mount(&server)
            .await;

        let result = connector()
            .unwrap()
            .invoke("list_organizations", json!({}), &ctx(&server.uri()))
            .await;

        assert!(result.is_error());
        assert_eq!(result.error_kind(), Some(ErrorKind::Authentication));
        let text = result.text();
        assert!(text.contains("Failed to list organizations"));
        assert!(text.contains("401"));
        assert!(text.contains("Invalid token"));
    }

    #[tokio::test]
    async fn test_missing_credentials_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = HostContext::new(Arc::new(MemoryStore::new()))
            .with_credentials(json!({"token": "wrong-field"}))
            .with_setup(json!({"host": server.uri()}));

        let result = connector()
            .unwrap()
            .invoke("list_organizations", json!({}), &ctx)
            .await;
        assert_eq!(
            result.text(),
            "Failed to list organizations: Configuration error: Invalid credentials: `auth_token`: required field is missing"
        );
    }

    #[tokio::test]
    async fn test_list_issues_passes_cursor_through() {
        let server = MockServer::start().await;
        let link = format!(
            "<{0}/api/0/organizations/acme/issues/?cursor=1:0:1>; rel=\"previous\"; results=\"false\"; cursor=\"1:0:1\", \
             <{0}/api/0/organizations/acme/issues/?cursor=1:100:0>; rel=\"next\"; results=\"true\"; cursor=\"1:100:0\"",
            server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/api/0/organizations/acme/issues/"))
            .and(query_param("cursor", "0:100:0"))
            .and(query_param("query", "is:unresolved"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("link", link.as_str())
                    .set_body_json(json!([{"id": "1", "title": "Boom"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = connector()
            .unwrap()
            .invoke(
                "list_issues",
                json!({"organization": "acme", "query": "is:unresolved", "cursor": "0:100:0"}),
                &ctx(&server.uri()),
            )
            .await;

        let page = result.json().unwrap();
        assert_eq!(page["issues"][0]["title"], "Boom");
        assert_eq!(page["next_cursor"], "1:100:0");
    }

    #[test]
    fn test_next_cursor_last_page() {
        let link = "<https://sentry.io/x?cursor=a>; rel=\"previous\"; results=\"true\"; cursor=\"a\", \
                    <https://sentry.io/x?cursor=b>; rel=\"next\"; results=\"false\"; cursor=\"b\"";
        assert_eq!(next_cursor(link), None);
        assert_eq!(next_cursor(""), None);
    }

    #[tokio::test]
    async fn test_get_issue_summary_with_sparse_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0/organizations/acme/issues/42/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "42",
                "shortId": "WEB-1A",
                "title": "TypeError: x is undefined",
                "count": "17",
                "project": {"slug": "web"}
            })))
            .mount(&server)
            .await;

        let result = connector()
            .unwrap()
            .invoke(
                "get_issue",
                json!({"organization": "acme", "issue_id": "42"}),
                &ctx(&server.uri()),
            )
            .await;

        assert!(!result.is_error(), "{}", result.text());
        let text = result.text();
        assert!(text.starts_with("WEB-1A TypeError: x is undefined"));
        assert!(text.contains("Project: web | Level: - | Status: -"));
        assert!(text.contains("Events: 17 | Users: 0"));
        assert!(!text.contains("Culprit"));
    }

    #[tokio::test]
    async fn test_get_issue_summary_with_null_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0/organizations/acme/issues/42/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "42",
                "shortId": "WEB-1A",
                "title": "Boom",
                "culprit": null,
                "permalink": null,
                "project": null,
                "metadata": {"type": "TypeError", "value": null}
            })))
            .mount(&server)
            .await;

        let result = connector()
            .unwrap()
            .invoke(
                "get_issue",
                json!({"organization": "acme", "issue_id": "42"}),
                &ctx(&server.uri()),
            )
            .await;

        assert!(!result.is_error(), "{}", result.text());
        let text = result.text();
        assert!(text.starts_with("WEB-1A Boom"));
        assert!(text.contains("Project: - | Level: - | Status: -"));
        assert!(text.contains("Error: TypeError: "));
        assert!(!text.contains("Culprit"));
        assert!(!text.contains("Link"));
    }

    #[tokio::test]
    async fn test_get_issue_escapes_path_segments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0/organizations/acme/issues/42%2F..%2Fadmin/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"shortId": "WEB-1A"})))
            .expect(1)
            .mount(&server)
            .await;

        let result = connector()
            .unwrap()
            .invoke(
                "get_issue",
                json!({"organization": "acme", "issue_id": "42/../admin"}),
                &ctx(&server.uri()),
            )
            .await;
        assert!(!result.is_error(), "{}", result.text());

        let dot_segment = connector()
            .unwrap()
            .invoke(
                "list_projects",
                json!({"organization": ".."}),
                &ctx(&server.uri()),
            )
            .await;
        assert_eq!(dot_segment.error_kind(), Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_list_issues_rejects_non_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0/organizations/acme/issues/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>maintenance</html>"),
            )
            .mount(&server)
            .await;

        let result = connector()
            .unwrap()
            .invoke("list_issues", json!({"organization": "acme"}), &ctx(&server.uri()))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Internal));
        assert_eq!(
            result.text(),
            "Failed to list issues: Unexpected response from upstream: issue list is not JSON"
        );
    }

    #[tokio::test]
    async fn test_list_projects_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0/organizations/ghost/projects/"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "The requested resource does not exist"})),
            )
            .mount(&server)
            .await;

        let result = connector()
            .unwrap()
            .invoke("list_projects", json!({"organization": "ghost"}), &ctx(&server.uri()))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Upstream));
        assert_eq!(
            result.text(),
            "Failed to list projects: HTTP 404 Not Found: The requested resource does not exist"
        );
    }
}
