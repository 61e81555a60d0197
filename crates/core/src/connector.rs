// Connector descriptor: identity, schemas and the tool surface

use crate::context::ExecutionContext;
use crate::error::{ToolError, ToolResult};
use crate::invoke::{invoke, Invocation};
use crate::schema;
use crate::tool::{Tool, ToolDefinition};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A named integration and its tools. Immutable once defined.
pub struct ConnectorDescriptor {
    info: ConnectorInfo,
    credentials_schema: Value,
    setup_schema: Value,
    tools: Vec<Arc<dyn Tool>>,
    definitions: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

/// Identity fields of a connector, serializable for discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorInfo {
    pub key: String,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Borrowed `(name, description, input_schema)` view of one tool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToolSummary<'a> {
    pub name: &'a str,
    pub description: &'a str,
    #[serde(rename = "inputSchema")]
    pub input_schema: &'a Value,
}

/// Lazy iterator over a connector's tools in declaration order.
#[derive(Debug, Clone)]
pub struct ToolListing<'a> {
    inner: std::slice::Iter<'a, ToolDefinition>,
}

impl<'a> Iterator for ToolListing<'a> {
    type Item = ToolSummary<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|d| ToolSummary {
            name: &d.name,
            description: &d.description,
            input_schema: &d.input_schema,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ToolListing<'_> {}

impl ConnectorDescriptor {
    pub fn builder(key: impl Into<String>) -> ConnectorBuilder {
        ConnectorBuilder::new(key)
    }

    pub fn info(&self) -> &ConnectorInfo {
        &self.info
    }

    pub fn key(&self) -> &str {
        &self.info.key
    }

    /// Discovery listing. Each call starts from the first tool.
    pub fn list_tools(&self) -> ToolListing<'_> {
        ToolListing {
            inner: self.definitions.iter(),
        }
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Run a tool by name. Credentials and setup handed to the handler are
    /// checked against this connector's schemas.
    pub async fn invoke(&self, tool_name: &str, args: Value, ctx: &dyn ExecutionContext) -> Invocation {
        let Some(tool) = self.tool(tool_name) else {
            tracing::warn!(connector = %self.info.key, tool = tool_name, "Unknown tool");
            return Invocation::failure(
                &format!("invoke {}", tool_name),
                &ToolError::validation(format!(
                    "Unknown tool `{}` for connector `{}`",
                    tool_name, self.info.key
                )),
            );
        };

        let checked = SchemaCheckedContext {
            inner: ctx,
            credentials_schema: &self.credentials_schema,
            setup_schema: &self.setup_schema,
        };
        invoke(tool.as_ref(), args, &checked).await
    }
}

impl std::fmt::Debug for ConnectorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorDescriptor")
            .field("info", &self.info)
            .field("tools", &self.definitions.iter().map(|d| &d.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`ConnectorDescriptor`]; `define` checks every invariant.
pub struct ConnectorBuilder {
    key: String,
    name: Option<String>,
    version: Option<String>,
    logo: Option<String>,
    description: Option<String>,
    credentials_schema: Option<Value>,
    setup_schema: Option<Value>,
    tools: Vec<Arc<dyn Tool>>,
}

impl ConnectorBuilder {
    fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            version: None,
            logo: None,
            description: None,
            credentials_schema: None,
            setup_schema: None,
            tools: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn logo(mut self, logo: impl Into<String>) -> Self {
        self.logo = Some(logo.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn credentials_schema(mut self, schema: Value) -> Self {
        self.credentials_schema = Some(schema);
        self
    }

    pub fn setup_schema(mut self, schema: Value) -> Self {
        self.setup_schema = Some(schema);
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn define(self) -> ToolResult<ConnectorDescriptor> {
        if !is_slug(&self.key) {
            return Err(ToolError::configuration(format!(
                "Connector key `{}` must be a non-empty slug of lowercase letters, digits, '-' or '_'",
                self.key
            )));
        }

        let name = required(self.name, &self.key, "name")?;
        let version = required(self.version, &self.key, "version")?;

        let credentials_schema = self.credentials_schema.ok_or_else(|| {
            ToolError::configuration(format!("Connector `{}` has no credentials schema", self.key))
        })?;
        let setup_schema = self.setup_schema.ok_or_else(|| {
            ToolError::configuration(format!("Connector `{}` has no setup schema", self.key))
        })?;

        for (label, schema) in [("credentials", &credentials_schema), ("setup", &setup_schema)] {
            if !schema::is_object_schema(schema) {
                return Err(ToolError::configuration(format!(
                    "Connector `{}` {} schema must be an object schema",
                    self.key, label
                )));
            }
        }

        let mut definitions = Vec::with_capacity(self.tools.len());
        let mut index = HashMap::with_capacity(self.tools.len());

        for (i, tool) in self.tools.iter().enumerate() {
            let definition = tool.definition();

            if definition.name.is_empty() {
                return Err(ToolError::configuration(format!(
                    "Connector `{}` declares a tool with an empty name",
                    self.key
                )));
            }
            if index.insert(definition.name.clone(), i).is_some() {
                return Err(ToolError::configuration(format!(
                    "Connector `{}` declares tool `{}` more than once",
                    self.key, definition.name
                )));
            }
            if !schema::is_object_schema(&definition.input_schema) {
                return Err(ToolError::configuration(format!(
                    "Tool `{}` of connector `{}` must take an object input schema",
                    definition.name, self.key
                )));
            }

            definitions.push(definition);
        }

        tracing::debug!(connector = %self.key, tools = definitions.len(), "Connector defined");

        Ok(ConnectorDescriptor {
            info: ConnectorInfo {
                key: self.key,
                name,
                version,
                logo: self.logo,
                description: self.description,
            },
            credentials_schema,
            setup_schema,
            tools: self.tools,
            definitions,
            index,
        })
    }
}

fn required(value: Option<String>, key: &str, field: &str) -> ToolResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ToolError::configuration(format!(
            "Connector `{}` is missing required field `{}`",
            key, field
        ))),
    }
}

fn is_slug(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Context wrapper that checks credentials and setup against the connector's schemas.
struct SchemaCheckedContext<'a> {
    inner: &'a dyn ExecutionContext,
    credentials_schema: &'a Value,
    setup_schema: &'a Value,
}

fn as_configuration(label: &str, error: ToolError) -> ToolError {
    match error {
        ToolError::Validation(message) => {
            ToolError::configuration(format!("Invalid {}: {}", label, message))
        }
        other => other,
    }
}

#[async_trait]
impl ExecutionContext for SchemaCheckedContext<'_> {
    async fn credentials(&self) -> ToolResult<Value> {
        let credentials = self.inner.credentials().await?;
        schema::validate(self.credentials_schema, &credentials)
            .map_err(|e| as_configuration("credentials", e))?;
        Ok(credentials)
    }

    async fn setup(&self) -> ToolResult<Value> {
        let setup = self.inner.setup().await?;
        let setup = if setup.is_null() {
            Value::Object(Default::default())
        } else {
            setup
        };
        schema::validate(self.setup_schema, &setup).map_err(|e| as_configuration("setup", e))?;
        Ok(setup)
    }

    async fn get_data(&self, key: &str) -> ToolResult<Option<Value>> {
        self.inner.get_data(key).await
    }

    async fn set_data(&self, key: &str, value: Value) -> ToolResult<()> {
        self.inner.set_data(key, value).await
    }

    async fn read_cache(&self, key: &str) -> ToolResult<Option<Value>> {
        self.inner.read_cache(key).await
    }

    async fn write_cache(&self, key: &str, value: Value, ttl: Option<Duration>) -> ToolResult<()> {
        self.inner.write_cache(key, value, ttl).await
    }

    async fn evict_cache(&self, key: &str) -> ToolResult<()> {
        self.inner.evict_cache(key).await
    }

    fn cancellation(&self) -> CancellationToken {
        self.inner.cancellation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HostContext, MemoryStore};
    use crate::error::ErrorKind;
    use crate::schema::{json_schema_empty, json_schema_object, json_schema_string};
    use crate::tool::ToolOutput;
    use serde_json::json;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.to_string(),
                description: format!("Tool {}", self.0),
                input_schema: json_schema_empty(),
            }
        }

        fn action(&self) -> &str {
            "run tool"
        }

        async fn execute(&self, _args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
            let creds = ctx.credentials().await?;
            Ok(ToolOutput::Json(creds))
        }
    }

    fn creds_schema() -> Value {
        json_schema_object(json!({"api_key": json_schema_string("Key")}), vec!["api_key"])
    }

    fn base() -> ConnectorBuilder {
        ConnectorDescriptor::builder("acme")
            .name("Acme")
            .version("1.0.0")
            .credentials_schema(creds_schema())
            .setup_schema(json_schema_empty())
    }

    #[test]
    fn test_define_and_list_in_order() {
        let connector = base()
            .tool(NamedTool("b_list"))
            .tool(NamedTool("a_get"))
            .define()
            .unwrap();

        let names: Vec<&str> = connector.list_tools().map(|t| t.name).collect();
        assert_eq!(names, vec!["b_list", "a_get"]);
        assert_eq!(connector.list_tools().len(), 2);

        // Restartable
        let listing = connector.list_tools();
        assert_eq!(listing.clone().count(), 2);
        assert_eq!(listing.count(), 2);
        assert_eq!(connector.list_tools().next().unwrap().description, "Tool b_list");
    }

    #[test]
    fn test_duplicate_tool_name_rejected() {
        let err = base()
            .tool(NamedTool("list"))
            .tool(NamedTool("list"))
            .define()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("declares tool `list` more than once"));
    }

    #[test]
    fn test_tool_names_case_sensitive() {
        let connector = base()
            .tool(NamedTool("list"))
            .tool(NamedTool("List"))
            .define()
            .unwrap();
        assert!(connector.contains("list"));
        assert!(connector.contains("List"));
    }

    #[test]
    fn test_invalid_key_rejected() {
        for key in ["", "Acme", "acme corp", "acme.io"] {
            let err = ConnectorDescriptor::builder(key)
                .name("Acme")
                .version("1")
                .credentials_schema(json_schema_empty())
                .setup_schema(json_schema_empty())
                .define()
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "key {:?}", key);
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = ConnectorDescriptor::builder("acme")
            .version("1")
            .credentials_schema(json_schema_empty())
            .setup_schema(json_schema_empty())
            .define()
            .unwrap_err();
        assert!(err.to_string().contains("missing required field `name`"));

        let err = ConnectorDescriptor::builder("acme")
            .name("Acme")
            .version("1")
            .setup_schema(json_schema_empty())
            .define()
            .unwrap_err();
        assert!(err.to_string().contains("no credentials schema"));

        let err = ConnectorDescriptor::builder("acme")
            .name("Acme")
            .version("1")
            .credentials_schema(json!({"type": "string"}))
            .setup_schema(json_schema_empty())
            .define()
            .unwrap_err();
        assert!(err.to_string().contains("credentials schema must be an object schema"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let connector = base().tool(NamedTool("list")).define().unwrap();
        let ctx = HostContext::new(Arc::new(MemoryStore::new()));
        let result = connector.invoke("missing", json!({}), &ctx).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
        assert!(result.text().starts_with("Failed to invoke missing:"));
    }

    #[tokio::test]
    async fn test_invoke_checks_credentials_schema() {
        let connector = base().tool(NamedTool("list")).define().unwrap();
        let ctx = HostContext::new(Arc::new(MemoryStore::new()))
            .with_credentials(json!({"token": "x"}));
        let result = connector.invoke("list", json!({}), &ctx).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Configuration));
        assert_eq!(
            result.text(),
            "Failed to run tool: Configuration error: Invalid credentials: `api_key`: required field is missing"
        );

        let ctx = HostContext::new(Arc::new(MemoryStore::new()))
            .with_credentials(json!({"api_key": "k"}));
        let result = connector.invoke("list", json!({}), &ctx).await;
        assert_eq!(result.json().unwrap(), json!({"api_key": "k"}));
    }
}
