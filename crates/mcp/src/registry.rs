// Connector registry: qualified tool names, per-invocation contexts, dispatch

use crate::config::{resolve_env, ConnectorConfig, HostConfig};
use crate::protocol::ToolSchema;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use switchboard_connectors::{builtin_connectors, orchestrator};
use switchboard_core::{
    CatalogEntry, ConnectorDescriptor, HostContext, Invocation, MemoryStore, ToolDispatcher,
    ToolError, ToolResult,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Separator between connector key and tool name in MCP tool names.
pub const NAME_SEPARATOR: char = '.';

pub fn qualified_name(connector: &str, tool: &str) -> String {
    format!("{}{}{}", connector, NAME_SEPARATOR, tool)
}

/// Split `"connector.tool"` at the first separator.
pub fn split_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAME_SEPARATOR)
        .filter(|(connector, tool)| !connector.is_empty() && !tool.is_empty())
}

struct Registered {
    descriptor: Arc<ConnectorDescriptor>,
    config: ConnectorConfig,
    store: Arc<MemoryStore>,
}

#[derive(Default)]
struct RegistryInner {
    connectors: BTreeMap<String, Registered>,
    cache_ttl: Option<Duration>,
}

/// Shared handle to every connector served by this host.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache entries written by connectors expire after `ttl` unless they set their own.
    pub fn with_cache_ttl(ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                connectors: BTreeMap::new(),
                cache_ttl: ttl,
            })),
        }
    }

    /// Registry holding every built-in connector enabled in `config`, plus the orchestrator.
    pub async fn from_config(config: &HostConfig) -> ToolResult<Self> {
        let registry = Self::with_cache_ttl(config.server.cache_ttl_secs.map(Duration::from_secs));

        for descriptor in builtin_connectors()? {
            let settings = config.connector(descriptor.key());
            if !settings.enabled {
                tracing::info!(connector = descriptor.key(), "Connector disabled");
                continue;
            }
            registry.register(descriptor, settings).await?;
        }

        let settings = config.connector(orchestrator::KEY);
        if settings.enabled {
            let dispatcher: Arc<dyn ToolDispatcher> = Arc::new(registry.downgrade());
            registry
                .register(orchestrator::connector(dispatcher)?, settings)
                .await?;
        }

        for key in config.connectors.keys() {
            if !registry.contains(key).await {
                tracing::warn!(connector = %key, "Configuration for unknown or disabled connector");
            }
        }

        Ok(registry)
    }

    pub async fn register(
        &self,
        descriptor: ConnectorDescriptor,
        config: ConnectorConfig,
    ) -> ToolResult<()> {
        let mut inner = self.inner.write().await;
        let key = descriptor.key().to_string();
        if inner.connectors.contains_key(&key) {
            return Err(ToolError::configuration(format!(
                "Connector `{}` is already registered",
                key
            )));
        }

        let store = Arc::new(match inner.cache_ttl {
            Some(ttl) => MemoryStore::with_default_ttl(ttl),
            None => MemoryStore::new(),
        });
        let info = descriptor.info();
        tracing::info!(
            connector = %key,
            name = %info.name,
            version = %info.version,
            tools = descriptor.list_tools().len(),
            "Registered connector"
        );
        inner.connectors.insert(
            key,
            Registered {
                descriptor: Arc::new(descriptor),
                config,
                store,
            },
        );
        Ok(())
    }

    /// Remove a connector and drop its stored data and cache.
    ///
    /// Returns `false` when no connector is registered under `key`. Calls
    /// already in flight keep the descriptor they resolved.
    pub async fn unregister(&self, key: &str) -> bool {
        let removed = self.inner.write().await.connectors.remove(key).is_some();
        if removed {
            tracing::info!(connector = %key, "Unregistered connector");
        }
        removed
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.connectors.contains_key(key)
    }

    pub async fn connector_count(&self) -> usize {
        self.inner.read().await.connectors.len()
    }

    /// Every tool, named `connector.tool`, in connector-key order.
    pub async fn list_tools(&self) -> Vec<ToolSchema> {
        let inner = self.inner.read().await;
        inner
            .connectors
            .values()
            .flat_map(|entry| {
                let key = entry.descriptor.key();
                entry.descriptor.list_tools().map(move |tool| ToolSchema {
                    name: qualified_name(key, tool.name),
                    description: tool.description.to_string(),
                    input_schema: tool.input_schema.clone(),
                })
            })
            .collect()
    }

    /// Call a tool by its qualified MCP name.
    pub async fn call(&self, name: &str, args: Value, cancel: CancellationToken) -> Invocation {
        match split_name(name) {
            Some((connector, tool)) => self.call_tool(connector, tool, args, cancel).await,
            None => Invocation::failure(
                &format!("invoke {}", name),
                &ToolError::validation(format!(
                    "Tool names have the form `connector{}tool`, got `{}`",
                    NAME_SEPARATOR, name
                )),
            ),
        }
    }

    pub async fn call_tool(
        &self,
        connector: &str,
        tool: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> Invocation {
        // Clone what the call needs so the lock is not held across the invocation.
        let entry = {
            let inner = self.inner.read().await;
            inner.connectors.get(connector).map(|entry| {
                (
                    entry.descriptor.clone(),
                    entry.config.clone(),
                    entry.store.clone(),
                )
            })
        };

        let Some((descriptor, config, store)) = entry else {
            return Invocation::failure(
                &format!("invoke {}", qualified_name(connector, tool)),
                &ToolError::validation(format!("Unknown connector `{}`", connector)),
            );
        };

        let ctx = build_context(&config, store).with_cancellation(cancel);
        descriptor.invoke(tool, args, &ctx).await
    }

    pub(crate) fn downgrade(&self) -> RegistryDispatcher {
        RegistryDispatcher {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Fresh context for one invocation. Secret resolution errors surface when the
/// tool reads its credentials or setup, not here.
fn build_context(config: &ConnectorConfig, store: Arc<MemoryStore>) -> HostContext {
    let ctx = HostContext::new(store);

    let ctx = match &config.credentials {
        Some(credentials) => match resolve_env(credentials) {
            Ok(resolved) => ctx.with_credentials(resolved),
            Err(message) => ctx.with_credentials_error(message),
        },
        None => ctx,
    };

    match &config.setup {
        Some(setup) => match resolve_env(setup) {
            Ok(resolved) => ctx.with_setup(resolved),
            Err(message) => ctx.with_setup_error(message),
        },
        None => ctx,
    }
}

#[async_trait]
impl ToolDispatcher for ConnectorRegistry {
    async fn dispatch(
        &self,
        connector: &str,
        tool: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> Invocation {
        self.call_tool(connector, tool, args, cancel).await
    }

    async fn catalog(&self) -> Vec<CatalogEntry> {
        let inner = self.inner.read().await;
        inner
            .connectors
            .values()
            .flat_map(|entry| {
                let key = entry.descriptor.key();
                entry.descriptor.list_tools().map(move |tool| CatalogEntry {
                    connector: key.to_string(),
                    tool: tool.name.to_string(),
                    description: tool.description.to_string(),
                    input_schema: tool.input_schema.clone(),
                })
            })
            .collect()
    }
}

/// Dispatcher held by connectors that call back into the registry.
///
/// Holds a weak reference so the registry and the orchestrator it owns do not
/// keep each other alive.
pub struct RegistryDispatcher {
    inner: Weak<RwLock<RegistryInner>>,
}

impl RegistryDispatcher {
    fn upgrade(&self) -> Option<ConnectorRegistry> {
        self.inner.upgrade().map(|inner| ConnectorRegistry { inner })
    }
}

#[async_trait]
impl ToolDispatcher for RegistryDispatcher {
    async fn dispatch(
        &self,
        connector: &str,
        tool: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> Invocation {
        match self.upgrade() {
            Some(registry) => registry.call_tool(connector, tool, args, cancel).await,
            None => Invocation::failure(
                &format!("invoke {}", qualified_name(connector, tool)),
                &ToolError::internal("Connector registry has shut down"),
            ),
        }
    }

    async fn catalog(&self) -> Vec<CatalogEntry> {
        match self.upgrade() {
            Some(registry) => registry.catalog().await,
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_core::schema::json_schema_object;
    use switchboard_core::{
        credentials_as, ErrorKind, ExecutionContext, Tool, ToolDefinition, ToolOutput,
    };

    struct WhoAmITool;

    #[derive(serde::Deserialize)]
    struct Credentials {
        token: String,
    }

    #[async_trait]
    impl Tool for WhoAmITool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "whoami".to_string(),
                description: "Echo the configured token".to_string(),
                input_schema: json_schema_object(json!({}), vec![]),
            }
        }

        fn action(&self) -> &str {
            "identify"
        }

        async fn execute(&self, _args: Value, ctx: &dyn ExecutionContext) -> ToolResult<ToolOutput> {
            let credentials: Credentials = credentials_as(ctx).await?;
            Ok(ToolOutput::text(credentials.token))
        }
    }

    fn acme() -> ConnectorDescriptor {
        ConnectorDescriptor::builder("acme")
            .name("Acme")
            .version("0.1.0")
            .credentials_schema(json_schema_object(
                json!({"token": {"type": "string"}}),
                vec!["token"],
            ))
            .setup_schema(json_schema_object(json!({}), vec![]))
            .tool(WhoAmITool)
            .define()
            .unwrap()
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("sentry.list_issues"), Some(("sentry", "list_issues")));
        assert_eq!(split_name("a.b.c"), Some(("a", "b.c")));
        assert_eq!(split_name("nodot"), None);
        assert_eq!(split_name(".tool"), None);
    }

    #[tokio::test]
    async fn test_call_resolves_env_credentials() {
        std::env::set_var("SWITCHBOARD_REGISTRY_TEST_TOKEN", "t0ken");

        let registry = ConnectorRegistry::new();
        registry
            .register(
                acme(),
                ConnectorConfig {
                    credentials: Some(json!({"token": "env:SWITCHBOARD_REGISTRY_TEST_TOKEN"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = registry
            .call("acme.whoami", json!({}), CancellationToken::new())
            .await;
        assert_eq!(result.text(), "t0ken");
    }

    #[tokio::test]
    async fn test_unset_secret_fails_at_invocation() {
        let registry = ConnectorRegistry::new();
        registry
            .register(
                acme(),
                ConnectorConfig {
                    credentials: Some(json!({"token": "env:SWITCHBOARD_REGISTRY_TEST_MISSING"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = registry
            .call("acme.whoami", json!({}), CancellationToken::new())
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Configuration));
        assert_eq!(
            result.text(),
            "Failed to identify: Configuration error: Environment variable SWITCHBOARD_REGISTRY_TEST_MISSING is not set"
        );
    }

    #[tokio::test]
    async fn test_unset_setup_variable_fails_at_invocation() {
        let registry = ConnectorRegistry::new();
        registry
            .register(
                switchboard_connectors::customerio::connector().unwrap(),
                ConnectorConfig {
                    credentials: Some(json!({"app_api_key": "k"})),
                    setup: Some(json!({"endpoint": "env:SWITCHBOARD_REGISTRY_TEST_UNSET_ENDPOINT"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = registry
            .call("customerio.list_segments", json!({}), CancellationToken::new())
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Configuration));
        assert_eq!(
            result.text(),
            "Failed to list segments: Configuration error: Environment variable SWITCHBOARD_REGISTRY_TEST_UNSET_ENDPOINT is not set"
        );
    }

    #[tokio::test]
    async fn test_unregister_removes_connector() {
        let registry = ConnectorRegistry::new();
        registry
            .register(
                acme(),
                ConnectorConfig {
                    credentials: Some(json!({"token": "abc"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            registry.call("acme.whoami", json!({}), CancellationToken::new()).await.text(),
            "abc"
        );

        assert!(registry.unregister("acme").await);
        assert!(!registry.unregister("acme").await);
        assert!(!registry.contains("acme").await);
        assert!(registry.list_tools().await.is_empty());

        let result = registry.call("acme.whoami", json!({}), CancellationToken::new()).await;
        assert_eq!(
            result.text(),
            "Failed to invoke acme.whoami: Invalid arguments: Unknown connector `acme`"
        );

        registry.register(acme(), ConnectorConfig::default()).await.unwrap();
        assert_eq!(registry.connector_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_names() {
        let registry = ConnectorRegistry::new();
        registry.register(acme(), ConnectorConfig::default()).await.unwrap();

        let missing_connector = registry
            .call("figma.list_files", json!({}), CancellationToken::new())
            .await;
        assert_eq!(
            missing_connector.text(),
            "Failed to invoke figma.list_files: Invalid arguments: Unknown connector `figma`"
        );

        let malformed = registry.call("whoami", json!({}), CancellationToken::new()).await;
        assert_eq!(malformed.error_kind(), Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = ConnectorRegistry::new();
        registry.register(acme(), ConnectorConfig::default()).await.unwrap();
        let err = registry
            .register(acme(), ConnectorConfig::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Connector `acme` is already registered"
        );
    }

    #[tokio::test]
    async fn test_from_config_skips_disabled() {
        let config = HostConfig::parse(
            r#"
[connectors.quidco]
enabled = false
"#,
        )
        .unwrap();

        let registry = ConnectorRegistry::from_config(&config).await.unwrap();
        assert!(registry.contains("customerio").await);
        assert!(registry.contains("sentry").await);
        assert!(registry.contains("orchestrator").await);
        assert!(!registry.contains("quidco").await);

        let names: Vec<String> = registry.list_tools().await.into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"sentry.list_organizations".to_string()));
        assert!(names.contains(&"orchestrator.execute_batch".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("quidco.")));
    }

    #[tokio::test]
    async fn test_orchestrator_dispatches_through_registry() {
        let registry = ConnectorRegistry::from_config(&HostConfig::default()).await.unwrap();
        registry
            .register(
                acme(),
                ConnectorConfig {
                    credentials: Some(json!({"token": "abc"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = registry
            .call(
                "orchestrator.execute_batch",
                json!({"steps": [
                    {"connector": "acme", "tool": "whoami"},
                    {"connector": "quidco", "tool": "search_merchants", "args": {"query": "argos"}}
                ]}),
                CancellationToken::new(),
            )
            .await;

        let report = result.json().unwrap();
        assert_eq!(report["succeeded"], 2, "{}", result.text());
        assert_eq!(report["results"][0]["output"], "abc");
        assert_eq!(
            report["results"][1]["output"],
            "Please login first using the login tool."
        );
    }
}
