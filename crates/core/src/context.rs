//! Execution context handed to every tool handler.
//!
//! The context is the only way a handler reaches secrets, configuration and
//! the host's key/value storage. Connectors consume it and never build one;
//! [`HostContext`] is the in-process implementation used by the stdio host
//! and by tests.

use crate::error::{ToolError, ToolResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Host-supplied accessor for credentials, setup and storage.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Decrypted secret bundle matching the connector's credentials schema.
    async fn credentials(&self) -> ToolResult<Value>;

    /// Validated configuration bundle matching the connector's setup schema.
    async fn setup(&self) -> ToolResult<Value>;

    /// Best-effort persistent storage scoped to the connector.
    async fn get_data(&self, key: &str) -> ToolResult<Option<Value>>;

    async fn set_data(&self, key: &str, value: Value) -> ToolResult<()>;

    /// Best-effort cache. Expiry and eviction are the host's business.
    async fn read_cache(&self, key: &str) -> ToolResult<Option<Value>>;

    async fn write_cache(&self, key: &str, value: Value, ttl: Option<Duration>) -> ToolResult<()>;

    async fn evict_cache(&self, key: &str) -> ToolResult<()>;

    /// Token the host cancels to abandon the invocation.
    fn cancellation(&self) -> CancellationToken {
        CancellationToken::new()
    }
}

/// Deserialize the context's credentials into a connector-specific struct.
pub async fn credentials_as<T: DeserializeOwned>(ctx: &dyn ExecutionContext) -> ToolResult<T> {
    let raw = ctx.credentials().await?;
    serde_json::from_value(raw)
        .map_err(|e| ToolError::configuration(format!("Invalid credentials: {}", e)))
}

/// Deserialize the context's setup into a connector-specific struct.
pub async fn setup_as<T: DeserializeOwned>(ctx: &dyn ExecutionContext) -> ToolResult<T> {
    let raw = ctx.setup().await?;
    let raw = if raw.is_null() {
        Value::Object(Default::default())
    } else {
        raw
    };
    serde_json::from_value(raw).map_err(|e| ToolError::configuration(format!("Invalid setup: {}", e)))
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-memory data and cache storage shared by the contexts of one connector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Value>>,
    cache: RwLock<HashMap<String, CachedValue>>,
    default_ttl: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire cache entries written without an explicit TTL after `ttl`.
    pub fn with_default_ttl(ttl: Duration) -> Self {
        Self {
            default_ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub async fn get_data(&self, key: &str) -> Option<Value> {
        self.data.read().await.get(key).cloned()
    }

    pub async fn set_data(&self, key: &str, value: Value) {
        self.data.write().await.insert(key.to_string(), value);
    }

    pub async fn read_cache(&self, key: &str) -> Option<Value> {
        let expired = {
            let cache = self.cache.read().await;
            match cache.get(key) {
                None => return None,
                Some(entry) => match entry.expires_at {
                    Some(at) if Instant::now() >= at => true,
                    _ => return Some(entry.value.clone()),
                },
            }
        };

        if expired {
            tracing::debug!(key, "Cache entry expired");
            self.cache.write().await.remove(key);
        }
        None
    }

    /// Store `value` under `key`, dropping every entry that has already expired.
    pub async fn write_cache(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.or(self.default_ttl).map(|ttl| now + ttl);

        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        if cache.len() < before {
            tracing::debug!(purged = before - cache.len(), "Purged expired cache entries");
        }
        cache.insert(key.to_string(), CachedValue { value, expires_at });
    }

    pub async fn evict_cache(&self, key: &str) {
        self.cache.write().await.remove(key);
    }

    /// Number of cache entries currently held, expired or not.
    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

/// Context built by the host for a single invocation.
#[derive(Clone)]
pub struct HostContext {
    credentials: Option<Result<Value, String>>,
    setup: Result<Value, String>,
    store: Arc<MemoryStore>,
    cancel: CancellationToken,
}

impl HostContext {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            credentials: None,
            setup: Ok(Value::Object(Default::default())),
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Value) -> Self {
        self.credentials = Some(Ok(credentials));
        self
    }

    /// Make `credentials()` fail, e.g. when a secret could not be resolved.
    pub fn with_credentials_error(mut self, message: impl Into<String>) -> Self {
        self.credentials = Some(Err(message.into()));
        self
    }

    pub fn with_setup(mut self, setup: Value) -> Self {
        self.setup = Ok(setup);
        self
    }

    /// Make `setup()` fail, e.g. when a referenced variable is unset.
    pub fn with_setup_error(mut self, message: impl Into<String>) -> Self {
        self.setup = Err(message.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl ExecutionContext for HostContext {
    async fn credentials(&self) -> ToolResult<Value> {
        match &self.credentials {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(message)) => Err(ToolError::configuration(message.clone())),
            None => Err(ToolError::configuration("No credentials configured")),
        }
    }

    async fn setup(&self) -> ToolResult<Value> {
        self.setup.clone().map_err(ToolError::configuration)
    }

    async fn get_data(&self, key: &str) -> ToolResult<Option<Value>> {
        Ok(self.store.get_data(key).await)
    }

    async fn set_data(&self, key: &str, value: Value) -> ToolResult<()> {
        self.store.set_data(key, value).await;
        Ok(())
    }

    async fn read_cache(&self, key: &str) -> ToolResult<Option<Value>> {
        Ok(self.store.read_cache(key).await)
    }

    async fn write_cache(&self, key: &str, value: Value, ttl: Option<Duration>) -> ToolResult<()> {
        self.store.write_cache(key, value, ttl).await;
        Ok(())
    }

    async fn evict_cache(&self, key: &str) -> ToolResult<()> {
        self.store.evict_cache(key).await;
        Ok(())
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Creds {
        api_key: String,
    }

    #[derive(Debug, Deserialize)]
    struct Setup {
        #[serde(default)]
        region: Option<String>,
    }

    #[tokio::test]
    async fn test_credentials_missing() {
        let ctx = HostContext::new(Arc::new(MemoryStore::new()));
        let err = credentials_as::<Creds>(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: No credentials configured");
    }

    #[tokio::test]
    async fn test_credentials_wrong_shape() {
        let ctx = HostContext::new(Arc::new(MemoryStore::new()))
            .with_credentials(json!({"token": "x"}));
        let err = credentials_as::<Creds>(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("Invalid credentials"));
        assert!(err.to_string().contains("api_key"));
    }

    #[tokio::test]
    async fn test_credentials_and_setup_resolve() {
        let ctx = HostContext::new(Arc::new(MemoryStore::new()))
            .with_credentials(json!({"api_key": "k"}))
            .with_setup(json!({"region": "eu"}));
        let creds: Creds = credentials_as(&ctx).await.unwrap();
        let setup: Setup = setup_as(&ctx).await.unwrap();
        assert_eq!(creds.api_key, "k");
        assert_eq!(setup.region.as_deref(), Some("eu"));
    }

    #[tokio::test]
    async fn test_null_setup_is_empty_object() {
        let ctx = HostContext::new(Arc::new(MemoryStore::new())).with_setup(Value::Null);
        let setup: Setup = setup_as(&ctx).await.unwrap();
        assert!(setup.region.is_none());
    }

    #[tokio::test]
    async fn test_cache_shared_through_store() {
        let store = Arc::new(MemoryStore::new());
        let first = HostContext::new(store.clone());
        let second = HostContext::new(store);

        assert!(first.read_cache("svc:session").await.unwrap().is_none());
        first
            .write_cache("svc:session", json!("cookie=1"), None)
            .await
            .unwrap();
        assert_eq!(
            second.read_cache("svc:session").await.unwrap(),
            Some(json!("cookie=1"))
        );

        second.evict_cache("svc:session").await.unwrap();
        assert!(first.read_cache("svc:session").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_expiry() {
        let store = Arc::new(MemoryStore::with_default_ttl(Duration::from_secs(60)));
        let ctx = HostContext::new(store);

        ctx.write_cache("a", json!(1), None).await.unwrap();
        ctx.write_cache("b", json!(2), Some(Duration::from_secs(5))).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(ctx.read_cache("a").await.unwrap(), Some(json!(1)));
        assert!(ctx.read_cache("b").await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(ctx.read_cache("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_setup_error_surfaces_as_configuration() {
        let ctx = HostContext::new(Arc::new(MemoryStore::new()))
            .with_setup_error("Environment variable REGION is not set");
        let err = setup_as::<Setup>(&ctx).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Environment variable REGION is not set"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_purges_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        let ctx = HostContext::new(store.clone());

        ctx.write_cache("svc:old", json!(1), Some(Duration::from_secs(5))).await.unwrap();
        ctx.write_cache("svc:keep", json!(2), None).await.unwrap();
        assert_eq!(store.cache_len().await, 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        ctx.write_cache("svc:new", json!(3), None).await.unwrap();

        assert_eq!(store.cache_len().await, 2);
        assert_eq!(ctx.read_cache("svc:keep").await.unwrap(), Some(json!(2)));
        assert_eq!(ctx.read_cache("svc:new").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_data_roundtrip() {
        let ctx = HostContext::new(Arc::new(MemoryStore::new()));
        assert!(ctx.get_data("k").await.unwrap().is_none());
        ctx.set_data("k", json!({"v": 1})).await.unwrap();
        assert_eq!(ctx.get_data("k").await.unwrap(), Some(json!({"v": 1})));
    }
}
