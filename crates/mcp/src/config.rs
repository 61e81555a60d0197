use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Prefix marking a config string that names an environment variable.
pub const ENV_PREFIX: &str = "env:";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerSection,

    /// Per-connector settings keyed by connector key.
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Default cache TTL in seconds for connector session entries; unset keeps entries until evicted.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

fn default_server_name() -> String {
    "switchboard".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            cache_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Secret bundle. Strings may be `env:NAME` references.
    #[serde(default)]
    pub credentials: Option<Value>,

    #[serde(default)]
    pub setup: Option<Value>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credentials: None,
            setup: None,
        }
    }
}

impl HostConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(
                "Configuration file {} not found, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read configuration file {}", config_path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse configuration file {}", config_path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Settings for `key`; connectors without a section use the defaults.
    pub fn connector(&self, key: &str) -> ConnectorConfig {
        self.connectors.get(key).cloned().unwrap_or_default()
    }
}

/// Replace every `env:NAME` string in `value` with the variable's value.
///
/// Fails with a readable message naming the first unset variable.
pub fn resolve_env(value: &Value) -> std::result::Result<Value, String> {
    match value {
        Value::String(s) => match s.strip_prefix(ENV_PREFIX) {
            Some(name) => std::env::var(name)
                .map(Value::String)
                .map_err(|_| format!("Environment variable {} is not set", name)),
            None => Ok(value.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(resolve_env)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut resolved = serde_json::Map::with_capacity(fields.len());
            for (key, field) in fields {
                resolved.insert(key.clone(), resolve_env(field)?);
            }
            Ok(Value::Object(resolved))
        }
        _ => Ok(value.clone()),
    }
}
