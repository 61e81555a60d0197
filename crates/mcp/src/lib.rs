// MCP (Model Context Protocol) host for Switchboard connectors.
// Serves every registered connector's tools to agent clients over stdio.

pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;

pub use config::{ConnectorConfig, HostConfig};
pub use registry::ConnectorRegistry;
pub use server::McpServer;
