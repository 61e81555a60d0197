// Reference connectors built on the Switchboard tool contract.

pub mod customerio;
pub mod orchestrator;
pub mod quidco;
pub mod sentry;
pub mod transport;

use switchboard_core::{ConnectorDescriptor, ToolResult};

pub use transport::{Auth, ClientConfig, HttpTransport, ResponseBody, UpstreamResponse};

/// Every vendor connector in this crate. The orchestrator is left out because
/// it needs a dispatcher from the host.
pub fn builtin_connectors() -> ToolResult<Vec<ConnectorDescriptor>> {
    Ok(vec![
        customerio::connector()?,
        sentry::connector()?,
        quidco::connector()?,
    ])
}
