// Connector contract shared by every Switchboard integration:
// descriptors, tools, execution context, validation and invocation.

pub mod batch;
pub mod connector;
pub mod context;
pub mod error;
pub mod invoke;
pub mod schema;
pub mod tool;

pub use batch::{
    BatchExecutor, BatchOptions, BatchReport, BatchStep, CatalogEntry, StepOutcome, StepStatus,
    ToolDispatcher,
};
pub use connector::{ConnectorBuilder, ConnectorDescriptor, ConnectorInfo, ToolListing, ToolSummary};
pub use context::{credentials_as, setup_as, ExecutionContext, HostContext, MemoryStore};
pub use error::{ErrorKind, ToolError, ToolResult};
pub use invoke::{invoke, Invocation, InvocationError};
pub use tool::{parse_args, BinaryBlob, Tool, ToolContent, ToolDefinition, ToolOutput};
