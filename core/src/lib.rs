//! mcporter core: server definitions, the connection runtime, tool
//! filtering and result projection.

pub mod config;
mod context;
pub mod definition;
pub mod flags;
pub mod projection;
mod runtime;

pub use context::BuildOptions;
pub use context::ClientContext;
pub use context::build_client_context;
pub use definition::ADHOC_SOURCE_PATH;
pub use definition::AuthScheme;
pub use definition::DefinitionSource;
pub use definition::Lifecycle;
pub use definition::ResultPick;
pub use definition::ServerCommand;
pub use definition::ServerDefinition;
pub use definition::SourceKind;
pub use runtime::ListToolsOptions;
pub use runtime::Runtime;
pub use runtime::ToolSummary;

pub use mcporter_rmcp_client::Classification;
pub use mcporter_rmcp_client::ErrorKind;
pub use mcporter_rmcp_client::OAuthTimeoutError;
pub use mcporter_rmcp_client::OperationTimeoutError;
pub use mcporter_rmcp_client::classify_error;
