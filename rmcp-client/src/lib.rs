//! MCP client runtime: transports, OAuth, and the connect-with-auth loop.
//!
//! Given the ingredients of a server definition this crate yields a live,
//! authenticated [`RmcpClient`] over stdio, streamable-HTTP, or SSE, with
//! OAuth bootstrap (PKCE, dynamic registration, loopback redirect capture)
//! and silent token refresh handled along the way. The MCP wire protocol
//! itself is the official `rmcp` SDK's business.

mod connect;
mod error;
mod logging_client_handler;
pub mod oauth;
pub mod placeholder;
mod rmcp_client;
pub mod transport;
mod utils;

pub use connect::ConnectOptions;
pub use connect::DEFAULT_MAX_OAUTH_ATTEMPTS;
pub use connect::DEFAULT_OAUTH_TIMEOUT;
pub use connect::connect_with_auth;
pub use error::Classification;
pub use error::ErrorKind;
pub use error::OAuthTimeoutError;
pub use error::OperationTimeoutError;
pub use error::classify_error;
pub use logging_client_handler::LoggingClientHandler;
pub use oauth::discovery::fetch_protected_resource_metadata;
pub use oauth::discovery::resolve_oauth_scope;
pub use oauth::session::OauthSession;
pub use oauth::session::OauthSessionConfig;
pub use oauth::vault::ClearScope;
pub use oauth::vault::StoredClientInfo;
pub use oauth::vault::StoredTokens;
pub use oauth::vault::TokenVault;
pub use rmcp_client::RmcpClient;
