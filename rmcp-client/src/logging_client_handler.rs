use rmcp::handler::client::ClientHandler;
use rmcp::model::ClientCapabilities;
use rmcp::model::ClientInfo;
use rmcp::model::Implementation;
use rmcp::model::ProtocolVersion;
use rmcp::service::NotificationContext;
use rmcp::service::RoleClient;
use tracing::debug;
use tracing::info;

/// Client-side handler passed to `serve_client`: advertises who we are and
/// logs server notifications instead of dropping them on the floor.
#[derive(Clone)]
pub struct LoggingClientHandler {
    server_name: String,
}

impl LoggingClientHandler {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
        }
    }
}

impl ClientHandler for LoggingClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "mcporter".to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                title: Some("mcporter".into()),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }

    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        info!(server = %self.server_name, "MCP server reported a tool list change");
    }

    async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
        debug!(server = %self.server_name, "MCP server reported a resource list change");
    }

    async fn on_prompt_list_changed(&self, _context: NotificationContext<RoleClient>) {
        debug!(server = %self.server_name, "MCP server reported a prompt list change");
    }
}
