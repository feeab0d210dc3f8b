use std::time::Duration;

use anyhow::Result;
use anyhow::anyhow;
use rmcp::model::CallToolRequestParam;
use rmcp::model::CallToolResult;
use rmcp::model::Tool;
use rmcp::service::RoleClient;
use rmcp::service::RunningService;
use rmcp::service::{self};
use serde_json::Value;
use tokio::time;
use tracing::debug;

use crate::logging_client_handler::LoggingClientHandler;
use crate::transport::PendingTransport;
use crate::utils::run_with_timeout;

/// MCP client implemented on top of the official `rmcp` SDK.
/// https://github.com/modelcontextprotocol/rust-sdk
pub struct RmcpClient {
    server_name: String,
    service: RunningService<RoleClient, LoggingClientHandler>,
}

impl RmcpClient {
    /// Drive the MCP initialization handshake over an already-built
    /// transport. The transport is consumed whether or not the handshake
    /// succeeds; retry loops construct a fresh one per attempt.
    pub async fn connect(
        server_name: &str,
        transport: PendingTransport,
        startup_timeout: Option<Duration>,
    ) -> Result<Self> {
        let handler = LoggingClientHandler::new(server_name);
        let handshake = async {
            match transport {
                PendingTransport::ChildProcess(transport) => {
                    service::serve_client(handler, transport).await
                }
                PendingTransport::StreamableHttp(transport) => {
                    service::serve_client(handler, transport).await
                }
                PendingTransport::Sse(transport) => {
                    service::serve_client(handler, transport).await
                }
            }
        };

        let service = match startup_timeout {
            Some(duration) => time::timeout(duration, handshake)
                .await
                .map_err(|_| anyhow!("timed out handshaking with MCP server after {duration:?}"))?
                .map_err(|err| anyhow!("handshaking with MCP server failed: {err}"))?,
            None => handshake
                .await
                .map_err(|err| anyhow!("handshaking with MCP server failed: {err}"))?,
        };

        if let Some(peer_info) = service.peer().peer_info() {
            debug!(
                server = server_name,
                "connected to {} {}",
                peer_info.server_info.name,
                peer_info.server_info.version
            );
        }

        Ok(Self {
            server_name: server_name.to_string(),
            service,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub async fn list_tools(&self, timeout: Option<Duration>) -> Result<Vec<Tool>> {
        let fut = self.service.list_all_tools();
        run_with_timeout(fut, timeout, "tools/list").await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult> {
        let arguments = match arguments {
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                return Err(anyhow!(
                    "MCP tool arguments must be a JSON object, got {other}"
                ));
            }
            None => None,
        };
        let params = CallToolRequestParam {
            meta: None,
            name: name.to_string().into(),
            arguments,
            task: None,
        };
        let fut = self.service.call_tool(params);
        run_with_timeout(fut, timeout, "tools/call").await
    }

    /// Shut the connection down. Idempotent; child processes die with the
    /// transport, descendants included via the process group.
    pub fn close(&self) {
        self.service.cancellation_token().cancel();
    }
}

impl Drop for RmcpClient {
    fn drop(&mut self) {
        self.close();
    }
}
