//! End-to-end stdio transport tests against the bundled test server.

use std::collections::HashMap;

use anyhow::Result;
use mcporter_rmcp_client::RmcpClient;
use mcporter_rmcp_client::transport::StdioSpec;
use mcporter_rmcp_client::transport::build_stdio_transport;
use pretty_assertions::assert_eq;

fn test_server_spec() -> StdioSpec {
    StdioSpec {
        exe: env!("CARGO_BIN_EXE_test_stdio_server").to_string(),
        args: Vec::new(),
        cwd: None,
        env: HashMap::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lists_and_calls_tools_over_stdio() -> Result<()> {
    let transport = build_stdio_transport("echo", &test_server_spec())?;
    let client = RmcpClient::connect("echo", transport, None).await?;

    let mut tools: Vec<String> = client
        .list_tools(None)
        .await?
        .into_iter()
        .map(|tool| tool.name.to_string())
        .collect();
    tools.sort();
    assert_eq!(tools, vec!["echo".to_string(), "get_user".to_string()]);

    let result = client
        .call_tool(
            "echo",
            Some(serde_json::json!({ "message": "hi" })),
            None,
        )
        .await?;
    assert_eq!(
        result.structured_content,
        Some(serde_json::json!({ "echo": "ECHOING: hi" }))
    );

    client.close();
    // Idempotent by contract.
    client.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejects_non_object_tool_arguments() -> Result<()> {
    let transport = build_stdio_transport("echo", &test_server_spec())?;
    let client = RmcpClient::connect("echo", transport, None).await?;

    let error = client
        .call_tool("echo", Some(serde_json::json!([1, 2])), None)
        .await
        .expect_err("array arguments are invalid");
    assert!(error.to_string().contains("must be a JSON object"));

    client.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_failure_names_the_missing_program() {
    let spec = StdioSpec {
        exe: "definitely-not-a-real-mcp-server".to_string(),
        args: Vec::new(),
        cwd: None,
        env: HashMap::new(),
    };
    let error = match build_stdio_transport("ghost", &spec) {
        Ok(_) => panic!("expected spawn to fail"),
        Err(error) => error,
    };
    assert!(error.to_string().contains("ghost"));
}
