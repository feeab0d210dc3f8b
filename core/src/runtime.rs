//! The process-wide runtime: definition registry, per-server connection
//! cache, tool filtering, and result projection.
//!
//! One [`ClientContext`] exists per server name at most. Operations that
//! touch a given server are serialized behind its entry lock; operations
//! across servers run concurrently.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use anyhow::anyhow;
use rmcp::model::CallToolResult;
use rmcp::model::Tool;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::warn;

use crate::context::BuildOptions;
use crate::context::ClientContext;
use crate::context::build_client_context;
use crate::context::is_forcible_close_error;
use crate::definition::Lifecycle;
use crate::definition::ServerDefinition;
use crate::flags;
use crate::projection::project_value;

#[derive(Debug, Clone)]
pub struct ToolSummary {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
}

pub struct ListToolsOptions {
    /// When `false`, a 401 is terminal: no OAuth session is ever opened.
    pub auto_authorize: bool,
    pub include_schema: bool,
}

impl Default for ListToolsOptions {
    fn default() -> Self {
        Self {
            auto_authorize: true,
            include_schema: false,
        }
    }
}

struct ServerState {
    definition: ServerDefinition,
    context: Option<ClientContext>,
}

struct ServerEntry {
    state: Mutex<ServerState>,
}

/// Owned by whoever drives the process (the CLI, a test); not a global.
pub struct Runtime {
    servers: RwLock<HashMap<String, Arc<ServerEntry>>>,
    launch_browser: bool,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            launch_browser: true,
        }
    }

    /// Tests drive the authorization URL by hand instead of a browser.
    pub fn without_browser_launch(mut self) -> Self {
        self.launch_browser = false;
        self
    }

    pub async fn register_definition(
        &self,
        definition: ServerDefinition,
        overwrite: bool,
    ) -> Result<()> {
        let mut servers = self.servers.write().await;
        if let Some(existing) = servers.get(&definition.name) {
            if !overwrite {
                return Err(anyhow!(
                    "server `{}` is already registered",
                    definition.name
                ));
            }
            // Replacing a definition invalidates any live connection built
            // from the old one.
            let mut state = existing.state.lock().await;
            if let Some(context) = state.context.take() {
                context.close();
            }
        }
        let name = definition.name.clone();
        servers.insert(
            name,
            Arc::new(ServerEntry {
                state: Mutex::new(ServerState {
                    definition,
                    context: None,
                }),
            }),
        );
        Ok(())
    }

    pub async fn get_definitions(&self) -> Vec<ServerDefinition> {
        let servers = self.servers.read().await;
        let mut definitions = Vec::with_capacity(servers.len());
        for entry in servers.values() {
            definitions.push(entry.state.lock().await.definition.clone());
        }
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub async fn get_definition(&self, name: &str) -> Option<ServerDefinition> {
        let entry = self.servers.read().await.get(name).cloned()?;
        let state = entry.state.lock().await;
        Some(state.definition.clone())
    }

    pub async fn has_live_context(&self, name: &str) -> bool {
        let Some(entry) = self.servers.read().await.get(name).cloned() else {
            return false;
        };
        let state = entry.state.lock().await;
        state.context.is_some()
    }

    pub async fn list_tools(
        &self,
        name: &str,
        options: &ListToolsOptions,
    ) -> Result<Vec<ToolSummary>> {
        let entry = self.entry(name).await?;
        let mut state = entry.state.lock().await;
        self.ensure_context(&mut state, options.auto_authorize)
            .await?;
        let client = state
            .context
            .as_ref()
            .map(|context| Arc::clone(&context.client))
            .ok_or_else(|| anyhow!("no connection for `{name}`"))?;

        let listed = client.list_tools(Some(flags::list_timeout())).await;
        let tools = self.after_operation(&mut state, listed)?;

        let filtered = filter_tools(tools, &state.definition);
        let summaries = filtered
            .into_iter()
            .map(|tool| ToolSummary {
                name: tool.name.to_string(),
                description: tool.description.as_ref().map(|d| d.to_string()),
                input_schema: options
                    .include_schema
                    .then(|| Value::Object((*tool.input_schema).clone())),
                output_schema: options.include_schema.then(|| {
                    tool.output_schema
                        .as_ref()
                        .map(|schema| Value::Object((**schema).clone()))
                }).flatten(),
            })
            .collect();

        self.finish_operation(&mut state);
        Ok(summaries)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        args: Option<Value>,
    ) -> Result<Value> {
        let entry = self.entry(name).await?;
        let mut state = entry.state.lock().await;
        self.ensure_context(&mut state, true).await?;
        let client = state
            .context
            .as_ref()
            .map(|context| Arc::clone(&context.client))
            .ok_or_else(|| anyhow!("no connection for `{name}`"))?;

        if !tool_allowed(tool, &state.definition) {
            return Err(anyhow!("tool `{tool}` is disabled for server `{name}`"));
        }

        let called = client
            .call_tool(tool, args, Some(flags::call_timeout()))
            .await;
        let result = self.after_operation(&mut state, called)?;

        let value = match state.definition.result_mapping.get(tool) {
            Some(mapping) if !mapping.pick.is_empty() => {
                project_value(&extract_json_content(&result), &mapping.pick)
            }
            _ => serde_json::to_value(&result)?,
        };

        self.finish_operation(&mut state);
        Ok(value)
    }

    /// Close one cached context, or all of them.
    pub async fn close(&self, name: Option<&str>) {
        let entries: Vec<Arc<ServerEntry>> = {
            let servers = self.servers.read().await;
            match name {
                Some(name) => servers.get(name).cloned().into_iter().collect(),
                None => servers.values().cloned().collect(),
            }
        };
        for entry in entries {
            let mut state = entry.state.lock().await;
            if let Some(context) = state.context.take() {
                debug!(server = %state.definition.name, "closing MCP connection");
                context.close();
            }
        }
    }

    async fn entry(&self, name: &str) -> Result<Arc<ServerEntry>> {
        self.servers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown MCP server '{name}'"))
    }

    async fn ensure_context(&self, state: &mut ServerState, auto_authorize: bool) -> Result<()> {
        if state.context.is_some() {
            return Ok(());
        }
        let options = BuildOptions {
            max_oauth_attempts: if auto_authorize {
                mcporter_rmcp_client::DEFAULT_MAX_OAUTH_ATTEMPTS
            } else {
                0
            },
            launch_browser: self.launch_browser,
            ..BuildOptions::default()
        };
        let context = build_client_context(&state.definition, &options).await?;
        // Write back a promoted definition so later connects skip the probe.
        if context.definition.auth != state.definition.auth {
            state.definition = context.definition.clone();
        }
        state.context = Some(context);
        Ok(())
    }

    /// Unwraps an operation result, forcibly tearing the connection down on
    /// deadline expiry so the next operation starts clean.
    fn after_operation<T>(&self, state: &mut ServerState, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                if is_forcible_close_error(&error) {
                    if let Some(context) = state.context.take() {
                        warn!(
                            server = %state.definition.name,
                            "operation timed out, closing connection"
                        );
                        context.close();
                    }
                }
                Err(error)
            }
        }
    }

    /// Ephemeral servers do not linger after an operation completes.
    fn finish_operation(&self, state: &mut ServerState) {
        if state.definition.lifecycle == Lifecycle::Ephemeral {
            if let Some(context) = state.context.take() {
                context.close();
            }
        }
    }
}

fn tool_allowed(tool: &str, definition: &ServerDefinition) -> bool {
    if let Some(allowed) = &definition.allowed_tools {
        return allowed.iter().any(|name| name == tool);
    }
    if let Some(blocked) = &definition.blocked_tools {
        return !blocked.iter().any(|name| name == tool);
    }
    true
}

/// Allow-list takes precedence; names outside it are silently dropped.
fn filter_tools(tools: Vec<Tool>, definition: &ServerDefinition) -> Vec<Tool> {
    if let Some(allowed) = &definition.allowed_tools {
        let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
        return tools
            .into_iter()
            .filter(|tool| allowed.contains(tool.name.as_ref()))
            .collect();
    }
    if let Some(blocked) = &definition.blocked_tools {
        let blocked: HashSet<&str> = blocked.iter().map(String::as_str).collect();
        return tools
            .into_iter()
            .filter(|tool| !blocked.contains(tool.name.as_ref()))
            .collect();
    }
    tools
}

/// The JSON content of a tool response: structured content when present,
/// otherwise the first text block that parses as JSON, otherwise the whole
/// response serialized.
fn extract_json_content(result: &CallToolResult) -> Value {
    if let Some(structured) = &result.structured_content {
        return structured.clone();
    }
    for content in &result.content {
        let Ok(serialized) = serde_json::to_value(content) else {
            continue;
        };
        if let Some(text) = serialized.get("text").and_then(Value::as_str) {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                return parsed;
            }
        }
    }
    serde_json::to_value(result).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ServerDefinition;
    use pretty_assertions::assert_eq;
    use std::borrow::Cow;
    use std::sync::Arc as StdArc;

    fn tool(name: &str) -> Tool {
        let schema: rmcp::model::JsonObject =
            serde_json::from_value(serde_json::json!({ "type": "object" }))
                .expect("schema deserializes");
        Tool::new(
            Cow::Owned(name.to_string()),
            Cow::Borrowed("test tool"),
            StdArc::new(schema),
        )
    }

    fn definition_with_filters(
        allowed: Option<Vec<&str>>,
        blocked: Option<Vec<&str>>,
    ) -> ServerDefinition {
        let mut definition = ServerDefinition::adhoc_http("filters", "http://127.0.0.1:1/");
        definition.allowed_tools =
            allowed.map(|names| names.into_iter().map(str::to_string).collect());
        definition.blocked_tools =
            blocked.map(|names| names.into_iter().map(str::to_string).collect());
        definition
    }

    #[test]
    fn allow_list_takes_precedence_over_block_list() {
        let definition = definition_with_filters(Some(vec!["keep"]), Some(vec!["keep", "other"]));
        let names: Vec<String> = filter_tools(vec![tool("keep"), tool("other")], &definition)
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        assert_eq!(names, vec!["keep".to_string()]);

        assert!(tool_allowed("keep", &definition));
        assert!(!tool_allowed("other", &definition));
    }

    #[test]
    fn block_list_applies_without_allow_list() {
        let definition = definition_with_filters(None, Some(vec!["blocked"]));
        let names: Vec<String> = filter_tools(vec![tool("blocked"), tool("open")], &definition)
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        assert_eq!(names, vec!["open".to_string()]);
    }

    #[test]
    fn no_filters_pass_everything() {
        let definition = definition_with_filters(None, None);
        assert_eq!(filter_tools(vec![tool("a"), tool("b")], &definition).len(), 2);
        assert!(tool_allowed("anything", &definition));
    }

    #[test]
    fn extract_json_prefers_structured_content() {
        let result = CallToolResult {
            content: Vec::new(),
            structured_content: Some(serde_json::json!({ "id": 1 })),
            is_error: Some(false),
            meta: None,
        };
        assert_eq!(extract_json_content(&result), serde_json::json!({ "id": 1 }));
    }

    #[tokio::test]
    async fn register_definition_enforces_overwrite() {
        let runtime = Runtime::new();
        let definition = ServerDefinition::adhoc_http("dup", "http://127.0.0.1:1/");
        runtime
            .register_definition(definition.clone(), false)
            .await
            .expect("first registration");
        let error = runtime
            .register_definition(definition.clone(), false)
            .await
            .expect_err("duplicate must be rejected");
        assert!(error.to_string().contains("already registered"));

        let mut replacement = definition.clone();
        replacement.description = Some("v2".to_string());
        runtime
            .register_definition(replacement.clone(), true)
            .await
            .expect("overwrite succeeds");
        assert_eq!(
            runtime.get_definition("dup").await,
            Some(replacement),
        );
    }

    #[tokio::test]
    async fn unknown_servers_are_reported_by_name() {
        let runtime = Runtime::new();
        let error = runtime
            .list_tools("ghost", &ListToolsOptions::default())
            .await
            .expect_err("unknown server");
        assert!(error.to_string().contains("unknown MCP server 'ghost'"));
    }

    #[tokio::test]
    async fn close_without_contexts_is_a_no_op() {
        let runtime = Runtime::new();
        runtime
            .register_definition(
                ServerDefinition::adhoc_http("idle", "http://127.0.0.1:1/"),
                false,
            )
            .await
            .expect("register");
        runtime.close(Some("idle")).await;
        runtime.close(None).await;
        assert!(!runtime.has_live_context("idle").await);
    }
}
