//! Construction of the concrete `rmcp` client transports.
//!
//! Stdio spawns the server as a child process with a resolved environment
//! merged over the parent's; streamable-HTTP and SSE ride on a `reqwest`
//! client carrying the resolved headers (and bearer, when one is cached).

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use anyhow::Result;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use rmcp::transport::SseClientTransport;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::info;
use tracing::warn;

/// A transport that has been constructed but not yet handed to
/// `serve_client`. rmcp transports are consumed on connect, so retry loops
/// rebuild one of these per attempt.
/// Log every spawned stdio command line when set.
pub const STDIO_TRACE_ENV: &str = "MCPORTER_STDIO_TRACE";
/// Child stderr is drained onto the log unless this is set to `0`/`false`.
pub const STDIO_LOGS_ENV: &str = "MCPORTER_STDIO_LOGS";

pub enum PendingTransport {
    ChildProcess(TokioChildProcess),
    StreamableHttp(StreamableHttpClientTransport<reqwest::Client>),
    Sse(SseClientTransport<reqwest::Client>),
}

fn env_flag_disabled(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("0") | Ok("false") | Ok("off")
    )
}

pub struct StdioSpec {
    pub exe: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Already placeholder-resolved; merged over the parent environment.
    pub env: HashMap<String, String>,
}

pub struct HttpSpec {
    pub url: String,
    /// Already placeholder-resolved.
    pub headers: HashMap<String, String>,
    pub bearer_token: Option<String>,
}

/// Resolve a bare program name against PATH (honoring a PATH override in
/// the merged env) so spawn failures name the real problem.
fn resolve_program(exe: &str, env: &HashMap<String, String>) -> io::Result<PathBuf> {
    let candidate = Path::new(exe);
    if candidate.components().count() > 1 {
        return Ok(candidate.to_path_buf());
    }
    let path_override = env.get("PATH").cloned();
    let cwd = std::env::current_dir().ok();
    which::which_in(exe, path_override, cwd.unwrap_or_else(|| PathBuf::from(".")))
        .map_err(|err| io::Error::new(io::ErrorKind::NotFound, format!("{exe}: {err}")))
}

pub fn build_stdio_transport(server_name: &str, spec: &StdioSpec) -> Result<PendingTransport> {
    let mut merged: HashMap<String, String> = std::env::vars().collect();
    for (key, value) in &spec.env {
        merged.insert(key.clone(), value.clone());
    }

    let resolved = resolve_program(&spec.exe, &merged)
        .with_context(|| format!("could not resolve command for MCP server `{server_name}`"))?;

    if std::env::var(STDIO_TRACE_ENV).is_ok() && !env_flag_disabled(STDIO_TRACE_ENV) {
        info!(
            "spawning MCP server `{server_name}`: {} {}",
            resolved.display(),
            spec.args.join(" ")
        );
    }

    let mut command = Command::new(resolved);
    command
        .kill_on_drop(true)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .env_clear()
        .envs(&merged)
        .args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let (transport, stderr) = TokioChildProcess::builder(command)
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn MCP server `{server_name}`"))?;

    if let Some(stderr) = stderr {
        if env_flag_disabled(STDIO_LOGS_ENV) {
            drop(stderr);
            return Ok(PendingTransport::ChildProcess(transport));
        }
        let server_name = server_name.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        info!("MCP server stderr ({server_name}): {line}");
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!("failed to read MCP server stderr ({server_name}): {error}");
                        break;
                    }
                }
            }
        });
    }

    Ok(PendingTransport::ChildProcess(transport))
}

fn build_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .with_context(|| format!("invalid header name `{key}`"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for `{key}`"))?;
        map.insert(name, value);
    }
    Ok(map)
}

pub fn build_http_client(spec: &HttpSpec) -> Result<reqwest::Client> {
    let mut headers = build_header_map(&spec.headers)?;
    if let Some(token) = &spec.bearer_token {
        if !headers.contains_key(reqwest::header::AUTHORIZATION) {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("cached bearer token is not a valid header value")?,
            );
        }
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .context("failed to build HTTP client")
}

pub fn build_streamable_http_transport(spec: &HttpSpec) -> Result<PendingTransport> {
    let client = build_http_client(spec)?;
    let config = StreamableHttpClientTransportConfig::with_uri(spec.url.clone());
    Ok(PendingTransport::StreamableHttp(
        StreamableHttpClientTransport::with_client(client, config),
    ))
}

pub async fn build_sse_transport(spec: &HttpSpec) -> Result<PendingTransport> {
    let client = build_http_client(spec)?;
    let transport = SseClientTransport::start_with_client(
        client,
        SseClientConfig {
            sse_endpoint: spec.url.clone().into(),
            ..Default::default()
        },
    )
    .await
    .with_context(|| format!("failed to open SSE stream to {}", spec.url))?;
    Ok(PendingTransport::Sse(transport))
}
