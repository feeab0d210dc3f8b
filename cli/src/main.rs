//! mcporter: a command-line control plane for MCP servers.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use clap::Parser;
use clap::Subcommand;
use mcporter_core::ErrorKind;
use mcporter_core::ListToolsOptions;
use mcporter_core::Runtime;
use mcporter_core::ServerCommand;
use mcporter_core::ServerDefinition;
use mcporter_core::classify_error;
use mcporter_core::config::load_config_file;
use mcporter_rmcp_client::ClearScope;
use mcporter_rmcp_client::TokenVault;
use tracing_subscriber::EnvFilter;

/// Command-line control plane for MCP servers: list them, enumerate their
/// tools, call tools, and manage OAuth logins.
#[derive(Debug, Parser)]
#[command(name = "mcporter", version)]
struct Cli {
    /// Path to the server configuration (a JSON document with an
    /// `mcpServers` map).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured servers.
    List(ListArgs),

    /// List the tools of one server (connects, authorizing if needed).
    Tools(ToolsArgs),

    /// Invoke a tool on a server.
    Call(CallArgs),

    /// Run the OAuth authorization flow for a server.
    Login(LoginArgs),

    /// Drop persisted OAuth credentials for a server.
    Logout(LogoutArgs),
}

#[derive(Debug, Parser)]
struct ListArgs {
    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ToolsArgs {
    /// Server name from the configuration, or a bare URL for an ad-hoc
    /// server.
    server: String,

    /// Include input/output schemas.
    #[arg(long)]
    schema: bool,

    /// Output as JSON.
    #[arg(long)]
    json: bool,

    /// Fail instead of starting an interactive authorization.
    #[arg(long)]
    no_auth: bool,
}

#[derive(Debug, Parser)]
struct CallArgs {
    /// Server name from the configuration, or a bare URL.
    server: String,

    /// Tool to invoke.
    tool: String,

    /// Tool arguments as a JSON object.
    #[arg(long, value_name = "JSON")]
    args: Option<String>,
}

#[derive(Debug, Parser)]
struct LoginArgs {
    /// Server name from the configuration, or a bare URL.
    server: String,
}

#[derive(Debug, Parser)]
struct LogoutArgs {
    /// Server name from the configuration.
    server: String,
}

fn default_config_path() -> PathBuf {
    #[cfg(windows)]
    let home = std::env::var_os("USERPROFILE");
    #[cfg(not(windows))]
    let home = std::env::var_os("HOME");
    home.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcporter")
        .join("config.json")
}

async fn load_runtime(config: Option<&PathBuf>) -> Result<Runtime> {
    let runtime = Runtime::new();
    let path = config.cloned().unwrap_or_else(default_config_path);
    if path.exists() {
        for definition in load_config_file(&path)? {
            runtime.register_definition(definition, true).await?;
        }
    } else if config.is_some() {
        return Err(anyhow!("config file {} does not exist", path.display()));
    }
    Ok(runtime)
}

/// Bare URLs name servers that were never configured; register them as
/// ad-hoc definitions so the runtime can track promotion.
async fn resolve_server(runtime: &Runtime, server: &str) -> Result<String> {
    if runtime.get_definition(server).await.is_some() {
        return Ok(server.to_string());
    }
    if server.starts_with("http://") || server.starts_with("https://") {
        let definition = ServerDefinition::adhoc_http(server, server);
        runtime.register_definition(definition, true).await?;
        return Ok(server.to_string());
    }
    Err(anyhow!("unknown MCP server '{server}'"))
}

fn transport_label(definition: &ServerDefinition) -> String {
    match &definition.command {
        ServerCommand::Stdio { exe, .. } => format!("stdio ({exe})"),
        ServerCommand::Http { url, .. } => format!("http ({url})"),
    }
}

async fn run_list(runtime: &Runtime, args: ListArgs) -> Result<()> {
    let definitions = runtime.get_definitions().await;
    if args.json {
        let rows: Vec<serde_json::Value> = definitions
            .iter()
            .map(|definition| {
                serde_json::json!({
                    "name": definition.name,
                    "transport": transport_label(definition),
                    "auth": definition.auth.map(|_| "oauth"),
                    "source": definition.source.path,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if definitions.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }
    for definition in definitions {
        println!("{:<24} {}", definition.name, transport_label(&definition));
    }
    Ok(())
}

async fn run_tools(runtime: &Runtime, args: ToolsArgs) -> Result<()> {
    let name = resolve_server(runtime, &args.server).await?;
    let tools = runtime
        .list_tools(
            &name,
            &ListToolsOptions {
                auto_authorize: !args.no_auth,
                include_schema: args.schema,
            },
        )
        .await?;

    if args.json {
        let rows: Vec<serde_json::Value> = tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                    "outputSchema": tool.output_schema,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for tool in &tools {
            match &tool.description {
                Some(description) => println!("{:<32} {description}", tool.name),
                None => println!("{}", tool.name),
            }
        }
    }

    runtime.close(Some(&name)).await;
    Ok(())
}

async fn run_call(runtime: &Runtime, args: CallArgs) -> Result<()> {
    let name = resolve_server(runtime, &args.server).await?;
    let parsed_args = args
        .args
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("--args must be valid JSON")?;

    let response = runtime.call_tool(&name, &args.tool, parsed_args).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    runtime.close(Some(&name)).await;
    Ok(())
}

async fn run_login(runtime: &Runtime, args: LoginArgs) -> Result<()> {
    let name = resolve_server(runtime, &args.server).await?;
    let definition = runtime
        .get_definition(&name)
        .await
        .ok_or_else(|| anyhow!("unknown MCP server '{name}'"))?;
    if !definition.command.is_http() {
        return Err(anyhow!("server '{name}' does not use an HTTP transport"));
    }

    // Force the OAuth path: a 401 now drives the interactive flow.
    runtime
        .register_definition(definition.with_oauth(), true)
        .await?;
    let tools = runtime
        .list_tools(&name, &ListToolsOptions::default())
        .await?;
    println!("Logged in to '{name}' ({} tools available).", tools.len());

    runtime.close(Some(&name)).await;
    Ok(())
}

async fn run_logout(runtime: &Runtime, args: LogoutArgs) -> Result<()> {
    let definition = runtime
        .get_definition(&args.server)
        .await
        .ok_or_else(|| anyhow!("unknown MCP server '{}'", args.server))?;
    let vault = TokenVault::new(&definition.token_cache_dir(), &definition.name);
    vault.clear(ClearScope::All)?;
    println!("Cleared credentials for '{}' ({}).", args.server, vault.describe());
    Ok(())
}

fn exit_code_for(error: &anyhow::Error) -> u8 {
    match classify_error(error).kind {
        ErrorKind::Auth => 2,
        ErrorKind::Offline => 3,
        ErrorKind::Http(_) => 4,
        ErrorKind::Other => 1,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let runtime = load_runtime(cli.config.as_ref()).await?;
    let result = match cli.cmd {
        Command::List(args) => run_list(&runtime, args).await,
        Command::Tools(args) => run_tools(&runtime, args).await,
        Command::Call(args) => run_call(&runtime, args).await,
        Command::Login(args) => run_login(&runtime, args).await,
        Command::Logout(args) => run_logout(&runtime, args).await,
    };
    runtime.close(None).await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code: u8 = match run(cli).await {
        Ok(()) => 0,
        Err(error) => {
            let classified = classify_error(&error);
            match classified.kind {
                ErrorKind::Auth => eprintln!("auth required: {error:#}"),
                ErrorKind::Offline => eprintln!("offline: {error:#}"),
                ErrorKind::Http(status) => eprintln!("HTTP {status}: {error:#}"),
                ErrorKind::Other => eprintln!("error: {error:#}"),
            }
            exit_code_for(&error)
        }
    };

    // Lingering keep-alive transports can hold the runtime open; exit hard
    // unless the user opted out.
    if !mcporter_core::flags::no_force_exit() {
        std::process::exit(i32::from(code));
    }
    ExitCode::from(code)
}
