//! Building a live [`ClientContext`] for a server definition: transport
//! selection, the cached-bearer fast path, OAuth bootstrap on 401, and
//! falling back from streamable HTTP to SSE.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use mcporter_rmcp_client::ConnectOptions;
use mcporter_rmcp_client::OAuthTimeoutError;
use mcporter_rmcp_client::OauthSession;
use mcporter_rmcp_client::OauthSessionConfig;
use mcporter_rmcp_client::RmcpClient;
use mcporter_rmcp_client::TokenVault;
use mcporter_rmcp_client::classify_error;
use mcporter_rmcp_client::connect_with_auth;
use mcporter_rmcp_client::oauth::discovery;
use mcporter_rmcp_client::oauth::refresh::refresh_access_token;
use mcporter_rmcp_client::placeholder::resolve_env_map;
use mcporter_rmcp_client::transport::HttpSpec;
use mcporter_rmcp_client::transport::StdioSpec;
use mcporter_rmcp_client::transport::build_sse_transport;
use mcporter_rmcp_client::transport::build_stdio_transport;
use mcporter_rmcp_client::transport::build_streamable_http_transport;
use tracing::debug;
use tracing::info;
use url::Url;

use crate::definition::AuthScheme;
use crate::definition::ServerCommand;
use crate::definition::ServerDefinition;
use crate::flags;

pub struct BuildOptions {
    /// Try a persisted bearer (refreshing silently when stale) before any
    /// interactive flow.
    pub allow_cached_auth: bool,
    /// `0` means never open an OAuth session, even on 401.
    pub max_oauth_attempts: u32,
    pub oauth_timeout: Duration,
    pub startup_timeout: Option<Duration>,
    pub launch_browser: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            allow_cached_auth: true,
            max_oauth_attempts: mcporter_rmcp_client::DEFAULT_MAX_OAUTH_ATTEMPTS,
            oauth_timeout: flags::oauth_timeout(),
            startup_timeout: None,
            launch_browser: true,
        }
    }
}

/// A live client plus the definition it was built from (possibly with
/// `auth` promoted) and the OAuth session keeping its loopback listener
/// alive for the lifetime of the connection.
pub struct ClientContext {
    pub client: Arc<RmcpClient>,
    pub definition: ServerDefinition,
    session: Option<Arc<OauthSession>>,
}

impl ClientContext {
    pub fn close(&self) {
        self.client.close();
        if let Some(session) = &self.session {
            session.close();
        }
    }
}

pub async fn build_client_context(
    definition: &ServerDefinition,
    options: &BuildOptions,
) -> Result<ClientContext> {
    match &definition.command {
        ServerCommand::Stdio {
            exe,
            args,
            cwd,
            env,
        } => {
            let resolved_env = resolve_env_map(env)
                .with_context(|| format!("invalid env for server `{}`", definition.name))?;
            let spec = StdioSpec {
                exe: exe.clone(),
                args: args.clone(),
                cwd: cwd.clone(),
                env: resolved_env,
            };
            let transport = build_stdio_transport(&definition.name, &spec)?;
            let client =
                RmcpClient::connect(&definition.name, transport, options.startup_timeout).await?;
            Ok(ClientContext {
                client: Arc::new(client),
                definition: definition.clone(),
                session: None,
            })
        }
        ServerCommand::Http { url, headers } => {
            build_http_context(definition, url, headers, options).await
        }
    }
}

async fn build_http_context(
    definition: &ServerDefinition,
    url: &str,
    headers: &std::collections::HashMap<String, String>,
    options: &BuildOptions,
) -> Result<ClientContext> {
    let http = reqwest::Client::new();
    let parsed_url = Url::parse(url)
        .with_context(|| format!("invalid url for server `{}`: {url}", definition.name))?;
    let resolved_headers = resolve_env_map(headers)
        .with_context(|| format!("invalid headers for server `{}`", definition.name))?;

    let mut definition = definition.clone();

    // Fast path: a cached or silently refreshed bearer avoids the whole
    // interactive dance.
    if options.allow_cached_auth && definition.auth == Some(AuthScheme::OAuth) {
        let vault = TokenVault::new(&definition.token_cache_dir(), &definition.name);
        if vault.read_cached_access_token().is_none() {
            let discovered = discovery::discover(&http, &parsed_url).await;
            if refresh_access_token(&http, &parsed_url, &vault, discovered.token_endpoint())
                .await
                .is_some()
            {
                debug!(server = %definition.name, "silently refreshed OAuth access token");
            }
        }
    }

    loop {
        let session = if definition.auth == Some(AuthScheme::OAuth)
            && options.max_oauth_attempts != 0
        {
            let session = OauthSession::create(
                OauthSessionConfig {
                    server_name: definition.name.clone(),
                    server_url: parsed_url.clone(),
                    token_cache_dir: definition.token_cache_dir(),
                    client_name: definition.client_name.clone(),
                    redirect_url: definition
                        .oauth_redirect_url
                        .as_deref()
                        .map(Url::parse)
                        .transpose()
                        .with_context(|| {
                            format!("invalid oauth redirect url for `{}`", definition.name)
                        })?,
                    launch_browser: options.launch_browser,
                },
                http.clone(),
            )
            .await?;
            Some(Arc::new(session))
        } else {
            None
        };

        let vault = TokenVault::new(&definition.token_cache_dir(), &definition.name);
        let use_bearer = definition.auth == Some(AuthScheme::OAuth);
        let connect_options = ConnectOptions {
            server_name: definition.name.clone(),
            max_attempts: options.max_oauth_attempts.max(1),
            oauth_timeout: options.oauth_timeout,
            startup_timeout: options.startup_timeout,
        };

        let spec_for = |endpoint: String| {
            let headers = resolved_headers.clone();
            let bearer = use_bearer
                .then(|| vault.read_cached_access_token())
                .flatten();
            HttpSpec {
                url: endpoint,
                headers,
                bearer_token: bearer,
            }
        };

        // Streamable HTTP first.
        let streamable_url = url.to_string();
        let streamable_result = connect_with_auth(
            || async { build_streamable_http_transport(&spec_for(streamable_url.clone())) },
            session.as_deref(),
            &connect_options,
        )
        .await;

        let streamable_error = match streamable_result {
            Ok(client) => {
                return Ok(ClientContext {
                    client: Arc::new(client),
                    definition,
                    session,
                });
            }
            Err(error) => error,
        };
        if streamable_error.downcast_ref::<OAuthTimeoutError>().is_some() {
            close_session(&session);
            return Err(streamable_error);
        }

        let session_for_sse = if classify_error(&streamable_error).is_auth() {
            close_session(&session);
            if let Some(promoted) = maybe_enable_oauth(&definition, &http).await {
                info!(server = %definition.name, "server demands authorization, enabling OAuth");
                definition = promoted;
                continue;
            }
            None
        } else {
            debug!(
                server = %definition.name,
                "streamable HTTP failed ({streamable_error:#}), falling back to SSE"
            );
            session.clone()
        };

        // SSE fallback with the same options (and the same session when it
        // is still live).
        let sse_url = url.to_string();
        let sse_result = connect_with_auth(
            || async { build_sse_transport(&spec_for(sse_url.clone())).await },
            session_for_sse.as_deref(),
            &connect_options,
        )
        .await;

        match sse_result {
            Ok(client) => {
                return Ok(ClientContext {
                    client: Arc::new(client),
                    definition,
                    session: session_for_sse,
                });
            }
            Err(error) => {
                if error.downcast_ref::<OAuthTimeoutError>().is_none()
                    && classify_error(&error).is_auth()
                    && options.max_oauth_attempts != 0
                {
                    close_session(&session_for_sse);
                    if let Some(promoted) = maybe_enable_oauth(&definition, &http).await {
                        info!(
                            server = %definition.name,
                            "server demands authorization, enabling OAuth"
                        );
                        definition = promoted;
                        continue;
                    }
                }
                close_session(&session_for_sse);
                // Prefer the streamable error when SSE never got further.
                if classify_error(&streamable_error).is_auth() {
                    return Err(streamable_error);
                }
                return Err(error);
            }
        }
    }
}

fn close_session(session: &Option<Arc<OauthSession>>) {
    if let Some(session) = session {
        session.close();
    }
}

/// Flip `auth` to `"oauth"` when the server plausibly supports it: ad-hoc
/// definitions promote directly; configured ones only after the
/// protected-resource probe advertises an authorization server.
async fn maybe_enable_oauth(
    definition: &ServerDefinition,
    http: &reqwest::Client,
) -> Option<ServerDefinition> {
    if definition.auth.is_some() {
        return None;
    }
    let ServerCommand::Http { url, .. } = &definition.command else {
        return None;
    };
    if definition.source.is_adhoc() {
        return Some(definition.with_oauth());
    }
    let parsed = Url::parse(url).ok()?;
    let metadata = discovery::fetch_protected_resource_metadata(http, &parsed).await?;
    let advertises_as = metadata
        .authorization_servers
        .as_ref()
        .is_some_and(|servers| !servers.is_empty());
    advertises_as.then(|| definition.with_oauth())
}

/// Errors the runtime treats as "close the context and rebuild next time".
pub(crate) fn is_forcible_close_error(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<mcporter_rmcp_client::OperationTimeoutError>()
        .is_some()
}
