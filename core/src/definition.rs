//! Server definitions: the immutable entities the runtime is keyed by.

// Note this file should generally be restricted to simple struct/enum
// definitions plus their (de)serialization glue.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::de::Error as SerdeError;

use crate::flags;

/// Path sentinel marking a definition constructed on the fly (e.g. from a
/// bare URL on the command line) rather than loaded from configuration.
pub const ADHOC_SOURCE_PATH: &str = "<adhoc>";

#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    Stdio {
        exe: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
        /// May contain `$VAR` placeholders; resolved at transport creation.
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        /// May contain `$VAR` placeholders; resolved at transport creation.
        headers: HashMap<String, String>,
    },
}

impl ServerCommand {
    pub fn is_http(&self) -> bool {
        matches!(self, ServerCommand::Http { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    OAuth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    KeepAlive { idle_timeout_ms: Option<u64> },
    Ephemeral,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::KeepAlive {
            idle_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Global,
}

/// Where a definition came from, for logs and the ad-hoc sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSource {
    pub kind: SourceKind,
    pub path: String,
}

impl DefinitionSource {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Local,
            path: path.into(),
        }
    }

    pub fn adhoc() -> Self {
        Self::local(ADHOC_SOURCE_PATH)
    }

    pub fn is_adhoc(&self) -> bool {
        self.kind == SourceKind::Local && self.path == ADHOC_SOURCE_PATH
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultPick {
    pub pick: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerDefinition {
    pub name: String,
    pub description: Option<String>,
    pub command: ServerCommand,
    pub auth: Option<AuthScheme>,
    pub token_cache_dir: Option<PathBuf>,
    pub client_name: Option<String>,
    pub oauth_redirect_url: Option<String>,
    /// When set, only these tools are exposed; takes precedence over
    /// `blocked_tools`.
    pub allowed_tools: Option<Vec<String>>,
    pub blocked_tools: Option<Vec<String>>,
    pub result_mapping: HashMap<String, ResultPick>,
    pub lifecycle: Lifecycle,
    pub source: DefinitionSource,
}

impl ServerDefinition {
    /// An unconfigured, URL-driven definition.
    pub fn adhoc_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            command: ServerCommand::Http {
                url: url.into(),
                headers: HashMap::new(),
            },
            auth: None,
            token_cache_dir: None,
            client_name: None,
            oauth_redirect_url: None,
            allowed_tools: None,
            blocked_tools: None,
            result_mapping: HashMap::new(),
            lifecycle: Lifecycle::default(),
            source: DefinitionSource::adhoc(),
        }
    }

    pub fn token_cache_dir(&self) -> PathBuf {
        self.token_cache_dir
            .clone()
            .unwrap_or_else(flags::default_token_cache_dir)
    }

    /// The promoted form of this definition, after observing that the
    /// server demands authorization.
    pub fn with_oauth(&self) -> Self {
        let mut promoted = self.clone();
        promoted.auth = Some(AuthScheme::OAuth);
        promoted
    }
}

/// One value of the `mcpServers` map. Both camelCase and snake_case
/// spellings are accepted for the multi-word fields.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawServerEntry {
    #[serde(default)]
    pub description: Option<String>,

    // stdio
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    // streamable-http / sse
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default, alias = "tokenCacheDir")]
    pub token_cache_dir: Option<PathBuf>,
    #[serde(default, alias = "clientName")]
    pub client_name: Option<String>,
    #[serde(default, alias = "oauthRedirectUrl")]
    pub oauth_redirect_url: Option<String>,
    #[serde(default, alias = "allowedTools")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, alias = "blockedTools")]
    pub blocked_tools: Option<Vec<String>>,
    #[serde(default, alias = "resultMapping")]
    pub result_mapping: Option<HashMap<String, ResultPick>>,
    #[serde(default)]
    pub lifecycle: Option<RawLifecycle>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawLifecycle {
    pub mode: String,
    #[serde(default, alias = "idleTimeoutMs")]
    pub idle_timeout_ms: Option<u64>,
}

impl RawServerEntry {
    pub(crate) fn into_definition<E>(
        self,
        name: &str,
        source: DefinitionSource,
    ) -> Result<ServerDefinition, E>
    where
        E: SerdeError,
    {
        let command = match (self.command, self.url) {
            (Some(exe), None) => ServerCommand::Stdio {
                exe,
                args: self.args.unwrap_or_default(),
                cwd: self.cwd,
                env: self.env.unwrap_or_default(),
            },
            (None, Some(url)) => {
                if self.args.is_some() {
                    return Err(E::custom(format!(
                        "server `{name}`: args is not supported for url servers"
                    )));
                }
                ServerCommand::Http {
                    url,
                    headers: self.headers.unwrap_or_default(),
                }
            }
            (Some(_), Some(_)) => {
                return Err(E::custom(format!(
                    "server `{name}`: specify either url or command, not both"
                )));
            }
            (None, None) => {
                return Err(E::custom(format!(
                    "server `{name}`: one of url or command is required"
                )));
            }
        };

        let auth = match self.auth.as_deref() {
            None => None,
            Some("oauth") => Some(AuthScheme::OAuth),
            Some(other) => {
                return Err(E::custom(format!(
                    "server `{name}`: unknown auth scheme `{other}`"
                )));
            }
        };

        let lifecycle = match self.lifecycle {
            None => Lifecycle::default(),
            Some(raw) => match raw.mode.as_str() {
                "keep-alive" | "keepAlive" | "keep_alive" => Lifecycle::KeepAlive {
                    idle_timeout_ms: raw.idle_timeout_ms,
                },
                "ephemeral" => Lifecycle::Ephemeral,
                other => {
                    return Err(E::custom(format!(
                        "server `{name}`: unknown lifecycle mode `{other}`"
                    )));
                }
            },
        };

        Ok(ServerDefinition {
            name: name.to_string(),
            description: self.description,
            command,
            auth,
            token_cache_dir: self.token_cache_dir,
            client_name: self.client_name,
            oauth_redirect_url: self.oauth_redirect_url,
            allowed_tools: self.allowed_tools,
            blocked_tools: self.blocked_tools,
            result_mapping: self.result_mapping.unwrap_or_default(),
            lifecycle,
            source,
        })
    }
}
