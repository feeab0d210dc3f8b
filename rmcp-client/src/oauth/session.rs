//! Interactive OAuth 2.0 authorization for a single server.
//!
//! An [`OauthSession`] owns a loopback HTTP listener that captures the
//! authorization-code redirect, the PKCE material and state nonce for one
//! authorization attempt, and the dynamic-registration/token-exchange calls
//! against the authorization server. Sessions are transient: one per
//! authorization attempt, closed when the surrounding connection build
//! completes or fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use tiny_http::Server;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::oauth::discovery;
use crate::oauth::discovery::OAuthDiscovery;
use crate::oauth::vault::ClearScope;
use crate::oauth::vault::StoredClientInfo;
use crate::oauth::vault::StoredTokens;
use crate::oauth::vault::TokenVault;

/// Stable loopback port tried first so dynamic client registrations stay
/// valid across runs.
pub const DEFAULT_OAUTH_PORT: u16 = 33418;
pub const DEFAULT_CLIENT_URI: &str = "https://mcporter.dev";

/// Environment knobs for servers whose registration endpoint sits behind a
/// shared secret.
pub const REGISTRATION_HEADER_ENV: &str = "MCPORTER_OAUTH_REGISTRATION_HEADER";
pub const REGISTRATION_TOKEN_ENV: &str = "MCPORTER_OAUTH_REGISTRATION_TOKEN";

const REGISTRATION_PREVIEW_LIMIT: usize = 500;
const DEFAULT_GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token"];

pub struct OauthSessionConfig {
    pub server_name: String,
    pub server_url: Url,
    pub token_cache_dir: PathBuf,
    pub client_name: Option<String>,
    pub redirect_url: Option<Url>,
    /// Disabled in tests; the authorization URL is always printed either way.
    pub launch_browser: bool,
}

/// Cross-task rendezvous for the authorization code: exactly one resolution
/// or rejection per pending wait.
#[derive(Default)]
struct Rendezvous {
    sender: Option<oneshot::Sender<Result<String, String>>>,
    receiver: Option<oneshot::Receiver<Result<String, String>>>,
}

impl Rendezvous {
    fn fresh(&mut self) {
        let (tx, rx) = oneshot::channel();
        self.sender = Some(tx);
        self.receiver = Some(rx);
    }

    fn ensure(&mut self) {
        if self.sender.is_none() && self.receiver.is_none() {
            self.fresh();
        }
    }

    fn resolve(&mut self, code: String) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Ok(code));
        }
    }

    fn reject(&mut self, message: impl Into<String>) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(message.into()));
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CallbackOutcome {
    NotFound,
    InvalidState,
    Code(String),
    ProviderError(String),
    MissingCode,
}

fn evaluate_callback(
    expected_path: &str,
    persisted_state: Option<&str>,
    raw_url: &str,
) -> CallbackOutcome {
    let Ok(parsed) = Url::parse(&format!("http://127.0.0.1{raw_url}")) else {
        return CallbackOutcome::NotFound;
    };
    let path = parsed.path();
    let path_matches = path == expected_path || (expected_path == "/" && path == "/callback");
    if !path_matches {
        return CallbackOutcome::NotFound;
    }

    let mut code = None;
    let mut error = None;
    let mut state = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    if let (Some(received), Some(expected)) = (state.as_deref(), persisted_state) {
        if received != expected {
            return CallbackOutcome::InvalidState;
        }
    }
    if let Some(code) = code {
        return CallbackOutcome::Code(code);
    }
    if let Some(error) = error {
        return CallbackOutcome::ProviderError(error);
    }
    CallbackOutcome::MissingCode
}

fn html_response(status: u16, body: String) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let mut response = tiny_http::Response::from_string(body).with_status_code(status);
    if let Ok(header) =
        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
    {
        response.add_header(header);
    }
    response
}

fn spawn_callback_server(
    server: Arc<Server>,
    expected_path: String,
    vault: TokenVault,
    pending: Arc<StdMutex<Rendezvous>>,
) {
    tokio::task::spawn_blocking(move || {
        while let Ok(request) = server.recv() {
            let outcome = evaluate_callback(
                &expected_path,
                vault.read_state().as_deref(),
                request.url(),
            );
            let response = match outcome {
                CallbackOutcome::NotFound => html_response(404, "<p>Not found.</p>".to_string()),
                CallbackOutcome::InvalidState => {
                    if let Ok(mut guard) = pending.lock() {
                        guard.reject("Invalid OAuth state");
                    }
                    html_response(400, "<p>Invalid OAuth state</p>".to_string())
                }
                CallbackOutcome::Code(code) => {
                    if let Ok(mut guard) = pending.lock() {
                        guard.resolve(code);
                    }
                    html_response(
                        200,
                        "<p>Authorization complete. You may close this window.</p>".to_string(),
                    )
                }
                CallbackOutcome::ProviderError(error) => {
                    if let Ok(mut guard) = pending.lock() {
                        guard.reject(format!("OAuth error: {error}"));
                    }
                    html_response(400, format!("<p>OAuth error: {error}</p>"))
                }
                CallbackOutcome::MissingCode => {
                    if let Ok(mut guard) = pending.lock() {
                        guard.reject("Missing authorization code");
                    }
                    html_response(400, "<p>Missing authorization code</p>".to_string())
                }
            };
            if let Err(error) = request.respond(response) {
                warn!("failed to respond to OAuth callback: {error}");
            }
        }
    });
}

pub struct OauthSession {
    server_name: String,
    server_url: Url,
    vault: TokenVault,
    http: reqwest::Client,
    listener: Arc<Server>,
    redirect_url: String,
    /// Extra URIs included in the registration when the loopback default is
    /// in play, so a registration outlives the stable-port fallback.
    extra_redirect_uris: Vec<String>,
    scope: String,
    grant_types: Vec<String>,
    discovery: OAuthDiscovery,
    client_name: String,
    launch_browser: bool,
    pending: Arc<StdMutex<Rendezvous>>,
    started_authorization: AtomicBool,
    closed: AtomicBool,
}

impl OauthSession {
    pub async fn create(config: OauthSessionConfig, http: reqwest::Client) -> Result<Self> {
        let vault = TokenVault::new(&config.token_cache_dir, &config.server_name);

        let (listener, redirect_url, used_loopback_default) = match &config.redirect_url {
            Some(redirect) => {
                let host = redirect.host_str().unwrap_or("127.0.0.1");
                let port = redirect.port().unwrap_or(DEFAULT_OAUTH_PORT);
                let listener = Server::http(format!("{host}:{port}"))
                    .map_err(|error| anyhow!("failed to bind OAuth callback listener: {error}"))?;
                (listener, redirect.to_string(), false)
            }
            None => match Server::http(format!("127.0.0.1:{DEFAULT_OAUTH_PORT}")) {
                Ok(listener) => (
                    listener,
                    format!("http://127.0.0.1:{DEFAULT_OAUTH_PORT}/"),
                    true,
                ),
                Err(_) => {
                    // Stable port busy; let the OS pick one.
                    let listener = Server::http("127.0.0.1:0").map_err(|error| {
                        anyhow!("failed to bind OAuth callback listener: {error}")
                    })?;
                    let port = listener_port(&listener)?;
                    (listener, format!("http://127.0.0.1:{port}/"), true)
                }
            },
        };

        let expected_path = Url::parse(&redirect_url)
            .map(|parsed| parsed.path().to_string())
            .unwrap_or_else(|_| "/".to_string());

        let extra_redirect_uris = if used_loopback_default {
            vec![
                "http://127.0.0.1/".to_string(),
                format!("http://127.0.0.1:{DEFAULT_OAUTH_PORT}/"),
            ]
        } else {
            Vec::new()
        };

        let discovered = discovery::discover(&http, &config.server_url).await;
        let scope = discovery::resolve_oauth_scope(&discovered, None);
        let grant_types = resolve_grant_types(&discovered);

        let client_name = config
            .client_name
            .clone()
            .unwrap_or_else(|| format!("mcporter ({})", config.server_name));

        let pending = Arc::new(StdMutex::new(Rendezvous::default()));
        let listener = Arc::new(listener);
        spawn_callback_server(
            Arc::clone(&listener),
            expected_path,
            vault.clone(),
            Arc::clone(&pending),
        );

        info!(
            server = %config.server_name,
            redirect = %redirect_url,
            vault = %vault.describe(),
            "OAuth session ready"
        );

        Ok(Self {
            server_name: config.server_name,
            server_url: config.server_url,
            vault,
            http,
            listener,
            redirect_url,
            extra_redirect_uris,
            scope,
            grant_types,
            discovery: discovered,
            client_name,
            launch_browser: config.launch_browser,
            pending,
            started_authorization: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    pub fn did_start_authorization(&self) -> bool {
        self.started_authorization.load(Ordering::SeqCst)
    }

    /// Persisted state nonce, minted on first use.
    pub fn state(&self) -> Result<String> {
        if let Some(state) = self.vault.read_state() {
            return Ok(state);
        }
        let state = uuid::Uuid::new_v4().to_string();
        self.vault.save_state(&state)?;
        Ok(state)
    }

    pub fn client_metadata(&self) -> serde_json::Value {
        let mut redirect_uris = vec![self.redirect_url.clone()];
        for uri in &self.extra_redirect_uris {
            if !redirect_uris.contains(uri) {
                redirect_uris.push(uri.clone());
            }
        }
        json!({
            "client_name": self.client_name,
            "client_uri": DEFAULT_CLIENT_URI,
            "redirect_uris": redirect_uris,
            "grant_types": self.grant_types,
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
            "application_type": "native",
            "scope": self.scope,
        })
    }

    fn authorization_endpoint(&self) -> Result<Url> {
        if let Some(meta) = &self.discovery.authorization_server {
            return Url::parse(&meta.authorization_endpoint)
                .context("authorization server advertised an invalid authorization_endpoint");
        }
        self.origin().join("/authorize").map_err(Into::into)
    }

    fn token_endpoint(&self) -> Result<Url> {
        if let Some(meta) = &self.discovery.authorization_server {
            return Url::parse(&meta.token_endpoint)
                .context("authorization server advertised an invalid token_endpoint");
        }
        self.origin().join("/token").map_err(Into::into)
    }

    fn registration_endpoint(&self) -> Result<Url> {
        if let Some(endpoint) = self
            .discovery
            .authorization_server
            .as_ref()
            .and_then(|meta| meta.registration_endpoint.as_ref())
        {
            return Url::parse(endpoint)
                .context("authorization server advertised an invalid registration_endpoint");
        }
        let mut fallback = self.authorization_endpoint()?;
        fallback.set_path("/register");
        fallback.set_query(None);
        Ok(fallback)
    }

    fn origin(&self) -> Url {
        let mut origin = self.server_url.clone();
        origin.set_path("");
        origin.set_query(None);
        origin.set_fragment(None);
        origin
    }

    fn resource_value(&self) -> Option<String> {
        self.discovery
            .resource
            .as_ref()
            .and_then(|meta| meta.resource.clone())
    }

    /// Dynamic client registration (RFC 7591), skipped when a registration
    /// is already persisted.
    pub async fn ensure_client_registered(&self) -> Result<StoredClientInfo> {
        if let Some(info) = self.vault.read_client_info() {
            return Ok(info);
        }

        let endpoint = self.registration_endpoint()?;
        let metadata = self.client_metadata();

        let preview = metadata.to_string();
        let preview = if preview.chars().count() > REGISTRATION_PREVIEW_LIMIT {
            let truncated: String = preview.chars().take(REGISTRATION_PREVIEW_LIMIT).collect();
            format!("{truncated}...")
        } else {
            preview
        };
        debug!("registering OAuth client at {endpoint}: {preview}");

        let mut request = self.http.post(endpoint.clone()).json(&metadata);
        if let Ok(token) = std::env::var(REGISTRATION_TOKEN_ENV) {
            let header = std::env::var(REGISTRATION_HEADER_ENV)
                .unwrap_or_else(|_| "Authorization".to_string());
            let value = if header.eq_ignore_ascii_case("Authorization") {
                format!("Bearer {token}")
            } else {
                token
            };
            request = request.header(header, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("dynamic client registration against {endpoint} failed"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!(
                "dynamic client registration against {endpoint} returned {status}: {body}"
            ));
        }

        let info: StoredClientInfo = serde_json::from_str(&body)
            .with_context(|| format!("could not parse registration response from {endpoint}"))?;
        self.vault.save_client_info(&info)?;
        info!(
            server = %self.server_name,
            client_id = %info.client_id,
            "registered OAuth client"
        );
        Ok(info)
    }

    /// Start an authorization attempt: register if needed, mint PKCE + state,
    /// open the browser (best effort) and arm a fresh pending code.
    pub async fn begin_authorization(&self) -> Result<Url> {
        let client_info = self.ensure_client_registered().await?;

        let (verifier, challenge) = pkce_pair();
        self.vault.save_code_verifier(&verifier)?;
        let state = self.state()?;

        let mut auth_url = self.authorization_endpoint()?;
        auth_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &client_info.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", &state);
        if !self.scope.is_empty() {
            auth_url.query_pairs_mut().append_pair("scope", &self.scope);
        }
        if let Some(resource) = self.resource_value() {
            auth_url.query_pairs_mut().append_pair("resource", &resource);
        }

        if let Ok(mut guard) = self.pending.lock() {
            guard.fresh();
        }
        self.started_authorization.store(true, Ordering::SeqCst);

        println!(
            "Authorize `{}` by opening this URL in your browser:\n{auth_url}\n",
            self.server_name
        );
        if self.launch_browser && webbrowser::open(auth_url.as_str()).is_err() {
            println!("(Browser launch failed; please copy the URL above manually.)");
        }

        Ok(auth_url)
    }

    /// Wait for the loopback handler to deliver an authorization code. The
    /// caller bounds this with its own deadline.
    pub async fn wait_for_authorization_code(&self) -> Result<String> {
        let receiver = {
            let mut guard = self
                .pending
                .lock()
                .map_err(|_| anyhow!("OAuth session state poisoned"))?;
            guard.ensure();
            guard
                .receiver
                .take()
                .ok_or_else(|| anyhow!("authorization code already consumed"))?
        };

        match receiver.await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(message)) => Err(anyhow!(message)),
            Err(_) => Err(anyhow!(
                "OAuth session closed before receiving authorization code"
            )),
        }
    }

    /// Exchange the authorization code for tokens and persist them. The PKCE
    /// verifier is consumed: cleared once the exchange succeeds.
    pub async fn finish_auth(&self, code: &str) -> Result<()> {
        let verifier = self
            .vault
            .read_code_verifier()
            .ok_or_else(|| anyhow!("missing PKCE verifier for `{}`", self.server_name))?;
        let client_info = self
            .vault
            .read_client_info()
            .ok_or_else(|| anyhow!("no registered OAuth client for `{}`", self.server_name))?;

        let endpoint = self.token_endpoint()?;
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.redirect_url.clone()),
            ("client_id", client_info.client_id.clone()),
            ("code_verifier", verifier),
        ];
        if let Some(secret) = &client_info.client_secret {
            params.push(("client_secret", secret.clone()));
        }
        if let Some(resource) = self.resource_value() {
            params.push(("resource", resource));
        }

        let response = self
            .http
            .post(endpoint.clone())
            .form(&params)
            .send()
            .await
            .with_context(|| format!("token exchange against {endpoint} failed"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!(
                "token exchange against {endpoint} returned {status}: {body}"
            ));
        }
        let tokens: StoredTokens = serde_json::from_str(&body)
            .with_context(|| format!("could not parse token response from {endpoint}"))?;

        self.vault.save_tokens(&tokens)?;
        self.vault.clear(ClearScope::Verifier)?;
        info!(server = %self.server_name, "OAuth tokens saved to {}", self.vault.describe());
        Ok(())
    }

    /// Idempotent: rejects any pending wait and unblocks the listener.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.pending.lock() {
            guard.reject("OAuth session closed before receiving authorization code");
        }
        self.listener.unblock();
    }
}

impl Drop for OauthSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn listener_port(listener: &Server) -> Result<u16> {
    match listener.server_addr() {
        tiny_http::ListenAddr::IP(addr) => Ok(addr.port()),
        #[cfg(unix)]
        _ => Err(anyhow!("unable to determine OAuth callback address")),
    }
}

fn resolve_grant_types(discovery: &OAuthDiscovery) -> Vec<String> {
    let defaults: Vec<String> = DEFAULT_GRANT_TYPES.iter().map(|s| (*s).to_string()).collect();
    let Some(advertised) = discovery
        .authorization_server
        .as_ref()
        .and_then(|meta| meta.grant_types_supported.as_ref())
    else {
        return defaults;
    };
    let intersection: Vec<String> = defaults
        .iter()
        .filter(|grant| advertised.contains(*grant))
        .cloned()
        .collect();
    if intersection.is_empty() {
        defaults
    } else {
        intersection
    }
}

fn pkce_pair() -> (String, String) {
    let mut verifier_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut verifier_bytes);
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);
    (verifier, challenge)
}
