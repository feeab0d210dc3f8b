//! The connect-retry-after-auth loop.
//!
//! Attempts a connection, classifies failures, and, when the server
//! demands authorization and an OAuth session is on hand, drives the
//! interactive flow before retrying. Bounded by an attempt budget and the
//! OAuth deadline.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time;
use tracing::debug;

use crate::error::OAuthTimeoutError;
use crate::error::classify_error;
use crate::oauth::session::OauthSession;
use crate::rmcp_client::RmcpClient;
use crate::transport::PendingTransport;

pub const DEFAULT_MAX_OAUTH_ATTEMPTS: u32 = 3;
pub const DEFAULT_OAUTH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ConnectOptions {
    pub server_name: String,
    pub max_attempts: u32,
    pub oauth_timeout: Duration,
    pub startup_timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            max_attempts: DEFAULT_MAX_OAUTH_ATTEMPTS,
            oauth_timeout: DEFAULT_OAUTH_TIMEOUT,
            startup_timeout: None,
        }
    }
}

/// Connect, converting at most `max_attempts` unauthorized failures into
/// one terminal outcome. `make_transport` is invoked once per attempt
/// because rmcp transports are consumed by the handshake; completing the
/// authorization between attempts persists fresh tokens, which the next
/// transport build picks up.
pub async fn connect_with_auth<F, Fut>(
    make_transport: F,
    session: Option<&OauthSession>,
    options: &ConnectOptions,
) -> Result<RmcpClient>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<PendingTransport>>,
{
    let mut auth_attempts: u32 = 0;

    loop {
        let transport = make_transport().await?;
        let error = match RmcpClient::connect(
            &options.server_name,
            transport,
            options.startup_timeout,
        )
        .await
        {
            Ok(client) => return Ok(client),
            Err(error) => error,
        };

        let classification = classify_error(&error);
        let Some(session) = session else {
            return Err(error);
        };
        if !classification.is_auth() {
            return Err(error);
        }

        auth_attempts += 1;
        if auth_attempts > options.max_attempts {
            return Err(error);
        }
        debug!(
            server = %options.server_name,
            attempt = auth_attempts,
            "server demanded authorization, starting OAuth flow"
        );

        if let Err(auth_error) = session.begin_authorization().await {
            // Registration died before a browser could even open; surface
            // that instead of a bare 401.
            return Err(auth_error.context(
                "OAuth flow failed before a browser authorization could begin",
            ));
        }

        let code = match time::timeout(
            options.oauth_timeout,
            session.wait_for_authorization_code(),
        )
        .await
        {
            Ok(Ok(code)) => code,
            Ok(Err(wait_error)) => return Err(wait_error),
            Err(_) => {
                return Err(OAuthTimeoutError {
                    server_name: options.server_name.clone(),
                    timeout_ms: options.oauth_timeout.as_millis() as u64,
                }
                .into());
            }
        };

        session.finish_auth(&code).await?;
    }
}
