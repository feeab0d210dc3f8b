//! Silent token refresh.
//!
//! Only attempted when a persisted `refresh_token` and `client_id` exist.
//! Failures never propagate; the caller just falls through to the
//! interactive flow.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::oauth::vault::StoredTokens;
use crate::oauth::vault::TokenVault;

/// Endpoints probed when authorization-server metadata is unavailable. The
/// last entry is a metadata URL rather than a token endpoint; it is kept as
/// a defensive fallback for servers that serve token exchanges there.
const FALLBACK_TOKEN_PATHS: &[&str] = &[
    "/oauth2/token",
    "/token",
    "/.well-known/oauth-authorization-server",
];

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Exchange the persisted refresh token for a new access token. Prefers the
/// AS-advertised token endpoint when one is known; otherwise walks the
/// hardcoded candidates at the server origin. Returns the new access token,
/// or `None` when no silent refresh is possible.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    server_url: &Url,
    vault: &TokenVault,
    token_endpoint: Option<&str>,
) -> Option<String> {
    let tokens = vault.read_tokens()?;
    let refresh_token = tokens.refresh_token.clone()?;
    let client_info = vault.read_client_info()?;

    let candidates: Vec<String> = match token_endpoint {
        Some(endpoint) => vec![endpoint.to_string()],
        None => {
            let mut origin = server_url.clone();
            origin.set_path("");
            origin.set_query(None);
            origin.set_fragment(None);
            FALLBACK_TOKEN_PATHS
                .iter()
                .filter_map(|path| origin.join(path).ok())
                .map(String::from)
                .collect()
        }
    };

    for endpoint in candidates {
        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.clone()),
            ("client_id", client_info.client_id.clone()),
        ];
        if let Some(secret) = &client_info.client_secret {
            params.push(("client_secret", secret.clone()));
        }

        let response = match http.post(&endpoint).form(&params).send().await {
            Ok(response) => response,
            Err(error) => {
                debug!("token refresh against {endpoint} failed to send: {error}");
                continue;
            }
        };
        if !response.status().is_success() {
            debug!(
                "token refresh against {endpoint} returned {}",
                response.status()
            );
            continue;
        }
        let refreshed = match response.json::<RefreshResponse>().await {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!("token refresh response from {endpoint} did not parse: {error}");
                continue;
            }
        };

        let updated = StoredTokens {
            access_token: refreshed.access_token.clone(),
            // Servers may rotate the refresh token; keep the old one when
            // the response omits it.
            refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
            expires_in: refreshed.expires_in,
            token_type: refreshed.token_type.or(tokens.token_type),
            scope: refreshed.scope.or(tokens.scope),
        };
        if let Err(error) = vault.save_tokens(&updated) {
            debug!("failed to persist refreshed tokens: {error}");
        }
        return Some(refreshed.access_token);
    }

    None
}
