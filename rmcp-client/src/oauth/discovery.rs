//! OAuth endpoint discovery: RFC 9728 protected-resource metadata and
//! RFC 8414 authorization-server metadata.
//!
//! Discovery is strictly best-effort. Every fetch runs under a short
//! deadline, failures are logged at debug level, and callers receive `None`
//! rather than an error.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

pub(crate) const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

pub const FALLBACK_SCOPE: &str = "mcp:tools";
const PREFERRED_SCOPES: &[&str] = &["mcp:tools", "mcp:connect"];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProtectedResourceMetadata {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub authorization_servers: Option<Vec<String>>,
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types_supported: Option<Vec<String>>,
}

/// Everything discovery could learn about a server's authorization setup.
#[derive(Debug, Clone, Default)]
pub struct OAuthDiscovery {
    pub resource: Option<ProtectedResourceMetadata>,
    pub authorization_server: Option<AuthServerMetadata>,
    /// The issuer the AS metadata came from (or the synthesized origin).
    pub authorization_server_url: Option<Url>,
}

impl OAuthDiscovery {
    pub fn token_endpoint(&self) -> Option<&str> {
        self.authorization_server
            .as_ref()
            .map(|meta| meta.token_endpoint.as_str())
    }
}

/// Strip query/fragment and trailing slash so the resource identifier is
/// stable across spellings of the same URL.
fn resource_identifier(server_url: &Url) -> Url {
    let mut url = server_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
    url
}

fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// RFC 9728 well-known URLs for a resource: the path-suffixed form first,
/// then the root form.
fn protected_resource_urls(resource: &Url) -> Vec<Url> {
    let mut urls = Vec::new();
    let path = resource.path().trim_end_matches('/');
    if !path.is_empty() && path != "/" {
        let mut with_path = origin_of(resource);
        with_path.set_path(&format!("/.well-known/oauth-protected-resource{path}"));
        urls.push(with_path);
    }
    let mut root = origin_of(resource);
    root.set_path("/.well-known/oauth-protected-resource");
    urls.push(root);
    urls
}

/// RFC 8414 metadata URLs for an issuer: OAuth AS metadata first, OIDC
/// configuration second.
fn auth_metadata_urls(issuer: &Url) -> Vec<Url> {
    if issuer.path().contains("/.well-known/") {
        return vec![issuer.clone()];
    }
    let issuer_path = issuer.path().trim_end_matches('/').to_string();
    let mut urls = Vec::new();

    let mut oauth = origin_of(issuer);
    if issuer_path.is_empty() || issuer_path == "/" {
        oauth.set_path("/.well-known/oauth-authorization-server");
    } else {
        oauth.set_path(&format!(
            "/.well-known/oauth-authorization-server{issuer_path}"
        ));
    }
    urls.push(oauth);

    let mut oidc = issuer.clone();
    if issuer_path.is_empty() || issuer_path == "/" {
        oidc.set_path("/.well-known/openid-configuration");
    } else {
        oidc.set_path(&format!("{issuer_path}/.well-known/openid-configuration"));
    }
    oidc.set_query(None);
    oidc.set_fragment(None);
    urls.push(oidc);

    urls
}

async fn fetch_json<T: for<'de> Deserialize<'de>>(http: &reqwest::Client, url: &Url) -> Option<T> {
    let response = match http
        .get(url.clone())
        .timeout(DISCOVERY_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            debug!("discovery fetch failed for {url}: {error}");
            return None;
        }
    };
    if !response.status().is_success() {
        debug!("discovery fetch for {url} returned {}", response.status());
        return None;
    }
    match response.json::<T>().await {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            debug!("discovery response from {url} did not parse: {error}");
            None
        }
    }
}

/// Fetch RFC 9728 metadata for `server_url`, trying both well-known forms.
pub async fn fetch_protected_resource_metadata(
    http: &reqwest::Client,
    server_url: &Url,
) -> Option<ProtectedResourceMetadata> {
    let resource = resource_identifier(server_url);
    for url in protected_resource_urls(&resource) {
        if let Some(meta) = fetch_json::<ProtectedResourceMetadata>(http, &url).await {
            return Some(meta);
        }
    }
    None
}

/// Full discovery: protected-resource metadata, then metadata of the first
/// advertised authorization server (or the synthesized origin).
pub async fn discover(http: &reqwest::Client, server_url: &Url) -> OAuthDiscovery {
    let resource_meta = fetch_protected_resource_metadata(http, server_url).await;

    let issuer = resource_meta
        .as_ref()
        .and_then(|meta| meta.authorization_servers.as_ref())
        .and_then(|servers| servers.first())
        .and_then(|raw| Url::parse(raw).ok())
        .unwrap_or_else(|| origin_of(server_url));

    let mut auth_meta = None;
    for url in auth_metadata_urls(&issuer) {
        if let Some(meta) = fetch_json::<AuthServerMetadata>(http, &url).await {
            auth_meta = Some(meta);
            break;
        }
    }

    if let (Some(resource), Some(auth)) = (&resource_meta, &auth_meta) {
        if let (Some(resource_scopes), Some(auth_scopes)) =
            (&resource.scopes_supported, &auth.scopes_supported)
        {
            let shared: Vec<&String> = resource_scopes
                .iter()
                .filter(|scope| auth_scopes.contains(scope))
                .collect();
            debug!("scopes advertised by both resource and AS: {shared:?}");
        }
    }

    OAuthDiscovery {
        resource: resource_meta,
        authorization_server: auth_meta,
        authorization_server_url: Some(issuer),
    }
}

/// Pick the scope to request. Total: always yields a non-empty string.
pub fn resolve_oauth_scope(discovery: &OAuthDiscovery, fallback: Option<&str>) -> String {
    let advertised = discovery
        .resource
        .as_ref()
        .and_then(|meta| meta.scopes_supported.as_ref())
        .or_else(|| {
            discovery
                .authorization_server
                .as_ref()
                .and_then(|meta| meta.scopes_supported.as_ref())
        });

    if let Some(scopes) = advertised {
        for preferred in PREFERRED_SCOPES {
            if scopes.iter().any(|scope| scope == preferred) {
                return (*preferred).to_string();
            }
        }
        if let Some(first) = scopes.iter().find(|scope| !scope.is_empty()) {
            return first.clone();
        }
    }

    fallback
        .filter(|scope| !scope.is_empty())
        .unwrap_or(FALLBACK_SCOPE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn discovery_with_scopes(scopes: Option<Vec<&str>>) -> OAuthDiscovery {
        OAuthDiscovery {
            resource: Some(ProtectedResourceMetadata {
                resource: None,
                authorization_servers: None,
                scopes_supported: scopes
                    .map(|scopes| scopes.into_iter().map(str::to_string).collect()),
            }),
            authorization_server: None,
            authorization_server_url: None,
        }
    }

    #[test]
    fn prefers_mcp_tools_scope() {
        let discovery = discovery_with_scopes(Some(vec!["mcp:connect", "mcp:tools", "email"]));
        assert_eq!(resolve_oauth_scope(&discovery, None), "mcp:tools");
    }

    #[test]
    fn falls_back_to_mcp_connect_then_first_advertised() {
        let discovery = discovery_with_scopes(Some(vec!["email", "mcp:connect"]));
        assert_eq!(resolve_oauth_scope(&discovery, None), "mcp:connect");

        let discovery = discovery_with_scopes(Some(vec!["email", "profile"]));
        assert_eq!(resolve_oauth_scope(&discovery, None), "email");
    }

    #[test]
    fn is_total_even_with_no_metadata() {
        let discovery = OAuthDiscovery::default();
        assert_eq!(resolve_oauth_scope(&discovery, None), "mcp:tools");
        assert_eq!(resolve_oauth_scope(&discovery, Some("custom")), "custom");
        assert_eq!(resolve_oauth_scope(&discovery, Some("")), "mcp:tools");

        let discovery = discovery_with_scopes(Some(vec![]));
        assert!(!resolve_oauth_scope(&discovery, None).is_empty());
    }

    #[test]
    fn protected_resource_urls_try_suffixed_form_first() {
        let resource = Url::parse("https://example.com/api/mcp").expect("url");
        let urls = protected_resource_urls(&resource);
        assert_eq!(
            urls[0].as_str(),
            "https://example.com/.well-known/oauth-protected-resource/api/mcp"
        );
        assert_eq!(
            urls[1].as_str(),
            "https://example.com/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn auth_metadata_urls_prefer_oauth_over_oidc() {
        let issuer = Url::parse("https://auth.example.com/").expect("url");
        let urls = auth_metadata_urls(&issuer);
        assert_eq!(
            urls[0].as_str(),
            "https://auth.example.com/.well-known/oauth-authorization-server"
        );
        assert_eq!(
            urls[1].as_str(),
            "https://auth.example.com/.well-known/openid-configuration"
        );
    }
}
