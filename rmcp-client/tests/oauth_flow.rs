//! OAuth flow tests against a fake authorization server.

use std::time::Duration;

use anyhow::Result;
use mcporter_rmcp_client::ConnectOptions;
use mcporter_rmcp_client::OAuthTimeoutError;
use mcporter_rmcp_client::OauthSession;
use mcporter_rmcp_client::OauthSessionConfig;
use mcporter_rmcp_client::connect_with_auth;
use mcporter_rmcp_client::transport::HttpSpec;
use mcporter_rmcp_client::transport::build_streamable_http_transport;
use pretty_assertions::assert_eq;
use url::Url;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::method;
use wiremock::matchers::path;

/// Wire up the RFC 9728 / RFC 8414 documents plus registration and token
/// endpoints on one fake server that also plays the MCP resource.
async fn mount_authorization_server(server: &MockServer) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": format!("{base}/"),
            "authorization_servers": [base],
            "scopes_supported": ["mcp:tools", "mcp:connect"],
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": base,
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "registration_endpoint": format!("{base}/register"),
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "scopes_supported": ["mcp:tools", "mcp:connect"],
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "client_id": "client-123",
            "token_endpoint_auth_method": "none",
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-e2e",
            "refresh_token": "rt-e2e",
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .mount(server)
        .await;
}

async fn session_for(server: &MockServer, dir: &std::path::Path) -> Result<OauthSession> {
    OauthSession::create(
        OauthSessionConfig {
            server_name: "fake".to_string(),
            server_url: Url::parse(&server.uri())?,
            token_cache_dir: dir.to_path_buf(),
            client_name: None,
            redirect_url: None,
            launch_browser: false,
        },
        reqwest::Client::new(),
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_authorization_flow_saves_tokens_and_clears_verifier() -> Result<()> {
    let server = MockServer::start().await;
    mount_authorization_server(&server).await;
    let dir = tempfile::tempdir()?;

    let session = session_for(&server, dir.path()).await?;
    assert_eq!(session.scope(), "mcp:tools");
    assert!(!session.did_start_authorization());

    let auth_url = session.begin_authorization().await?;
    assert!(session.did_start_authorization());
    let query = auth_url.query().unwrap_or_default();
    assert!(query.contains("client_id=client-123"));
    assert!(query.contains("code_challenge_method=S256"));
    assert!(session.vault().read_code_verifier().is_some());

    // Play the browser: hit the loopback callback with the right state.
    let state = session.vault().read_state().expect("state persisted");
    let callback = format!(
        "{}?code=authcode-1&state={}",
        session.redirect_url(),
        state
    );
    let response = reqwest::get(&callback).await?;
    assert_eq!(response.status().as_u16(), 200);

    let code = session.wait_for_authorization_code().await?;
    assert_eq!(code, "authcode-1");

    session.finish_auth(&code).await?;
    let tokens = session.vault().read_tokens().expect("tokens persisted");
    assert_eq!(tokens.access_token, "at-e2e");
    assert_eq!(tokens.refresh_token, Some("rt-e2e".to_string()));
    assert_eq!(session.vault().read_code_verifier(), None);

    session.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callback_with_wrong_state_rejects_the_wait() -> Result<()> {
    let server = MockServer::start().await;
    mount_authorization_server(&server).await;
    let dir = tempfile::tempdir()?;

    let session = session_for(&server, dir.path()).await?;
    session.begin_authorization().await?;

    let callback = format!("{}?code=evil&state=wrong", session.redirect_url());
    let response = reqwest::get(&callback).await?;
    assert_eq!(response.status().as_u16(), 400);

    let error = session
        .wait_for_authorization_code()
        .await
        .expect_err("state mismatch must reject");
    assert!(error.to_string().contains("Invalid OAuth state"));

    session.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_rejects_pending_wait_and_is_idempotent() -> Result<()> {
    let server = MockServer::start().await;
    mount_authorization_server(&server).await;
    let dir = tempfile::tempdir()?;

    let session = session_for(&server, dir.path()).await?;
    let wait = session.wait_for_authorization_code();
    session.close();
    session.close();

    let error = wait.await.expect_err("close rejects the pending wait");
    assert!(
        error
            .to_string()
            .contains("OAuth session closed before receiving authorization code")
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_times_out_with_oauth_timeout_error() -> Result<()> {
    let server = MockServer::start().await;
    mount_authorization_server(&server).await;
    // The MCP endpoint always demands authorization.
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir()?;

    let session = session_for(&server, dir.path()).await?;
    let url = format!("{}/mcp", server.uri());
    let mut options = ConnectOptions::new("x");
    options.oauth_timeout = Duration::from_millis(1000);

    let error = connect_with_auth(
        || async {
            build_streamable_http_transport(&HttpSpec {
                url: url.clone(),
                headers: Default::default(),
                bearer_token: None,
            })
        },
        Some(&session),
        &options,
    )
    .await
    .expect_err("nobody completes the authorization");

    let timeout = error
        .downcast_ref::<OAuthTimeoutError>()
        .expect("typed timeout error");
    assert_eq!(timeout.server_name, "x");
    assert_eq!(timeout.timeout_ms, 1000);

    session.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_registration_is_diagnosed_before_browser_launch() -> Result<()> {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "authorization_servers": [base],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "registration_endpoint": format!("{base}/register"),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir()?;

    let session = session_for(&server, dir.path()).await?;
    let url = format!("{}/mcp", server.uri());

    let error = connect_with_auth(
        || async {
            build_streamable_http_transport(&HttpSpec {
                url: url.clone(),
                headers: Default::default(),
                bearer_token: None,
            })
        },
        Some(&session),
        &ConnectOptions::new("fake"),
    )
    .await
    .expect_err("registration fails");

    assert!(
        error
            .to_string()
            .contains("OAuth flow failed before a browser authorization could begin")
    );
    assert!(!session.did_start_authorization());

    session.close();
    Ok(())
}
