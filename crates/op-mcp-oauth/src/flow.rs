//! Authorization-code-with-PKCE flow driver, built on the `oauth2` crate.

use crate::state::{ClientInfo, Tokens};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use tracing::debug;

/// Endpoints and client identity needed to drive one package's flow.
pub struct FlowConfig {
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
}

/// In-memory state for a single in-progress flow: the PKCE verifier and
/// CSRF token generated at `start()`, consumed by `finish()`.
pub struct PendingFlow {
    pub authorize_url: String,
    pub csrf_token: String,
    verifier: PkceCodeVerifier,
    client: BasicClient,
}

fn build_client(cfg: &FlowConfig) -> Result<BasicClient> {
    let client = BasicClient::new(
        ClientId::new(cfg.client_id.clone()),
        cfg.client_secret.clone().map(ClientSecret::new),
        AuthUrl::new(cfg.auth_url.clone()).context("invalid auth_url")?,
        Some(TokenUrl::new(cfg.token_url.clone()).context("invalid token_url")?),
    )
    .set_redirect_uri(RedirectUrl::new(cfg.redirect_url.clone()).context("invalid redirect_url")?);
    Ok(client)
}

/// Begin a flow: generate PKCE verifier/challenge and CSRF state, and
/// build the browser authorization URL. The caller opens `authorize_url`
/// and awaits the callback listener for the resulting code.
pub fn start(cfg: &FlowConfig) -> Result<PendingFlow> {
    let client = build_client(cfg)?;
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut request = client
        .authorize_url(CsrfToken::new_random)
        .set_pkce_challenge(pkce_challenge);
    for scope in &cfg.scopes {
        request = request.add_scope(Scope::new(scope.clone()));
    }
    let (authorize_url, csrf_token) = request.url();

    Ok(PendingFlow {
        authorize_url: authorize_url.to_string(),
        csrf_token: csrf_token.secret().clone(),
        verifier: pkce_verifier,
        client,
    })
}

/// Exchange the authorization code for tokens. Per the HTTP client
/// invariant, this is always a one-shot: the caller constructs a fresh
/// transport afterward rather than reusing this flow object.
pub async fn finish(pending: PendingFlow, code: String) -> Result<Tokens> {
    debug!("exchanging authorization code for tokens");
    let token_response = pending
        .client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pending.verifier)
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .context("token exchange failed")?;

    let expires_in = token_response
        .expires_in()
        .unwrap_or(std::time::Duration::from_secs(3600));

    Ok(Tokens {
        access: token_response.access_token().secret().clone(),
        refresh: token_response.refresh_token().map(|t| t.secret().clone()),
        token_type: "Bearer".to_string(),
        expires_at: Utc::now() + ChronoDuration::from_std(expires_in).unwrap_or(ChronoDuration::seconds(3600)),
        scope: token_response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" ")),
    })
}

/// Refresh an access token using a previously persisted refresh token.
pub async fn refresh(cfg: &FlowConfig, tokens: &Tokens) -> Result<Tokens> {
    let refresh_token = tokens
        .refresh
        .as_ref()
        .context("no refresh token available")?;
    let client = build_client(cfg)?;
    let token_response = client
        .exchange_refresh_token(&oauth2::RefreshToken::new(refresh_token.clone()))
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .context("token refresh failed")?;

    let expires_in = token_response
        .expires_in()
        .unwrap_or(std::time::Duration::from_secs(3600));

    Ok(Tokens {
        access: token_response.access_token().secret().clone(),
        refresh: token_response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| tokens.refresh.clone()),
        token_type: "Bearer".to_string(),
        expires_at: Utc::now() + ChronoDuration::from_std(expires_in).unwrap_or(ChronoDuration::seconds(3600)),
        scope: tokens.scope.clone(),
    })
}

/// Minimal dynamic client registration (RFC 7591), used when a package
/// declares `oauth: true` but no static `client_id`. Best-effort: servers
/// that don't support DCR will fail this call and the package falls back
/// to requiring a manually configured client id.
pub async fn register_client(registration_endpoint: &str, redirect_url: &str) -> Result<ClientInfo> {
    let http = reqwest::Client::new();
    let body = serde_json::json!({
        "redirect_uris": [redirect_url],
        "token_endpoint_auth_method": "none",
        "grant_types": ["authorization_code", "refresh_token"],
        "response_types": ["code"],
        "client_name": "op-mcp-gateway",
    });
    let resp = http
        .post(registration_endpoint)
        .json(&body)
        .send()
        .await
        .context("dynamic client registration request failed")?;
    let value: serde_json::Value = resp.json().await.context("invalid DCR response")?;
    let client_id = value
        .get("client_id")
        .and_then(|v| v.as_str())
        .context("DCR response missing client_id")?
        .to_string();
    let client_secret = value
        .get("client_secret")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Ok(ClientInfo {
        client_id,
        client_secret,
        extra: value,
    })
}
