//! Azure AD identity provider: OAuth2 authorization code with PKCE for
//! interactive sign-in, refresh-token grant for silent acquisition.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::callback_server::{CallbackResult, CallbackServer};
use super::provider::{Account, IdentityProvider, TokenGrant};
use crate::cache::secure::{AccessToken, RefreshToken};
use crate::cache::CredentialCache;
use crate::config::OAuthConfig;
use crate::error::{AuthError, CacheError};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Scopes always requested alongside the caller's: ID token and refresh token.
const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// AADSTS codes meaning the app registration or tenant is wrong.
const CONFIGURATION_ERROR_CODES: [u32; 2] = [700016, 90002];

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (kept locally, sent in the token exchange).
    pub verifier: String,
    /// BASE64URL(SHA256(verifier)), sent in the authorization request.
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let verifier = random_url_safe(32);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

fn random_url_safe(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Identity provider backed by the Microsoft identity platform v2 endpoints.
pub struct AzureAdProvider {
    client_id: String,
    authorize_url: Url,
    token_url: Url,
    redirect_uri: Url,
    callback_timeout: Duration,
    http_client: reqwest::Client,
    cache: CredentialCache,
}

impl AzureAdProvider {
    /// Create a provider from configuration.
    ///
    /// Malformed endpoint URLs are reported as [`AuthError::Configuration`].
    pub fn new(config: &OAuthConfig, cache: CredentialCache) -> Result<Self, AuthError> {
        let parse = |what: &str, raw: &str| {
            Url::parse(raw).map_err(|e| AuthError::Configuration(format!("invalid {} {:?}: {}", what, raw, e)))
        };

        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client_id: config.client_id.clone(),
            authorize_url: parse("authority", &config.authorize_url())?,
            token_url: parse("authority", &config.token_url())?,
            redirect_uri: parse("redirect URI", &config.redirect_uri)?,
            callback_timeout: config.callback_timeout(),
            http_client,
            cache,
        })
    }

    /// Build the authorization URL for browser-based sign-in.
    pub fn authorization_url(&self, scopes: &[String], pkce: &PkceChallenge, state: &str) -> Url {
        let mut url = self.authorize_url.clone();

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("response_mode", "query")
            .append_pair("scope", &scope_string(scopes))
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("prompt", "select_account");

        url
    }

    /// Exchange an authorization code for tokens.
    async fn redeem_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = scope_string(scopes);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", scope.as_str()),
        ];

        self.token_request(&params).await
    }

    /// Redeem a refresh token for a new access token.
    async fn redeem_refresh_token(
        &self,
        refresh_token: &RefreshToken,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = scope_string(scopes);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("scope", scope.as_str()),
        ];

        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_token_error(status.as_u16(), &body);
            // Log error details for debugging (doesn't expose to user)
            error!("Token request failed: HTTP {} - {}", status, err);
            return Err(err);
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("Invalid token response: {}", e)))
    }

    /// Turn a token response into a grant, caching the refresh token.
    fn grant_from_response(
        &self,
        response: TokenResponse,
        known_account: Option<&Account>,
    ) -> Result<TokenGrant, AuthError> {
        let account = match (&response.id_token, known_account) {
            (Some(id_token), _) => account_from_id_token(id_token)?,
            (None, Some(account)) => account.clone(),
            (None, None) => {
                return Err(AuthError::Provider(
                    "token response did not include an ID token".into(),
                ))
            }
        };

        if let Some(refresh_token) = response.refresh_token.clone() {
            if let Err(e) = self.cache.store(&account, RefreshToken::new(refresh_token)) {
                warn!("Could not cache refresh token: {}", e);
            }
        }

        // Out-of-range lifetimes leave the expiry unknown.
        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
        if expires_at.is_none() {
            warn!("Ignoring out of range token lifetime: {}s", response.expires_in);
        }
        let scopes = response
            .scope
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(TokenGrant {
            account,
            access_token: AccessToken::new(response.access_token.clone(), expires_at),
            scopes,
        })
    }
}

#[async_trait]
impl IdentityProvider for AzureAdProvider {
    async fn list_accounts(&self) -> Result<Vec<Account>, AuthError> {
        Ok(self.cache.accounts())
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Result<TokenGrant, AuthError> {
        let refresh_token = match self.cache.refresh_token(&account.id) {
            Ok(token) => token,
            Err(CacheError::NotFound) => {
                return Err(AuthError::InteractionRequired(
                    "no refresh token cached for account".into(),
                ))
            }
            Err(e) => return Err(AuthError::Provider(e.to_string())),
        };

        debug!("Redeeming refresh token for {}", account.username);
        let response = self.redeem_refresh_token(&refresh_token, scopes).await?;
        self.grant_from_response(response, Some(account))
    }

    async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<TokenGrant, AuthError> {
        let pkce = PkceChallenge::new();
        let state = random_url_safe(16);
        let auth_url = self.authorization_url(scopes, &pkce, &state);

        let server = CallbackServer::bind(&self.redirect_uri).map_err(AuthError::Provider)?;

        // Dropping the sender (e.g. when this future is dropped) stops the server.
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let timeout = self.callback_timeout;
        let waiter =
            tokio::task::spawn_blocking(move || server.wait_for_callback(cancel_rx, timeout));

        info!("Opening browser for sign-in");
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!("Failed to open browser: {}", e);
        }
        info!("If the browser did not open, visit: {}", auth_url);

        let result = waiter
            .await
            .map_err(|e| AuthError::Provider(format!("Callback server failed: {}", e)))?;
        drop(cancel_tx);

        let callback_url = match result {
            CallbackResult::Success(url) => url,
            CallbackResult::Cancelled | CallbackResult::TimedOut => {
                return Err(AuthError::UserCancelled)
            }
            CallbackResult::Error(e) => return Err(AuthError::Provider(e)),
        };

        let callback = parse_callback_url(&callback_url)?;
        if callback.state != state {
            return Err(AuthError::Provider(
                "State mismatch - possible CSRF attack".into(),
            ));
        }

        let response = self.redeem_code(&callback.code, &pkce.verifier, scopes).await?;
        self.grant_from_response(response, None)
    }

    async fn remove_account(&self, account: &Account) -> Result<(), AuthError> {
        self.cache.remove(&account.id).map_err(|e| match e {
            CacheError::NotFound => AuthError::Provider("account not found".into()),
            other => AuthError::Provider(other.to_string()),
        })
    }
}

/// Caller scopes plus the reserved OpenID scopes, space separated, no duplicates.
fn scope_string(scopes: &[String]) -> String {
    let mut all: Vec<&str> = Vec::new();
    for scope in scopes
        .iter()
        .map(String::as_str)
        .chain(RESERVED_SCOPES.iter().copied())
    {
        let scope = scope.trim();
        if !scope.is_empty() && !all.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
            all.push(scope);
        }
    }
    all.join(" ")
}

/// Token response from Azure AD.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    refresh_token: Option<String>,
    id_token: Option<String>,
    #[serde(default)]
    scope: String,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
    #[serde(default)]
    error_codes: Vec<u32>,
}

/// Decode a token endpoint failure into the provider error taxonomy.
pub(crate) fn classify_token_error(status: u16, body: &str) -> AuthError {
    let Ok(parsed) = serde_json::from_str::<TokenErrorResponse>(body) else {
        return AuthError::Provider(format!("HTTP {}", status));
    };

    let detail = parsed
        .error_description
        .as_deref()
        .and_then(|d| d.lines().next())
        .unwrap_or(&parsed.error)
        .to_string();

    if parsed
        .error_codes
        .iter()
        .any(|code| CONFIGURATION_ERROR_CODES.contains(code))
    {
        return AuthError::Configuration(detail);
    }

    match parsed.error.as_str() {
        "invalid_grant" | "interaction_required" | "login_required" | "consent_required" => {
            AuthError::InteractionRequired(detail)
        }
        "invalid_client" | "unauthorized_client" => AuthError::Configuration(detail),
        other => AuthError::Provider(format!("HTTP {}: {}", status, other)),
    }
}

/// Authorization code and state from a successful redirect.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct AuthorizationCallback {
    pub code: String,
    pub state: String,
}

/// Parse the redirect URL to extract code and state.
pub(crate) fn parse_callback_url(url_string: &str) -> Result<AuthorizationCallback, AuthError> {
    let url = Url::parse(url_string)
        .map_err(|_| AuthError::Provider("malformed callback URL".into()))?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        if error == "access_denied" {
            return Err(AuthError::UserCancelled);
        }
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(AuthError::Provider(description));
    }

    let code = params
        .get("code")
        .ok_or_else(|| AuthError::Provider("callback is missing the authorization code".into()))?
        .to_string();

    let state = params
        .get("state")
        .ok_or_else(|| AuthError::Provider("callback is missing the state parameter".into()))?
        .to_string();

    Ok(AuthorizationCallback { code, state })
}

/// ID token claims used to describe the account.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    oid: Option<String>,
    tid: Option<String>,
    name: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
}

/// Read the account out of an ID token payload.
///
/// The token came straight from the token endpoint over TLS, so the
/// signature is not checked here.
pub(crate) fn account_from_id_token(id_token: &str) -> Result<Account, AuthError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::Provider("malformed ID token".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::Provider(format!("malformed ID token: {}", e)))?;

    let claims: IdTokenClaims = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Provider(format!("malformed ID token claims: {}", e)))?;

    let id = match (&claims.oid, &claims.tid) {
        (Some(oid), Some(tid)) => format!("{}.{}", oid, tid),
        _ => claims.sub.clone(),
    };
    let username = claims
        .preferred_username
        .clone()
        .or_else(|| claims.email.clone())
        .unwrap_or_default();
    let display_name = claims
        .name
        .clone()
        .or_else(|| (!username.is_empty()).then(|| username.clone()))
        .unwrap_or_else(|| "Unknown User".to_string());

    Ok(Account {
        id,
        display_name,
        username,
    })
}
