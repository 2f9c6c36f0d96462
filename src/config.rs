//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::AuthError;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
}

/// Identity provider settings consumed by the auth session.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub authority: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,
}

fn default_callback_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub graph_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    ///
    /// OAuth fields are not validated here; an unusable identity configuration
    /// is recorded by the auth session and reported on every acquisition.
    pub fn load() -> Result<Self> {
        let mut config = Self::parse(CONFIG_TOML)?;

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Ok(authority) = env::var("AZURE_AUTHORITY") {
            config.oauth.authority = authority;
        }

        if let Ok(redirect_uri) = env::var("AZURE_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Ok(base_url) = env::var("GRAPH_BASE_URL") {
            config.api.graph_base_url = base_url;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse embedded config.toml")
    }
}

impl OAuthConfig {
    /// Check that every identity setting is present.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration(
                "client id is empty; set AZURE_CLIENT_ID or update config.toml".into(),
            ));
        }

        if self.authority.trim().is_empty() {
            return Err(AuthError::Configuration("authority URL is empty".into()));
        }

        if self.redirect_uri.trim().is_empty() {
            return Err(AuthError::Configuration("redirect URI is empty".into()));
        }

        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(AuthError::Configuration("no scopes configured".into()));
        }

        Ok(())
    }

    /// Get the authorization URL for Azure AD.
    pub fn authorize_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority_base())
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority_base())
    }

    /// How long the interactive flow waits for the browser redirect.
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_seconds)
    }

    // Accept authorities written with or without the v2 path suffix.
    fn authority_base(&self) -> &str {
        let trimmed = self.authority.trim().trim_end_matches('/');
        trimmed.strip_suffix("/oauth2/v2.0").unwrap_or(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth(client_id: &str) -> OAuthConfig {
        OAuthConfig {
            client_id: client_id.into(),
            authority: "https://login.microsoftonline.com/common".into(),
            redirect_uri: "http://localhost:28491/callback".into(),
            scopes: vec!["Mail.Send".into()],
            callback_timeout_seconds: 300,
        }
    }

    #[test]
    fn test_config_parsing() {
        let config = Config::parse(CONFIG_TOML).expect("embedded config should parse");
        assert_eq!(config.app.name, "graph-connect");
        assert!(config.oauth.scopes.iter().any(|s| s == "Mail.Send"));
        assert_eq!(config.oauth.callback_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_urls() {
        let config = oauth("test-client");

        assert_eq!(
            config.authorize_url(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
        );
        assert_eq!(
            config.token_url(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_authority_with_v2_suffix() {
        let mut config = oauth("test-client");
        config.authority = "https://login.microsoftonline.com/common/oauth2/v2.0/".into();

        assert_eq!(
            config.token_url(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_validate() {
        assert!(oauth("test-client").validate().is_ok());
        assert!(matches!(
            oauth("  ").validate(),
            Err(AuthError::Configuration(_))
        ));

        let mut no_scopes = oauth("test-client");
        no_scopes.scopes.clear();
        assert!(matches!(
            no_scopes.validate(),
            Err(AuthError::Configuration(_))
        ));
    }
}
