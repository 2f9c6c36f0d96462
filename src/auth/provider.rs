//! Identity provider capability set used by the auth session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::secure::AccessToken;
use crate::error::AuthError;

/// A signed-in end user as the identity provider knows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque provider identifier (home account id).
    pub id: String,
    pub display_name: String,
    /// Email-like sign-in name.
    pub username: String,
}

/// A successful token acquisition.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub account: Account,
    pub access_token: AccessToken,
    /// Scopes the provider actually granted.
    pub scopes: Vec<String>,
}

/// The four operations the auth session needs from an identity provider.
///
/// Implementations decode their wire errors into [`AuthError`] before
/// returning; the session never inspects provider-specific codes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Accounts the provider still holds credentials for.
    async fn list_accounts(&self) -> Result<Vec<Account>, AuthError>;

    /// Obtain a fresh token for `account` without user interaction.
    ///
    /// Returns [`AuthError::InteractionRequired`] when the cached credential
    /// is missing, expired or revoked.
    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Result<TokenGrant, AuthError>;

    /// Run the user-facing sign-in flow.
    async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<TokenGrant, AuthError>;

    /// Forget the account and its cached credentials.
    async fn remove_account(&self, account: &Account) -> Result<(), AuthError>;
}
