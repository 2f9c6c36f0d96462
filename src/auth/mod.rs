//! Authentication core and its Microsoft collaborators.
//!
//! `session` and `token_store` are provider-agnostic; `oauth` and
//! `callback_server` implement the Azure AD provider; `graph` is the
//! Microsoft Graph client that consumes the tokens.

pub mod callback_server;
pub mod graph;
pub mod oauth;
pub mod provider;
pub mod session;
pub mod token_store;

pub use oauth::AzureAdProvider;
pub use provider::{Account, IdentityProvider, TokenGrant};
pub use session::{AcquireState, AuthOutcome, AuthSession};
pub use token_store::{SessionStatus, TokenStore};
