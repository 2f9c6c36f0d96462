//! graph-connect
//!
//! Sign in with Microsoft identity and call Microsoft Graph. The core is
//! [`auth::AuthSession`]: silent token acquisition with an interactive
//! fallback, over any [`auth::IdentityProvider`].

pub mod auth;
pub mod cache;
pub mod config;
pub mod connect;
pub mod error;
pub mod mail;
