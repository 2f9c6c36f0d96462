//! Single-account token storage for the auth session.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, MutexGuard};

use super::provider::Account;
use crate::cache::secure::AccessToken;

#[derive(Debug)]
struct Entry {
    account: Account,
    /// `None` for an account restored from the provider before any acquisition.
    token: Option<AccessToken>,
}

/// Holds zero or one signed-in account and its last access token.
///
/// Tokens are only handed out through `AuthSession::acquire`, which goes
/// through the provider's silent path first.
#[derive(Debug, Default)]
pub struct TokenStore {
    entry: Mutex<Option<Entry>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached account, if anyone is signed in.
    pub fn current_account(&self) -> Option<Account> {
        self.lock().as_ref().map(|e| e.account.clone())
    }

    /// Replace the cached account and token. The previous token is dropped.
    pub fn set(&self, account: Account, token: AccessToken) {
        *self.lock() = Some(Entry {
            account,
            token: Some(token),
        });
    }

    /// Seed an account known to the provider. No-op if the store is occupied.
    pub fn restore_account(&self, account: Account) -> bool {
        let mut entry = self.lock();
        if entry.is_some() {
            return false;
        }
        *entry = Some(Entry {
            account,
            token: None,
        });
        true
    }

    /// Remove the cached account and token.
    pub fn clear(&self) {
        self.lock().take();
    }

    #[cfg(test)]
    pub(crate) fn token(&self) -> Option<AccessToken> {
        self.lock().as_ref().and_then(|e| e.token.clone())
    }

    /// Summary for display.
    pub fn status(&self) -> SessionStatus {
        match self.lock().as_ref() {
            None => SessionStatus::SignedOut,
            Some(entry) => SessionStatus::SignedIn {
                account: entry.account.clone(),
                expires_at: entry.token.as_ref().and_then(|t| t.expires_at()),
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Entry>> {
        self.entry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Sign-in status for display.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    SignedOut,
    SignedIn {
        account: Account,
        expires_at: Option<DateTime<Utc>>,
    },
}

impl SessionStatus {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, Self::SignedIn { .. })
    }

    /// Human-readable description, e.g. "Signed in as Ada (ada@example.com), token expires in 45 min".
    pub fn describe(&self) -> String {
        match self {
            Self::SignedOut => "Not signed in".to_string(),
            Self::SignedIn {
                account,
                expires_at,
            } => {
                let who = format!("Signed in as {} ({})", account.display_name, account.username);
                match expires_at.map(|at| at - Utc::now()) {
                    Some(left) if left > Duration::zero() => {
                        format!("{}, token expires in {}", who, format_duration(left))
                    }
                    Some(_) => format!("{}, token expired", who),
                    None => format!("{}, no token acquired yet", who),
                }
            }
        }
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}
