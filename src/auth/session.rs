//! Token acquisition: silent first, interactive fallback.
//!
//! `AuthSession` is built once by the application and passed to whatever
//! needs a token. Each `acquire` call runs the state machine
//! `Idle -> AcquiringSilent -> AcquiringInteractive -> Authenticated | Failed`
//! from the start and resolves exactly once.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::provider::{Account, IdentityProvider, TokenGrant};
use super::token_store::TokenStore;
use crate::cache::secure::AccessToken;
use crate::config::OAuthConfig;
use crate::error::{AuthError, FailureReason};

/// Where the most recent `acquire` call is (or ended).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireState {
    Idle,
    AcquiringSilent,
    AcquiringInteractive,
    Authenticated,
    Failed(FailureReason),
}

/// Result of one `acquire` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(AccessToken),
    Failed(FailureReason),
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn into_result(self) -> Result<AccessToken, FailureReason> {
        match self {
            Self::Authenticated(token) => Ok(token),
            Self::Failed(reason) => Err(reason),
        }
    }
}

/// Orchestrates token acquisition against one identity provider.
pub struct AuthSession<P> {
    provider: Option<P>,
    store: TokenStore,
    /// Recorded at construction; every acquisition fails with it.
    init_error: Option<String>,
    default_scopes: Vec<String>,
    state: Mutex<AcquireState>,
}

impl<P: IdentityProvider> AuthSession<P> {
    /// Create a session around an already constructed provider.
    pub fn new(config: &OAuthConfig, provider: P) -> Self {
        Self::with_provider(config, Ok(provider))
    }

    /// Create a session from the outcome of building the provider.
    ///
    /// A provider that failed to build, or an incomplete configuration, is
    /// recorded as a configuration error rather than returned.
    pub fn with_provider(config: &OAuthConfig, provider: Result<P, AuthError>) -> Self {
        let validation = config.validate();
        let init_error = match (&validation, &provider) {
            (Err(e), _) | (Ok(()), Err(e)) => Some(configuration_message(e)),
            (Ok(()), Ok(_)) => None,
        };

        if let Some(reason) = &init_error {
            error!("Authentication is not configured: {}", reason);
        }

        Self {
            provider: provider.ok(),
            store: TokenStore::new(),
            init_error,
            default_scopes: config
                .scopes
                .iter()
                .filter(|s| !s.trim().is_empty())
                .cloned()
                .collect(),
            state: Mutex::new(AcquireState::Idle),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// State reached by the most recent `acquire` call.
    pub fn state(&self) -> AcquireState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn default_scopes(&self) -> &[String] {
        &self.default_scopes
    }

    /// Seed the token store with an account the provider still remembers.
    ///
    /// Returns the restored account. Provider errors are logged and ignored.
    pub async fn restore(&self) -> Option<Account> {
        if self.init_error.is_some() {
            return None;
        }
        let provider = self.provider.as_ref()?;

        let account = match provider.list_accounts().await {
            Ok(accounts) => accounts.into_iter().next()?,
            Err(e) => {
                warn!("Could not list cached accounts: {}", e);
                return None;
            }
        };

        if self.store.restore_account(account.clone()) {
            info!("Restored cached account {}", account.username);
            Some(account)
        } else {
            None
        }
    }

    /// Acquire a token for `scopes`, silently if possible.
    ///
    /// An empty `scopes` slice means the configured default scopes.
    pub async fn acquire(&self, scopes: &[String]) -> AuthOutcome {
        self.transition(AcquireState::Idle);

        let scopes = if scopes.is_empty() {
            self.default_scopes.as_slice()
        } else {
            scopes
        };

        if let Some(reason) = &self.init_error {
            return self.fail(FailureReason::Configuration(reason.clone()));
        }
        let Some(provider) = self.provider.as_ref() else {
            return self.fail(FailureReason::Configuration(
                "identity provider unavailable".into(),
            ));
        };

        if let Some(account) = self.store.current_account() {
            self.transition(AcquireState::AcquiringSilent);

            match provider.acquire_token_silent(scopes, &account).await {
                Ok(grant) => return self.succeed(grant),
                Err(AuthError::InteractionRequired(detail)) => {
                    info!("Silent acquisition needs interaction: {}", detail);
                }
                Err(e) => {
                    warn!("Silent acquisition failed: {}", e);
                    return self.fail(e.into());
                }
            }
        } else {
            debug!("No cached account, skipping silent acquisition");
        }

        self.transition(AcquireState::AcquiringInteractive);

        match provider.acquire_token_interactive(scopes).await {
            Ok(grant) => self.succeed(grant),
            Err(e) => {
                warn!("Interactive acquisition failed: {}", e);
                self.fail(e.into())
            }
        }
    }

    /// Acquire with the configured default scopes.
    pub async fn acquire_default(&self) -> AuthOutcome {
        self.acquire(&[]).await
    }

    /// Forget the signed-in account, and any other account the provider
    /// still remembers, so the next acquisition is interactive.
    ///
    /// Provider failures are logged and swallowed; the token store always
    /// ends up empty.
    pub async fn disconnect(&self) {
        if let Some(provider) = self.provider.as_ref() {
            let mut accounts: Vec<Account> = self.store.current_account().into_iter().collect();
            match provider.list_accounts().await {
                Ok(listed) => {
                    for account in listed {
                        if !accounts.iter().any(|a| a.id == account.id) {
                            accounts.push(account);
                        }
                    }
                }
                Err(e) => warn!("Could not list cached accounts: {}", e),
            }

            for account in &accounts {
                match provider.remove_account(account).await {
                    Ok(()) => info!("Removed account {}", account.username),
                    Err(e) => warn!("Ignoring failure to remove account: {}", e),
                }
            }
        }

        self.store.clear();
        self.transition(AcquireState::Idle);
    }

    fn succeed(&self, grant: TokenGrant) -> AuthOutcome {
        info!(
            "Acquired token for {} ({} scopes)",
            grant.account.username,
            grant.scopes.len()
        );
        let token = grant.access_token;
        self.store.set(grant.account, token.clone());
        self.transition(AcquireState::Authenticated);
        AuthOutcome::Authenticated(token)
    }

    fn fail(&self, reason: FailureReason) -> AuthOutcome {
        self.transition(AcquireState::Failed(reason.clone()));
        AuthOutcome::Failed(reason)
    }

    fn transition(&self, next: AcquireState) {
        debug!("Auth session -> {:?}", next);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

impl<P: IdentityProvider + 'static> AuthSession<P> {
    /// Run `acquire` on the tokio runtime and deliver the outcome on a channel.
    ///
    /// The receiver resolves exactly once. Dropping it does not stop the
    /// acquisition.
    pub fn acquire_detached(self: &Arc<Self>, scopes: Vec<String>) -> oneshot::Receiver<AuthOutcome> {
        let (tx, rx) = oneshot::channel();
        let session = Arc::clone(self);

        tokio::spawn(async move {
            let outcome = session.acquire(&scopes).await;
            if tx.send(outcome).is_err() {
                debug!("Acquisition result dropped by caller");
            }
        });

        rx
    }
}

fn configuration_message(err: &AuthError) -> String {
    match err {
        AuthError::Configuration(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    fn account(id: &str) -> Account {
        Account {
            id: id.into(),
            display_name: format!("User {}", id),
            username: format!("{}@example.com", id),
        }
    }

    fn grant(account: Account, token: &str) -> TokenGrant {
        TokenGrant {
            account,
            access_token: AccessToken::new(token, None),
            scopes: vec!["Mail.Send".into()],
        }
    }

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client".into(),
            authority: "https://login.microsoftonline.com/common".into(),
            redirect_uri: "http://localhost:28491/callback".into(),
            scopes: vec!["Mail.Send".into()],
            callback_timeout_seconds: 300,
        }
    }

    fn scopes() -> Vec<String> {
        vec!["mail.send".into()]
    }

    #[derive(Default)]
    struct Script {
        accounts: Vec<Account>,
        silent: VecDeque<Result<TokenGrant, AuthError>>,
        interactive: VecDeque<Result<TokenGrant, AuthError>>,
        remove_error: Option<AuthError>,
        silent_calls: usize,
        interactive_calls: usize,
        removed: Vec<String>,
        last_scopes: Vec<String>,
    }

    /// Provider that replays queued results and counts calls.
    #[derive(Clone, Default)]
    struct ScriptedProvider {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedProvider {
        fn with(f: impl FnOnce(&mut Script)) -> Self {
            let provider = Self::default();
            f(&mut *provider.script.lock().unwrap());
            provider
        }

        fn push_silent(&self, result: Result<TokenGrant, AuthError>) {
            self.script.lock().unwrap().silent.push_back(result);
        }

        fn push_interactive(&self, result: Result<TokenGrant, AuthError>) {
            self.script.lock().unwrap().interactive.push_back(result);
        }

        fn silent_calls(&self) -> usize {
            self.script.lock().unwrap().silent_calls
        }

        fn interactive_calls(&self) -> usize {
            self.script.lock().unwrap().interactive_calls
        }

        fn removed(&self) -> Vec<String> {
            self.script.lock().unwrap().removed.clone()
        }

        fn last_scopes(&self) -> Vec<String> {
            self.script.lock().unwrap().last_scopes.clone()
        }
    }

    fn unscripted() -> AuthError {
        AuthError::Provider("unscripted call".into())
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn list_accounts(&self) -> Result<Vec<Account>, AuthError> {
            Ok(self.script.lock().unwrap().accounts.clone())
        }

        async fn acquire_token_silent(
            &self,
            scopes: &[String],
            _account: &Account,
        ) -> Result<TokenGrant, AuthError> {
            let mut script = self.script.lock().unwrap();
            script.silent_calls += 1;
            script.last_scopes = scopes.to_vec();
            script.silent.pop_front().unwrap_or_else(|| Err(unscripted()))
        }

        async fn acquire_token_interactive(
            &self,
            scopes: &[String],
        ) -> Result<TokenGrant, AuthError> {
            let mut script = self.script.lock().unwrap();
            script.interactive_calls += 1;
            script.last_scopes = scopes.to_vec();
            script
                .interactive
                .pop_front()
                .unwrap_or_else(|| Err(unscripted()))
        }

        async fn remove_account(&self, account: &Account) -> Result<(), AuthError> {
            let mut script = self.script.lock().unwrap();
            script.removed.push(account.id.clone());
            script.accounts.retain(|a| a.id != account.id);
            match &script.remove_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    fn session(provider: &ScriptedProvider) -> AuthSession<ScriptedProvider> {
        AuthSession::new(&config(), provider.clone())
    }

    #[tokio::test]
    async fn test_empty_store_goes_straight_to_interactive() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        let session = session(&provider);

        let outcome = session.acquire(&scopes()).await;

        assert_eq!(
            outcome,
            AuthOutcome::Authenticated(AccessToken::new("t1", None))
        );
        assert_eq!(provider.silent_calls(), 0);
        assert_eq!(provider.interactive_calls(), 1);
        assert_eq!(session.store().current_account(), Some(account("a")));
        assert_eq!(session.state(), AcquireState::Authenticated);
    }

    #[tokio::test]
    async fn test_second_acquire_refreshes_silently() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        provider.push_silent(Ok(grant(account("a"), "t2")));
        let session = session(&provider);

        assert!(session.acquire(&scopes()).await.is_authenticated());
        assert_eq!(session.store().current_account(), Some(account("a")));

        let outcome = session.acquire(&scopes()).await;

        assert_eq!(outcome.into_result().unwrap().as_str(), "t2");
        assert_eq!(provider.silent_calls(), 1);
        assert_eq!(provider.interactive_calls(), 1);
        assert_eq!(session.store().current_account(), Some(account("a")));
        assert_eq!(session.store().token().unwrap().as_str(), "t2");
    }

    #[tokio::test]
    async fn test_interaction_required_falls_back_once() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        provider.push_silent(Err(AuthError::InteractionRequired("expired".into())));
        provider.push_interactive(Ok(grant(account("a"), "t2")));
        let session = session(&provider);
        session.acquire(&scopes()).await;

        let outcome = session.acquire(&scopes()).await;

        assert_eq!(outcome.into_result().unwrap().as_str(), "t2");
        assert_eq!(provider.silent_calls(), 1);
        assert_eq!(provider.interactive_calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_fallback_leaves_store_untouched() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        provider.push_silent(Err(AuthError::InteractionRequired("revoked".into())));
        provider.push_interactive(Err(AuthError::UserCancelled));
        let session = session(&provider);
        session.acquire(&scopes()).await;

        let outcome = session.acquire(&scopes()).await;

        assert_eq!(outcome, AuthOutcome::Failed(FailureReason::UserCancelled));
        assert_eq!(
            session.state(),
            AcquireState::Failed(FailureReason::UserCancelled)
        );
        assert_eq!(session.store().current_account(), Some(account("a")));
        assert_eq!(session.store().token().unwrap().as_str(), "t1");
        assert_eq!(provider.interactive_calls(), 2);
    }

    #[tokio::test]
    async fn test_other_silent_failure_skips_interactive() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        provider.push_silent(Err(AuthError::Provider("HTTP 503".into())));
        let session = session(&provider);
        session.acquire(&scopes()).await;

        let outcome = session.acquire(&scopes()).await;

        assert_eq!(
            outcome,
            AuthOutcome::Failed(FailureReason::Provider("HTTP 503".into()))
        );
        assert_eq!(provider.interactive_calls(), 1);
        assert_eq!(session.store().token().unwrap().as_str(), "t1");
    }

    #[tokio::test]
    async fn test_interactive_interaction_required_is_not_surfaced() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Err(AuthError::InteractionRequired("consent".into())));
        let session = session(&provider);

        let outcome = session.acquire(&scopes()).await;

        assert_eq!(
            outcome,
            AuthOutcome::Failed(FailureReason::Provider("consent".into()))
        );
        assert!(session.store().current_account().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_forces_interactive() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        provider.push_interactive(Ok(grant(account("a"), "t2")));
        let session = session(&provider);
        session.acquire(&scopes()).await;

        session.disconnect().await;
        assert!(session.store().current_account().is_none());

        let outcome = session.acquire(&scopes()).await;

        assert!(outcome.is_authenticated());
        assert_eq!(provider.silent_calls(), 0);
        assert_eq!(provider.interactive_calls(), 2);
        assert_eq!(provider.removed(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_swallows_errors() {
        let provider = ScriptedProvider::with(|s| {
            s.remove_error = Some(AuthError::Provider("account not found".into()));
        });
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        let session = session(&provider);
        session.acquire(&scopes()).await;

        session.disconnect().await;
        session.disconnect().await;

        assert!(session.store().current_account().is_none());
        assert!(session.store().token().is_none());
        assert_eq!(session.state(), AcquireState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_without_store_uses_provider_account() {
        let provider = ScriptedProvider::with(|s| s.accounts = vec![account("b")]);
        let session = session(&provider);

        session.disconnect().await;

        assert_eq!(provider.removed(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_removes_every_remembered_account() {
        let provider = ScriptedProvider::with(|s| s.accounts = vec![account("a"), account("b")]);
        provider.push_silent(Ok(grant(account("a"), "t1")));
        provider.push_interactive(Ok(grant(account("b"), "t2")));
        let first = session(&provider);
        first.restore().await;
        first.acquire(&scopes()).await;

        first.disconnect().await;

        let mut removed = provider.removed();
        removed.sort();
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);

        let next = session(&provider);
        assert!(next.restore().await.is_none());
        assert!(next.acquire(&scopes()).await.is_authenticated());
        assert_eq!(provider.silent_calls(), 1);
        assert_eq!(provider.interactive_calls(), 1);
    }

    #[tokio::test]
    async fn test_configuration_error_fails_every_call() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        let mut bad = config();
        bad.client_id = String::new();
        let session = AuthSession::new(&bad, provider.clone());

        for _ in 0..2 {
            let outcome = session.acquire(&scopes()).await;
            assert!(matches!(
                outcome,
                AuthOutcome::Failed(FailureReason::Configuration(_))
            ));
        }
        assert_eq!(provider.interactive_calls(), 0);
        assert!(session.store().current_account().is_none());
    }

    #[tokio::test]
    async fn test_provider_build_failure_is_configuration_error() {
        let session: AuthSession<ScriptedProvider> = AuthSession::with_provider(
            &config(),
            Err(AuthError::Configuration("bad authority".into())),
        );

        assert_eq!(
            session.acquire(&scopes()).await,
            AuthOutcome::Failed(FailureReason::Configuration("bad authority".into()))
        );
        assert!(session.restore().await.is_none());
    }

    #[tokio::test]
    async fn test_restore_enables_silent_path() {
        let provider = ScriptedProvider::with(|s| s.accounts = vec![account("a")]);
        provider.push_silent(Ok(grant(account("a"), "t1")));
        let session = session(&provider);

        assert_eq!(session.restore().await, Some(account("a")));
        assert!(session.store().token().is_none());

        assert!(session.acquire(&scopes()).await.is_authenticated());
        assert_eq!(provider.silent_calls(), 1);
        assert_eq!(provider.interactive_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_scopes_use_configured_defaults() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        let session = session(&provider);

        session.acquire_default().await;

        assert_eq!(provider.last_scopes(), vec!["Mail.Send".to_string()]);
    }

    #[tokio::test]
    async fn test_acquire_detached_resolves_once() {
        let provider = ScriptedProvider::default();
        provider.push_interactive(Ok(grant(account("a"), "t1")));
        let session = Arc::new(session(&provider));

        let rx = session.acquire_detached(scopes());
        let outcome = rx.await.expect("outcome delivered");

        assert!(outcome.is_authenticated());
        assert_eq!(session.store().current_account(), Some(account("a")));
    }
}
