//! Error types for graph-connect.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Sign-in failed: {0}")]
    SignIn(#[from] FailureReason),

    #[error("Credential cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No recipient address known for this account")]
    NoRecipient,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity provider errors, decoded once at the provider boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Bad client id, authority or redirect URI. Fatal for the session.
    #[error("Invalid identity configuration: {0}")]
    Configuration(String),

    /// The cached credential cannot be used without user interaction.
    #[error("User interaction required: {0}")]
    InteractionRequired(String),

    #[error("User cancelled authentication")]
    UserCancelled,

    /// Network or identity service failure.
    #[error("Identity provider error: {0}")]
    Provider(String),
}

impl AuthError {
    /// Returns true if the silent path should fall back to interactive sign-in.
    pub fn is_interaction_required(&self) -> bool {
        matches!(self, Self::InteractionRequired(_))
    }
}

/// Failure reasons surfaced to callers of `AuthSession::acquire`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cancelled by the user")]
    UserCancelled,

    #[error("provider error: {0}")]
    Provider(String),
}

impl From<AuthError> for FailureReason {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Configuration(msg) => Self::Configuration(msg),
            AuthError::UserCancelled => Self::UserCancelled,
            AuthError::Provider(msg) => Self::Provider(msg),
            // Only reachable when the interactive flow itself asks for interaction.
            AuthError::InteractionRequired(msg) => Self::Provider(msg),
        }
    }
}

/// Credential cache errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No cached credential for this account")]
    NotFound,

    #[error("Failed to read credential cache: {0}")]
    ReadFailed(String),

    #[error("Failed to write credential cache: {0}")]
    WriteFailed(String),

    #[error("Could not determine a configuration directory")]
    NoConfigDir,
}

/// Microsoft Graph errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Graph API request failed: {0}")]
    GraphRequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Invalid request (400)")]
    InvalidRequest,

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Not found (404)")]
    NotFound,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,

    #[error("Unsupported operation (501)")]
    Unsupported,

    #[error("Account has no profile picture")]
    NoPicture,
}

impl ApiError {
    /// Map a non-success Graph status code to an error.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            501 => Self::Unsupported,
            status => Self::GraphRequestFailed(format!("HTTP {}", status)),
        }
    }
}

impl AppError {
    /// Returns a user-friendly message for display.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::Configuration(_))
            | Self::SignIn(FailureReason::Configuration(_))
            | Self::Config(_) => "Configuration error. Check the client id and authority.",
            Self::Auth(AuthError::UserCancelled) | Self::SignIn(FailureReason::UserCancelled) => {
                "Sign-in was cancelled."
            }
            Self::Auth(_) | Self::SignIn(FailureReason::Provider(_)) => {
                "Sign-in failed. Please try again."
            }
            Self::Cache(CacheError::NotFound) => "No saved session found.",
            Self::Cache(_) => "Failed to access saved credentials.",
            Self::Api(ApiError::Unauthorized) => "Authentication expired. Sign in again.",
            Self::Api(ApiError::Forbidden) => "Insufficient permissions for this operation.",
            Self::Api(ApiError::RateLimited) => "Too many requests. Please wait a moment.",
            Self::Api(_) => "The email couldn't be sent. Check the log for errors.",
            Self::NoRecipient => "No recipient address known for this account; pass --to.",
            Self::Io(_) => "An error occurred. Please try again.",
        }
    }

    /// Returns true if this error should trigger a sign-out.
    pub fn requires_sign_out(&self) -> bool {
        matches!(self, Self::Api(ApiError::Unauthorized))
    }
}
