use bizscope_types::CredentialStoreError;
use thiserror::Error;

/// Failures surfaced to callers of [`ApiClient`](crate::ApiClient).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response was received.
    #[error("network failure: {message}")]
    Network { message: String },
    /// The credential had expired, refreshing it failed, and the server then
    /// rejected the request. The session has been cleared.
    #[error("credential expired and could not be refreshed (HTTP {status}): {message}")]
    AuthExpired { status: u16, message: String },
    /// The server rejected the credential outright. The session has been cleared.
    #[error("unauthorized (HTTP {status}): {message}")]
    AuthRejected { status: u16, message: String },
    /// Any other non-success response.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    /// A success response whose body did not have the expected shape.
    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
}

impl ApiError {
    /// HTTP status carried by the failure, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { .. } | Self::Decode { .. } => None,
            Self::AuthExpired { status, .. } | Self::AuthRejected { status, .. } | Self::Server { status, .. } => Some(*status),
        }
    }

    /// True when the session was invalidated and the user must sign in again.
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, Self::AuthExpired { .. } | Self::AuthRejected { .. })
    }
}

/// Failures of a single credential refresh. Cloned to every caller sharing the refresh.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no credential to refresh")]
    NoCredential,
    #[error("refresh rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("refresh request failed: {message}")]
    Network { message: String },
    #[error("refresh response was not understood: {message}")]
    InvalidResponse { message: String },
    #[error(transparent)]
    Store(#[from] CredentialStoreError),
}

/// Invalid client configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("base URL '{url}' must use https for non-localhost hosts; got '{scheme}://'")]
    InsecureScheme { url: String, scheme: String },
    #[error("invalid token expiry margin '{value}'; expected a non-negative number of seconds")]
    InvalidExpiryMargin { value: String },
    #[error("could not build the HTTP client: {message}")]
    HttpClient { message: String },
}
