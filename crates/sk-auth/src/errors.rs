use reqwest::StatusCode;
use sk_store::StorageFault;
use thiserror::Error;

/// User-facing category of a failed API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    RateLimited,
    Server,
    BadGateway,
    Unavailable,
    Other(u16),
}

impl ApiErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::Validation,
            429 => Self::RateLimited,
            500 => Self::Server,
            502 => Self::BadGateway,
            503 => Self::Unavailable,
            code => Self::Other(code),
        }
    }

    /// Message suitable for a toast or dialog
    pub fn message(self) -> &'static str {
        match self {
            Self::BadRequest => "The request was invalid.",
            Self::Unauthorized => "Your session has expired. Please sign in again.",
            Self::Forbidden => "You do not have permission to do that.",
            Self::NotFound => "The requested resource does not exist.",
            Self::Conflict => "The data changed in the meantime. Refresh and try again.",
            Self::Validation => "Some fields are invalid.",
            Self::RateLimited => "Too many requests. Please slow down and try again.",
            Self::Server => "Server error. Please try again later.",
            Self::BadGateway => "Gateway error. Please try again later.",
            Self::Unavailable => "The service is temporarily unavailable.",
            Self::Other(_) => "The request failed.",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server | Self::BadGateway | Self::Unavailable
        )
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(code) => write!(f, "request failed ({code})"),
            kind => f.write_str(kind.message()),
        }
    }
}

/// Failure to deliver a request or to read its response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Why a refresh cycle did not produce a credential
///
/// Cloned to every caller waiting on the same cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Token refresh failed: {0}")]
    Failed(String),

    #[error("Refresh attempts exhausted - session ended")]
    SessionEnded,

    #[error("No stored credential to refresh")]
    NotAuthenticated,

    #[error("Refreshed credential could not be stored: {0}")]
    Storage(StorageFault),
}

/// Errors surfaced to application code
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Session ended - sign in again")]
    SessionEnded,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageFault),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("HTTP error {status}: {kind}")]
    Api {
        kind: ApiErrorKind,
        status: StatusCode,
        detail: Option<String>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether the only way forward is to sign in again
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::SessionEnded
                | Self::Api {
                    kind: ApiErrorKind::Unauthorized,
                    ..
                }
        )
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RefreshFailed(_) => true,
            Self::Storage(fault) => !fault.kind.is_persistent(),
            Self::Api { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            Self::NotAuthenticated | Self::SessionEnded => {
                "Please sign in to continue.".to_string()
            }
            Self::RefreshFailed(_) | Self::Transport(_) => {
                "Network problem. Check your connection and try again.".to_string()
            }
            Self::Storage(fault) => fault
                .advice()
                .unwrap_or("Could not save your sign-in. Please check your settings.")
                .to_string(),
            Self::Api {
                kind: ApiErrorKind::BadRequest,
                detail: Some(detail),
                ..
            } => detail.clone(),
            Self::Api { kind, .. } => kind.to_string(),
            Self::InvalidCredential(_) => "The sign-in response was incomplete.".to_string(),
            Self::InvalidResponse(_) | Self::Config(_) => "Something went wrong.".to_string(),
        }
    }
}

impl From<RefreshError> for SessionError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Failed(reason) => Self::RefreshFailed(reason),
            RefreshError::SessionEnded => Self::SessionEnded,
            RefreshError::NotAuthenticated => Self::NotAuthenticated,
            RefreshError::Storage(fault) => Self::Storage(fault),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
