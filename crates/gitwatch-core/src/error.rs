use gitwatch_api::ApiError;
use gitwatch_cache::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All the ways a watch can go wrong
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded{}", retry_hint(.retry_after))]
    RateLimitExceeded { retry_after: Option<u64> },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Provider {0} is not enabled")]
    ProviderDisabled(String),

    #[error("State store failed: {0}")]
    CacheError(#[from] StoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Delivery failed: {0}")]
    DeliveryError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(". Try again in {} seconds", secs),
        None => String::new(),
    }
}

/// Coarse failure class reported in cycle summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    NotFound,
    RateLimit,
    Transient,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Auth => write!(f, "auth"),
            FailureKind::NotFound => write!(f, "not_found"),
            FailureKind::RateLimit => write!(f, "rate_limit"),
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Other => write!(f, "other"),
        }
    }
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::AuthError(_) => FailureKind::Auth,
            Error::NotFound(_) => FailureKind::NotFound,
            Error::RateLimitExceeded { .. } => FailureKind::RateLimit,
            Error::Transient(_) => FailureKind::Transient,
            _ => FailureKind::Other,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Auth(msg) => Error::AuthError(msg),
            ApiError::NotFound(what) => Error::NotFound(what),
            ApiError::RateLimited { retry_after } => Error::RateLimitExceeded { retry_after },
            ApiError::Transient(msg) => Error::Transient(msg),
            // Still failing after the client's retry; skip for this cycle
            ApiError::Network(e) => Error::Transient(e.to_string()),
            ApiError::Unexpected { status, body } => {
                Error::Unknown(format!("unexpected status {}: {}", status, body))
            }
            ApiError::Parse(e) => Error::Unknown(format!("invalid response: {}", e)),
            ApiError::Client(msg) => Error::ConfigError(msg),
        }
    }
}
