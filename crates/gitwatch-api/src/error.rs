use reqwest::{header::HeaderMap, StatusCode};
use thiserror::Error;

use crate::retry::is_retryable_status;

/// Errors shared by every hosting API client.
///
/// The variants line up with how the watcher reacts to them: auth problems
/// are surfaced to the operator, missing resources skip the target, rate
/// limits back the provider off, and transient failures get retried.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Unexpected status {status}: {body}")]
    Unexpected { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// Whether a single immediate retry is worth attempting
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transient(_) => true,
            ApiError::Network(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            _ => false,
        }
    }

    /// Map a non-success response onto the shared taxonomy.
    ///
    /// `resource` ends up in NotFound messages so the operator can tell
    /// which repo or group disappeared.
    pub fn from_status(status: StatusCode, headers: &HeaderMap, body: String, resource: &str) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ApiError::RateLimited {
                retry_after: retry_after_secs(headers),
            };
        }

        // GitHub signals primary rate limits with 403 + remaining=0
        if status == StatusCode::FORBIDDEN && rate_limit_exhausted(headers) {
            return ApiError::RateLimited {
                retry_after: retry_after_secs(headers),
            };
        }

        match status {
            StatusCode::UNAUTHORIZED => ApiError::Auth(format!("{} (status 401)", resource)),
            StatusCode::FORBIDDEN => ApiError::Auth(format!("access denied to {}", resource)),
            StatusCode::NOT_FOUND => ApiError::NotFound(resource.to_string()),
            s if is_retryable_status(s) => ApiError::Transient(format!("Status {}: {}", s, body)),
            s => ApiError::Unexpected {
                status: s.as_u16(),
                body,
            },
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    header_u64(headers, "x-ratelimit-remaining") == Some(0)
        || header_u64(headers, "ratelimit-remaining") == Some(0)
}

/// Extract a retry-after hint in seconds.
///
/// Prefers `Retry-After`, then falls back to the reset epoch that GitHub
/// (`x-ratelimit-reset`) and GitLab (`ratelimit-reset`) send.
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(secs);
    }

    let reset = header_u64(headers, "x-ratelimit-reset")
        .or_else(|| header_u64(headers, "ratelimit-reset"))?;
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    Some(reset.saturating_sub(now))
}
