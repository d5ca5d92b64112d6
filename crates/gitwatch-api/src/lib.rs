// REST clients for the supported hosting platforms
use std::time::Duration;

pub mod cnb;
pub mod error;
pub mod github;
pub mod gitlab;
mod http;
pub mod retry;

// Re-export common types
pub use cnb::{CnbClient, CnbCommit, CnbRelease, CnbRepo, CNB_API_BASE};
pub use error::{ApiError, Result};
pub use github::{GitHubClient, GitHubCommit, GitHubRelease, GitHubRepo, GITHUB_API_BASE};
pub use gitlab::{GitLabClient, GitLabCommit, GitLabProject, GitLabRelease, GITLAB_API_BASE};
pub use http::{MAX_PAGES, PAGE_SIZE};
pub use retry::RetryConfig;

/// Per-request timeout used when the caller doesn't pick one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
