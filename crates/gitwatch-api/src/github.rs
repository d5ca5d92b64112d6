use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::http::{build_client, AuthScheme, PageParams, Transport};
use crate::retry::RetryConfig;
use crate::DEFAULT_TIMEOUT;

pub const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_PAGES: PageParams = PageParams {
    page: "page",
    size: "per_page",
};

/// Client for the GitHub REST API (github.com or Enterprise)
pub struct GitHubClient {
    transport: Transport,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_base_url(token, GITHUB_API_BASE.to_string())
    }

    /// For GitHub Enterprise or testing with custom API URL
    pub fn with_base_url(token: Option<String>, base_url: String) -> Result<Self> {
        Self::with_timeout(token, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(token: Option<String>, base_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            transport: Transport {
                client: build_client(GITHUB_ACCEPT, timeout)?,
                token: token.filter(|t| !t.is_empty()),
                auth: AuthScheme::Bearer,
                retry_config: RetryConfig::default(),
            },
            base_url: normalize_base(&base_url),
        })
    }

    /// Create client with custom retry configuration
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.transport.retry_config = retry_config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.transport.token.is_some()
    }

    /// Get repository metadata (used for the default branch)
    pub async fn get_repository(&self, repo: &str) -> Result<GitHubRepo> {
        let url = format!("{}/repos/{}", self.base_url, repo);
        self.transport.get_json(&url, &[], repo).await
    }

    /// Most recent commits on `branch`, newest first.
    ///
    /// An empty branch lets GitHub pick the repository default.
    pub async fn list_commits(&self, repo: &str, branch: &str, per_page: u32) -> Result<Vec<GitHubCommit>> {
        let url = format!("{}/repos/{}/commits", self.base_url, repo);
        let mut query = vec![("per_page", per_page.to_string())];
        if !branch.is_empty() {
            query.push(("sha", branch.to_string()));
        }

        let resource = format!("{}@{}", repo, branch);
        self.transport.get_json(&url, &query, &resource).await
    }

    /// Most recent releases, newest first
    pub async fn list_releases(&self, repo: &str, per_page: u32) -> Result<Vec<GitHubRelease>> {
        let url = format!("{}/repos/{}/releases", self.base_url, repo);
        let query = [("per_page", per_page.to_string())];
        self.transport.get_json(&url, &query, repo).await
    }

    /// All repositories of an organization, falling back to a user account
    /// when no organization by that name exists
    pub async fn list_owner_repos(&self, owner: &str) -> Result<Vec<GitHubRepo>> {
        let org_url = format!("{}/orgs/{}/repos", self.base_url, owner);
        let query = [("type", "all".to_string())];

        match self
            .transport
            .get_all_pages(&org_url, &query, GITHUB_PAGES, owner)
            .await
        {
            Err(ApiError::NotFound(_)) => {
                debug!("{} is not an organization, trying user repos", owner);
                let user_url = format!("{}/users/{}/repos", self.base_url, owner);
                let query = [("type", "owner".to_string())];
                self.transport
                    .get_all_pages(&user_url, &query, GITHUB_PAGES, owner)
                    .await
            }
            other => other,
        }
    }
}

/// Accept bases with or without the `/repos` suffix older configs carry
fn normalize_base(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    trimmed.strip_suffix("/repos").unwrap_or(trimmed).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepo {
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub default_branch: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCommit {
    pub sha: String,
    pub html_url: Option<String>,
    pub commit: GitHubCommitDetail,
    /// Linked GitHub account, absent when the email isn't tied to one
    pub author: Option<GitHubUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCommitDetail {
    #[serde(default)]
    pub message: String,
    pub author: Option<GitHubSignature>,
    pub committer: Option<GitHubSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSignature {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub html_url: Option<String>,
    pub author: Option<GitHubUser>,
}
