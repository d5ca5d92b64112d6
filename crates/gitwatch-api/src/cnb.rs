use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http::{build_client, AuthScheme, PageParams, Transport};
use crate::retry::RetryConfig;
use crate::DEFAULT_TIMEOUT;

pub const CNB_API_BASE: &str = "https://api.cnb.cool";
const CNB_WEB_BASE: &str = "https://cnb.cool";
const CNB_ACCEPT: &str = "application/vnd.cnb.api+json";
const CNB_PAGES: PageParams = PageParams {
    page: "page",
    size: "page_size",
};

/// Client for the CNB (cnb.cool) OpenAPI.
///
/// CNB addresses everything by slug path: `{group}/{repo}/-/...`.
pub struct CnbClient {
    transport: Transport,
    base_url: String,
}

impl CnbClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_base_url(token, CNB_API_BASE.to_string())
    }

    pub fn with_base_url(token: Option<String>, base_url: String) -> Result<Self> {
        Self::with_timeout(token, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(token: Option<String>, base_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            transport: Transport {
                client: build_client(CNB_ACCEPT, timeout)?,
                token: token.filter(|t| !t.is_empty()),
                auth: AuthScheme::Bearer,
                retry_config: RetryConfig::default(),
            },
            base_url: base_url.trim_end_matches('/').to_string(),
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

    pub fn web_url(&self) -> &'static str {
        CNB_WEB_BASE
    }

    pub fn has_token(&self) -> bool {
        self.transport.token.is_some()
    }

    /// The branch HEAD points at
    pub async fn get_head(&self, repo: &str) -> Result<CnbHead> {
        let url = format!("{}/{}/-/git/head", self.base_url, repo);
        self.transport.get_json(&url, &[], repo).await
    }

    /// Most recent commits on `branch`, newest first
    pub async fn list_commits(&self, repo: &str, branch: &str, page_size: u32) -> Result<Vec<CnbCommit>> {
        let url = format!("{}/{}/-/git/commits", self.base_url, repo);
        let mut query = vec![
            ("page", "1".to_string()),
            ("page_size", page_size.to_string()),
        ];
        if !branch.is_empty() {
            query.push(("sha", branch.to_string()));
        }

        let resource = format!("{}@{}", repo, branch);
        self.transport.get_json(&url, &query, &resource).await
    }

    /// Most recent releases, newest first
    pub async fn list_releases(&self, repo: &str, page_size: u32) -> Result<Vec<CnbRelease>> {
        let url = format!("{}/{}/-/releases", self.base_url, repo);
        let query = [
            ("page", "1".to_string()),
            ("page_size", page_size.to_string()),
        ];
        self.transport.get_json(&url, &query, repo).await
    }

    /// Repositories directly under a group
    pub async fn list_group_repos(&self, group: &str) -> Result<Vec<CnbRepo>> {
        let url = format!("{}/{}/-/repos", self.base_url, group);
        self.transport.get_all_pages(&url, &[], CNB_PAGES, group).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnbHead {
    pub name: Option<String>,
}

/// A commit as CNB returns it.
///
/// Older endpoints put the message and author at the top level, newer ones
/// nest them under `commit` the way GitHub does, so both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnbCommit {
    pub sha: Option<String>,
    pub id: Option<String>,
    pub commit: Option<CnbCommitDetail>,
    pub message: Option<String>,
    pub author: Option<CnbSignature>,
    pub author_name: Option<String>,
    pub committed_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl CnbCommit {
    pub fn sha(&self) -> Option<&str> {
        self.sha.as_deref().or(self.id.as_deref())
    }

    pub fn message(&self) -> &str {
        self.commit
            .as_ref()
            .map(|c| c.message.as_str())
            .or(self.message.as_deref())
            .unwrap_or_default()
    }

    pub fn author(&self) -> Option<&str> {
        self.commit
            .as_ref()
            .and_then(|c| c.author.as_ref())
            .and_then(|a| a.name.as_deref())
            .or_else(|| self.author.as_ref().and_then(|a| a.name.as_deref()))
            .or(self.author_name.as_deref())
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.commit
            .as_ref()
            .and_then(|c| c.author.as_ref())
            .and_then(|a| a.date)
            .or(self.committed_date)
            .or(self.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnbCommitDetail {
    #[serde(default)]
    pub message: String,
    pub author: Option<CnbSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnbSignature {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnbRelease {
    pub tag_name: Option<String>,
    pub tag: Option<String>,
    pub name: Option<String>,
    pub body: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
    pub author: Option<CnbUser>,
}

impl CnbRelease {
    pub fn tag(&self) -> Option<&str> {
        self.tag_name.as_deref().or(self.tag.as_deref())
    }

    pub fn notes(&self) -> Option<&str> {
        self.body.as_deref().or(self.description.as_deref())
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.published_at.or(self.released_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnbUser {
    pub username: Option<String>,
    pub login: Option<String>,
}

impl CnbUser {
    pub fn display(&self) -> Option<&str> {
        self.username.as_deref().or(self.login.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnbRepo {
    pub name: Option<String>,
    pub path: Option<String>,
    pub description: Option<String>,
    pub web_url: Option<String>,
    pub default_branch: Option<String>,
}

impl CnbRepo {
    /// Bare repository name, without the group prefix
    pub fn slug(&self) -> Option<&str> {
        let raw = self.name.as_deref().or(self.path.as_deref())?;
        Some(raw.rsplit('/').next().unwrap_or(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CnbClient {
        CnbClient::with_base_url(Some("cnb-token".into()), server.uri())
            .unwrap()
            .with_retry_config(RetryConfig::disabled())
    }

    #[tokio::test]
    async fn test_commits_accept_both_shapes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/grp/app/-/git/commits"))
            .and(query_param("sha", "main"))
            .and(header("authorization", "Bearer cnb-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "sha": "new1",
                    "commit": {
                        "message": "nested shape",
                        "author": { "name": "A", "date": "2024-01-02T00:00:00Z" }
                    }
                },
                {
                    "id": "old1",
                    "message": "flat shape",
                    "author_name": "B",
                    "created_at": "2024-01-01T00:00:00Z"
                }
            ])))
            .mount(&server)
            .await;

        let commits = client(&server).list_commits("grp/app", "main", 10).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].sha(), Some("new1"));
        assert_eq!(commits[0].message(), "nested shape");
        assert_eq!(commits[0].author(), Some("A"));
        assert_eq!(commits[1].sha(), Some("old1"));
        assert_eq!(commits[1].message(), "flat shape");
        assert_eq!(commits[1].author(), Some("B"));
        assert!(commits[1].date().is_some());
    }

    #[tokio::test]
    async fn test_head_branch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/grp/app/-/git/head"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "trunk"
            })))
            .mount(&server)
            .await;

        let head = client(&server).get_head("grp/app").await.unwrap();
        assert_eq!(head.name.as_deref(), Some("trunk"));
    }

    #[tokio::test]
    async fn test_group_repos_use_page_size() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/grp/-/repos"))
            .and(query_param("page_size", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "path": "grp/app", "description": "main app" },
                { "name": "docs", "path": "grp/docs" }
            ])))
            .mount(&server)
            .await;

        let repos = client(&server).list_group_repos("grp").await.unwrap();
        let names: Vec<_> = repos.iter().filter_map(|r| r.slug()).collect();
        assert_eq!(names, vec!["app", "docs"]);
    }
}
