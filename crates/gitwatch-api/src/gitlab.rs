use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http::{build_client, AuthScheme, PageParams, Transport};
use crate::retry::RetryConfig;
use crate::DEFAULT_TIMEOUT;

pub const GITLAB_API_BASE: &str = "https://gitlab.com/api/v4";
const GITLAB_PAGES: PageParams = PageParams {
    page: "page",
    size: "per_page",
};

pub struct GitLabClient {
    transport: Transport,
    base_url: String,
}

impl GitLabClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_base_url(token, GITLAB_API_BASE.to_string())
    }

    /// For self-hosted GitLab instances
    pub fn with_base_url(token: Option<String>, base_url: String) -> Result<Self> {
        Self::with_timeout(token, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(token: Option<String>, base_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            transport: Transport {
                client: build_client("application/json", timeout)?,
                token: token.filter(|t| !t.is_empty()),
                auth: AuthScheme::PrivateToken,
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

    /// Browser-facing root of the instance, e.g. `https://gitlab.com`
    pub fn web_url(&self) -> String {
        self.base_url
            .strip_suffix("/api/v4")
            .unwrap_or(&self.base_url)
            .to_string()
    }

    pub fn has_token(&self) -> bool {
        self.transport.token.is_some()
    }

    /// Get a specific project by path (e.g., "gitlab-org/gitlab")
    pub async fn get_project(&self, path: &str) -> Result<GitLabProject> {
        // GitLab uses URL-encoded paths
        let encoded_path = urlencoding::encode(path);
        let url = format!("{}/projects/{}", self.base_url, encoded_path);
        self.transport.get_json(&url, &[], path).await
    }

    /// Most recent commits on `branch`, newest first
    pub async fn list_commits(&self, path: &str, branch: &str, per_page: u32) -> Result<Vec<GitLabCommit>> {
        let encoded_path = urlencoding::encode(path);
        let url = format!("{}/projects/{}/repository/commits", self.base_url, encoded_path);
        let mut query = vec![("per_page", per_page.to_string())];
        if !branch.is_empty() {
            query.push(("ref_name", branch.to_string()));
        }

        let resource = format!("{}@{}", path, branch);
        self.transport.get_json(&url, &query, &resource).await
    }

    /// Most recent releases, newest first (GitLab sorts by `released_at`)
    pub async fn list_releases(&self, path: &str, per_page: u32) -> Result<Vec<GitLabRelease>> {
        let encoded_path = urlencoding::encode(path);
        let url = format!("{}/projects/{}/releases", self.base_url, encoded_path);
        let query = [("per_page", per_page.to_string())];
        self.transport.get_json(&url, &query, path).await
    }

    /// All non-archived projects of a group, subgroups included
    pub async fn list_group_projects(&self, group: &str) -> Result<Vec<GitLabProject>> {
        let encoded_group = urlencoding::encode(group);
        let url = format!("{}/groups/{}/projects", self.base_url, encoded_group);
        let query = [
            ("include_subgroups", "true".to_string()),
            ("archived", "false".to_string()),
        ];
        self.transport
            .get_all_pages(&url, &query, GITLAB_PAGES, group)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabProject {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub path_with_namespace: String,
    pub description: Option<String>,
    pub web_url: String,
    pub default_branch: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabCommit {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub author_name: Option<String>,
    pub committed_date: Option<DateTime<Utc>>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabRelease {
    pub tag_name: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub upcoming_release: bool,
    pub author: Option<GitLabUser>,
    #[serde(rename = "_links")]
    pub links: Option<GitLabReleaseLinks>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabUser {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabReleaseLinks {
    #[serde(rename = "self")]
    pub self_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GitLabClient {
        GitLabClient::with_base_url(Some("glpat".into()), format!("{}/api/v4", server.uri()))
            .unwrap()
            .with_retry_config(RetryConfig::disabled())
    }

    fn project_json(id: u64, path: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": path,
            "path": path,
            "path_with_namespace": format!("team/{}", path),
            "description": null,
            "web_url": format!("https://gitlab.example.com/team/{}", path),
            "default_branch": "main"
        })
    }

    #[test]
    fn test_web_url_for_self_hosted_instance() {
        let client =
            GitLabClient::with_base_url(None, "https://git.example.com/api/v4/".into()).unwrap();
        assert_eq!(client.base_url(), "https://git.example.com/api/v4");
        assert_eq!(client.web_url(), "https://git.example.com");
    }

    #[tokio::test]
    async fn test_list_commits_uses_encoded_path_and_private_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects/team%2Fapp/repository/commits"))
            .and(query_param("ref_name", "main"))
            .and(header("PRIVATE-TOKEN", "glpat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "f00d",
                    "title": "Bump deps",
                    "message": "Bump deps\n",
                    "author_name": "Ops",
                    "committed_date": "2024-03-02T08:00:00Z",
                    "web_url": "https://gitlab.example.com/team/app/-/commit/f00d"
                }
            ])))
            .mount(&server)
            .await;

        let commits = client(&server).list_commits("team/app", "main", 20).await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].id, "f00d");
        assert_eq!(commits[0].author_name.as_deref(), Some("Ops"));
    }

    #[tokio::test]
    async fn test_group_projects_paginate_until_short_page() {
        let server = MockServer::start().await;

        let full_page: Vec<_> = (0..100).map(|i| project_json(i, &format!("p{}", i))).collect();
        Mock::given(method("GET"))
            .and(path("/api/v4/groups/team/projects"))
            .and(query_param("page", "1"))
            .and(query_param("include_subgroups", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(full_page))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v4/groups/team/projects"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(vec![project_json(100, "last")]),
            )
            .mount(&server)
            .await;

        let projects = client(&server).list_group_projects("team").await.unwrap();
        assert_eq!(projects.len(), 101);
        assert_eq!(projects[100].path, "last");
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects/team%2Fapp"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).get_project("team/app").await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }
}
