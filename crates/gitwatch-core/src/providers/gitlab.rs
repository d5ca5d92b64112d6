// GitLab provider - bridges the REST client with the GitProvider trait
use std::time::Duration;

use async_trait::async_trait;
use gitwatch_api::{GitLabClient, GitLabCommit, GitLabProject, GitLabRelease, GITLAB_API_BASE};

use super::{GitProvider, FALLBACK_BRANCH};
use crate::models::{excerpt, first_line, CommitInfo, ReleaseInfo, RepoInfo};
use crate::Result;

/// Works against gitlab.com or any self-hosted instance
pub struct GitLabProvider {
    client: GitLabClient,
    web_url: String,
}

impl GitLabProvider {
    pub fn new(token: Option<String>, api_url: Option<String>, timeout: Duration) -> Result<Self> {
        let base = api_url
            .map(|url| api_base(&url))
            .unwrap_or_else(|| GITLAB_API_BASE.to_string());
        let client = GitLabClient::with_timeout(token, base, timeout)?;
        let web_url = client.web_url();
        Ok(Self { client, web_url })
    }

    pub fn has_token(&self) -> bool {
        self.client.has_token()
    }

    pub fn api_url(&self) -> &str {
        self.client.base_url()
    }
}

/// People often paste the instance root; the API lives under `/api/v4`
fn api_base(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/api/v4") {
        trimmed.to_string()
    } else {
        format!("{}/api/v4", trimmed)
    }
}

#[async_trait]
impl GitProvider for GitLabProvider {
    async fn get_recent_commits(&self, repo: &str, branch: &str, limit: u32) -> Result<Vec<CommitInfo>> {
        let commits = self.client.list_commits(repo, branch, limit).await?;
        Ok(commits
            .into_iter()
            .map(|c| gitlab_to_commit(c, &self.web_url, repo))
            .collect())
    }

    async fn get_recent_releases(&self, repo: &str, limit: u32) -> Result<Vec<ReleaseInfo>> {
        let releases = self.client.list_releases(repo, limit).await?;
        Ok(releases
            .into_iter()
            .filter(|r| !r.upcoming_release)
            .map(|r| gitlab_to_release(r, &self.web_url, repo))
            .collect())
    }

    async fn get_group_repos(&self, group: &str) -> Result<Vec<RepoInfo>> {
        let projects = self.client.list_group_projects(group).await?;
        Ok(projects
            .into_iter()
            .filter(|p| !p.archived)
            .map(gitlab_to_repo)
            .collect())
    }

    async fn resolve_default_branch(&self, repo: &str) -> Result<String> {
        let project = self.client.get_project(repo).await?;
        Ok(project
            .default_branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string()))
    }
}

fn gitlab_to_commit(gl: GitLabCommit, web_url: &str, repo: &str) -> CommitInfo {
    // title is already the first line, but some instances leave it blank
    let message = if gl.title.trim().is_empty() {
        first_line(&gl.message)
    } else {
        gl.title.trim().to_string()
    };

    CommitInfo {
        url: gl
            .web_url
            .unwrap_or_else(|| format!("{}/{}/-/commit/{}", web_url, repo, gl.id)),
        sha: gl.id,
        message,
        author: gl.author_name.unwrap_or_else(|| "unknown".to_string()),
        timestamp: gl.committed_date,
    }
}

fn gitlab_to_release(gl: GitLabRelease, web_url: &str, repo: &str) -> ReleaseInfo {
    let url = gl
        .links
        .and_then(|l| l.self_url)
        .unwrap_or_else(|| format!("{}/{}/-/releases/{}", web_url, repo, gl.tag_name));

    ReleaseInfo {
        title: gl
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| gl.tag_name.clone()),
        body: excerpt(gl.description.as_deref()),
        author: gl.author.map(|u| u.username),
        published_at: gl.released_at,
        tag: gl.tag_name,
        url,
    }
}

fn gitlab_to_repo(gl: GitLabProject) -> RepoInfo {
    RepoInfo {
        full_name: gl.path_with_namespace,
        // include/exclude lists match the URL slug, not the display name
        name: gl.path,
        default_branch: gl
            .default_branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string()),
        description: gl.description,
        url: gl.web_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_self_hosted_base_gets_api_suffix() {
        assert_eq!(api_base("https://git.example.com/"), "https://git.example.com/api/v4");
        assert_eq!(
            api_base("https://git.example.com/api/v4"),
            "https://git.example.com/api/v4"
        );

        let provider = GitLabProvider::new(
            None,
            Some("https://git.example.com".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.api_url(), "https://git.example.com/api/v4");
        assert_eq!(provider.web_url, "https://git.example.com");
    }

    #[test]
    fn test_release_url_from_links() {
        let raw: GitLabRelease = serde_json::from_value(serde_json::json!({
            "tag_name": "v2.0",
            "name": "Two",
            "description": "Big one",
            "released_at": "2024-03-01T00:00:00Z",
            "_links": { "self": "https://gitlab.com/g/p/-/releases/v2.0" }
        }))
        .unwrap();

        let info = gitlab_to_release(raw, "https://gitlab.com", "g/p");
        assert_eq!(info.url, "https://gitlab.com/g/p/-/releases/v2.0");
        assert_eq!(info.title, "Two");
        assert_eq!(info.body.as_deref(), Some("Big one"));
    }

    #[test]
    fn test_commit_with_blank_title_uses_message() {
        let raw: GitLabCommit = serde_json::from_value(serde_json::json!({
            "id": "0123456789",
            "title": "",
            "message": "Bump deps\n\nsigned-off",
            "author_name": "ci"
        }))
        .unwrap();

        let info = gitlab_to_commit(raw, "https://gitlab.com", "g/p");
        assert_eq!(info.message, "Bump deps");
        assert_eq!(info.url, "https://gitlab.com/g/p/-/commit/0123456789");
    }

    #[test]
    fn test_nested_project_name_is_slug() {
        let raw: GitLabProject = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "API Server",
            "path": "api",
            "path_with_namespace": "platform/backend/api",
            "description": null,
            "web_url": "https://gitlab.com/platform/backend/api",
            "default_branch": "develop"
        }))
        .unwrap();

        let repo = gitlab_to_repo(raw);
        assert_eq!(repo.name, "api");
        assert_eq!(repo.full_name, "platform/backend/api");
        assert_eq!(repo.default_branch, "develop");
    }
}
