// GitHub provider - bridges the REST client with the GitProvider trait
use std::time::Duration;

use async_trait::async_trait;
use gitwatch_api::{GitHubClient, GitHubCommit, GitHubRelease, GitHubRepo, GITHUB_API_BASE};

use super::{GitProvider, FALLBACK_BRANCH};
use crate::models::{excerpt, first_line, CommitInfo, ReleaseInfo, RepoInfo};
use crate::Result;

pub struct GitHubProvider {
    client: GitHubClient,
    web_url: String,
}

impl GitHubProvider {
    pub fn new(token: Option<String>, api_url: Option<String>, timeout: Duration) -> Result<Self> {
        let base = api_url.unwrap_or_else(|| GITHUB_API_BASE.to_string());
        let client = GitHubClient::with_timeout(token, base, timeout)?;
        let web_url = web_root(client.base_url());
        Ok(Self { client, web_url })
    }

    pub fn has_token(&self) -> bool {
        self.client.has_token()
    }

    pub fn api_url(&self) -> &str {
        self.client.base_url()
    }
}

/// `api.github.com` maps to `github.com`; Enterprise serves the API under
/// `/api/v3` on the web host
fn web_root(api_base: &str) -> String {
    if api_base == GITHUB_API_BASE {
        return "https://github.com".to_string();
    }
    api_base
        .strip_suffix("/api/v3")
        .unwrap_or(api_base)
        .to_string()
}

#[async_trait]
impl GitProvider for GitHubProvider {
    async fn get_recent_commits(&self, repo: &str, branch: &str, limit: u32) -> Result<Vec<CommitInfo>> {
        let commits = self.client.list_commits(repo, branch, limit).await?;
        Ok(commits
            .into_iter()
            .map(|c| github_to_commit(c, &self.web_url, repo))
            .collect())
    }

    async fn get_recent_releases(&self, repo: &str, limit: u32) -> Result<Vec<ReleaseInfo>> {
        let releases = self.client.list_releases(repo, limit).await?;
        Ok(releases
            .into_iter()
            .filter(|r| !r.draft)
            .map(|r| github_to_release(r, &self.web_url, repo))
            .collect())
    }

    async fn get_group_repos(&self, group: &str) -> Result<Vec<RepoInfo>> {
        let repos = self.client.list_owner_repos(group).await?;
        Ok(repos
            .into_iter()
            .filter(|r| !r.archived)
            .map(github_to_repo)
            .collect())
    }

    async fn resolve_default_branch(&self, repo: &str) -> Result<String> {
        let meta = self.client.get_repository(repo).await?;
        Ok(meta
            .default_branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string()))
    }
}

fn github_to_commit(gh: GitHubCommit, web_url: &str, repo: &str) -> CommitInfo {
    // Prefer the linked account, then the git signature
    let author = gh
        .author
        .map(|u| u.login)
        .or_else(|| gh.commit.author.as_ref().and_then(|s| s.name.clone()))
        .unwrap_or_else(|| "unknown".to_string());

    let timestamp = gh
        .commit
        .author
        .as_ref()
        .and_then(|s| s.date)
        .or_else(|| gh.commit.committer.as_ref().and_then(|s| s.date));

    let url = gh
        .html_url
        .unwrap_or_else(|| format!("{}/{}/commit/{}", web_url, repo, gh.sha));

    CommitInfo {
        message: first_line(&gh.commit.message),
        sha: gh.sha,
        author,
        timestamp,
        url,
    }
}

fn github_to_release(gh: GitHubRelease, web_url: &str, repo: &str) -> ReleaseInfo {
    let url = gh
        .html_url
        .unwrap_or_else(|| format!("{}/{}/releases/tag/{}", web_url, repo, gh.tag_name));

    ReleaseInfo {
        title: gh
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| gh.tag_name.clone()),
        body: excerpt(gh.body.as_deref()),
        author: gh.author.map(|u| u.login),
        published_at: gh.published_at,
        tag: gh.tag_name,
        url,
    }
}

fn github_to_repo(gh: GitHubRepo) -> RepoInfo {
    RepoInfo {
        full_name: gh.full_name,
        name: gh.name,
        default_branch: gh
            .default_branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string()),
        description: gh.description,
        url: gh.html_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(json: serde_json::Value) -> GitHubCommit {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_commit_normalization() {
        let raw = commit(serde_json::json!({
            "sha": "abc1234def",
            "commit": {
                "message": "Fix parser\n\nLong body",
                "author": { "name": "Jane", "date": "2024-05-01T10:00:00Z" }
            },
            "author": null
        }));

        let info = github_to_commit(raw, "https://github.com", "o/r");
        assert_eq!(info.message, "Fix parser");
        assert_eq!(info.author, "Jane");
        assert_eq!(info.url, "https://github.com/o/r/commit/abc1234def");
        assert!(info.timestamp.is_some());
    }

    #[test]
    fn test_release_title_falls_back_to_tag() {
        let raw: GitHubRelease = serde_json::from_value(serde_json::json!({
            "tag_name": "v1.2.0",
            "name": "",
            "body": "Highlights\n- a\n- b",
            "draft": false,
            "prerelease": false,
            "published_at": "2024-05-01T10:00:00Z",
            "html_url": null,
            "author": { "login": "bot" }
        }))
        .unwrap();

        let info = github_to_release(raw, "https://github.com", "o/r");
        assert_eq!(info.title, "v1.2.0");
        assert_eq!(info.body.as_deref(), Some("Highlights"));
        assert_eq!(info.url, "https://github.com/o/r/releases/tag/v1.2.0");
        assert_eq!(info.author.as_deref(), Some("bot"));
    }

    #[test]
    fn test_repo_without_default_branch() {
        let raw: GitHubRepo = serde_json::from_value(serde_json::json!({
            "name": "r",
            "full_name": "o/r",
            "description": null,
            "html_url": "https://github.com/o/r",
            "default_branch": null
        }))
        .unwrap();

        assert_eq!(github_to_repo(raw).default_branch, "main");
    }

    #[test]
    fn test_enterprise_web_root() {
        assert_eq!(web_root("https://api.github.com"), "https://github.com");
        assert_eq!(web_root("https://ghe.corp/api/v3"), "https://ghe.corp");
    }
}
