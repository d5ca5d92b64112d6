// CNB provider - bridges the REST client with the GitProvider trait
use std::time::Duration;

use async_trait::async_trait;
use gitwatch_api::{CnbClient, CnbCommit, CnbRelease, CnbRepo, CNB_API_BASE};

use super::{GitProvider, FALLBACK_BRANCH};
use crate::models::{excerpt, first_line, CommitInfo, ReleaseInfo, RepoInfo};
use crate::Result;

pub struct CnbProvider {
    client: CnbClient,
}

impl CnbProvider {
    pub fn new(token: Option<String>, api_url: Option<String>, timeout: Duration) -> Result<Self> {
        let base = api_url.unwrap_or_else(|| CNB_API_BASE.to_string());
        Ok(Self {
            client: CnbClient::with_timeout(token, base, timeout)?,
        })
    }

    pub fn has_token(&self) -> bool {
        self.client.has_token()
    }

    pub fn api_url(&self) -> &str {
        self.client.base_url()
    }
}

#[async_trait]
impl GitProvider for CnbProvider {
    async fn get_recent_commits(&self, repo: &str, branch: &str, limit: u32) -> Result<Vec<CommitInfo>> {
        let commits = self.client.list_commits(repo, branch, limit).await?;
        let web = self.client.web_url();
        Ok(commits
            .into_iter()
            .filter_map(|c| cnb_to_commit(c, web, repo))
            .collect())
    }

    async fn get_recent_releases(&self, repo: &str, limit: u32) -> Result<Vec<ReleaseInfo>> {
        let releases = self.client.list_releases(repo, limit).await?;
        let web = self.client.web_url();
        Ok(releases
            .into_iter()
            .filter(|r| !r.draft)
            .filter_map(|r| cnb_to_release(r, web, repo))
            .collect())
    }

    async fn get_group_repos(&self, group: &str) -> Result<Vec<RepoInfo>> {
        let repos = self.client.list_group_repos(group).await?;
        let web = self.client.web_url();
        Ok(repos
            .into_iter()
            .filter_map(|r| cnb_to_repo(r, web, group))
            .collect())
    }

    async fn resolve_default_branch(&self, repo: &str) -> Result<String> {
        let head = self.client.get_head(repo).await?;
        Ok(head
            .name
            .map(|n| n.trim_start_matches("refs/heads/").to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string()))
    }
}

// Entries without an id can't be tracked, so they are dropped
fn cnb_to_commit(c: CnbCommit, web: &str, repo: &str) -> Option<CommitInfo> {
    let sha = c.sha()?.to_string();
    Some(CommitInfo {
        message: first_line(c.message()),
        author: c.author().unwrap_or("unknown").to_string(),
        timestamp: c.date(),
        url: format!("{}/{}/-/commit/{}", web, repo, sha),
        sha,
    })
}

fn cnb_to_release(r: CnbRelease, web: &str, repo: &str) -> Option<ReleaseInfo> {
    let tag = r.tag()?.to_string();
    Some(ReleaseInfo {
        title: r
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| tag.clone()),
        published_at: r.date(),
        url: format!("{}/{}/-/releases/{}", web, repo, tag),
        body: excerpt(r.notes()),
        author: r.author.as_ref().and_then(|u| u.display()).map(str::to_string),
        tag,
    })
}

fn cnb_to_repo(r: CnbRepo, web: &str, group: &str) -> Option<RepoInfo> {
    let name = r.slug()?.to_string();
    let full_name = format!("{}/{}", group.trim_end_matches('/'), name);
    Some(RepoInfo {
        url: r
            .web_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", web, full_name)),
        default_branch: r
            .default_branch
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string()),
        description: r.description,
        full_name,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_without_sha_is_dropped() {
        let raw: CnbCommit = serde_json::from_value(serde_json::json!({
            "message": "orphan"
        }))
        .unwrap();
        assert!(cnb_to_commit(raw, "https://cnb.cool", "g/r").is_none());
    }

    #[test]
    fn test_nested_commit_shape() {
        let raw: CnbCommit = serde_json::from_value(serde_json::json!({
            "sha": "feedface",
            "commit": {
                "message": "Add CI\n\ndetails",
                "author": { "name": "lee", "date": "2024-01-02T03:04:05Z" }
            }
        }))
        .unwrap();

        let info = cnb_to_commit(raw, "https://cnb.cool", "g/r").unwrap();
        assert_eq!(info.message, "Add CI");
        assert_eq!(info.author, "lee");
        assert_eq!(info.url, "https://cnb.cool/g/r/-/commit/feedface");
    }

    #[test]
    fn test_group_repo_full_name_from_slug() {
        let raw: CnbRepo = serde_json::from_value(serde_json::json!({
            "name": "team/tool",
            "default_branch": ""
        }))
        .unwrap();

        let repo = cnb_to_repo(raw, "https://cnb.cool", "team").unwrap();
        assert_eq!(repo.name, "tool");
        assert_eq!(repo.full_name, "team/tool");
        assert_eq!(repo.default_branch, "main");
        assert_eq!(repo.url, "https://cnb.cool/team/tool");
    }

    #[test]
    fn test_release_uses_description_when_no_body() {
        let raw: CnbRelease = serde_json::from_value(serde_json::json!({
            "tag": "1.0.0",
            "description": "First cut"
        }))
        .unwrap();

        let info = cnb_to_release(raw, "https://cnb.cool", "g/r").unwrap();
        assert_eq!(info.tag, "1.0.0");
        assert_eq!(info.title, "1.0.0");
        assert_eq!(info.body.as_deref(), Some("First cut"));
        assert_eq!(info.url, "https://cnb.cool/g/r/-/releases/1.0.0");
    }

    #[test]
    fn test_flat_commit_shape_reads_author_object() {
        let raw: CnbCommit = serde_json::from_value(serde_json::json!({
            "sha": "c0ffee",
            "message": "Bump deps",
            "author": { "name": "mei" },
            "author_name": "ignored"
        }))
        .unwrap();

        let info = cnb_to_commit(raw, "https://cnb.cool", "g/r").unwrap();
        assert_eq!(info.message, "Bump deps");
        assert_eq!(info.author, "mei");
    }
}
