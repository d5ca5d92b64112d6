use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gitwatch_cache::SqliteStore;
use gitwatch_core::{
    CommitInfo, Config, Destinations, Error, GitProvider, NotificationSink, Orchestrator, Platform,
    ProviderRegistry, ReleaseInfo, RepoInfo, Result, UpdateEvent,
};
use tempfile::TempDir;

/// In-memory hosting platform the test can push to
#[derive(Default)]
struct FakeHost {
    commits: Mutex<HashMap<String, Vec<CommitInfo>>>,
    releases: Mutex<HashMap<String, Vec<ReleaseInfo>>>,
    groups: Mutex<HashMap<String, Vec<RepoInfo>>>,
}

impl FakeHost {
    fn push_commit(&self, repo: &str, sha: &str) {
        let mut commits = self.commits.lock().unwrap();
        commits.entry(repo.to_string()).or_default().insert(
            0,
            CommitInfo {
                sha: sha.to_string(),
                message: format!("change {}", sha),
                author: "dev".into(),
                timestamp: None,
                url: format!("https://git.example.com/{}/commit/{}", repo, sha),
            },
        );
    }

    fn publish(&self, repo: &str, tag: &str) {
        let mut releases = self.releases.lock().unwrap();
        releases.entry(repo.to_string()).or_default().insert(
            0,
            ReleaseInfo {
                tag: tag.to_string(),
                title: tag.to_string(),
                published_at: None,
                url: String::new(),
                body: None,
                author: None,
            },
        );
    }

    fn add_repo(&self, group: &str, name: &str) {
        let mut groups = self.groups.lock().unwrap();
        groups.entry(group.to_string()).or_default().push(RepoInfo {
            full_name: format!("{}/{}", group, name),
            name: name.to_string(),
            default_branch: "main".into(),
            description: None,
            url: String::new(),
        });
    }
}

#[async_trait]
impl GitProvider for FakeHost {
    async fn get_recent_commits(&self, repo: &str, _branch: &str, limit: u32) -> Result<Vec<CommitInfo>> {
        let commits = self.commits.lock().unwrap();
        let list = commits
            .get(repo)
            .ok_or_else(|| Error::NotFound(repo.to_string()))?;
        Ok(list.iter().take(limit as usize).cloned().collect())
    }

    async fn get_recent_releases(&self, repo: &str, limit: u32) -> Result<Vec<ReleaseInfo>> {
        let releases = self.releases.lock().unwrap();
        Ok(releases
            .get(repo)
            .map(|l| l.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_group_repos(&self, group: &str) -> Result<Vec<RepoInfo>> {
        let groups = self.groups.lock().unwrap();
        groups
            .get(group)
            .cloned()
            .ok_or_else(|| Error::NotFound(group.to_string()))
    }

    async fn resolve_default_branch(&self, _repo: &str) -> Result<String> {
        Ok("main".to_string())
    }
}

#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<(Destinations, UpdateEvent)>>,
}

#[async_trait]
impl NotificationSink for CollectingSink {
    async fn deliver(&self, destinations: &Destinations, event: &UpdateEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((destinations.clone(), event.clone()));
        Ok(())
    }
}

const CONFIG: &str = r#"
page_size = 5

[gitlab]
api_url = "https://git.example.com/api/v4"

[push]
groups = ["ops"]

[[watch_repos]]
provider = "gitlab"
repo = "infra/deploy"
branch = "main"

[[watch_groups]]
provider = "gitlab"
group = "libs"
watch_type = "releases"
exclude = ["scratch"]

[[watch_targets]]
push = { users = ["alice"] }

[[watch_targets.repos]]
provider = "gitlab"
repo = "infra/secrets"
branch = "main"
"#;

fn build(host: Arc<FakeHost>, dir: &TempDir, sink: Arc<CollectingSink>) -> Orchestrator {
    let config = Config::from_toml_str(CONFIG).unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("state.db")).unwrap());

    let mut registry = ProviderRegistry::new();
    registry.insert(Platform::GitLab, host, false, "https://git.example.com/api/v4".into());

    Orchestrator::new(config, Arc::new(registry), store, sink)
}

#[tokio::test]
async fn test_full_cycle_reports_each_update_once() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.push_commit("infra/deploy", "d1");
    host.push_commit("infra/secrets", "s1");
    host.add_repo("libs", "core");
    host.add_repo("libs", "scratch");
    host.publish("libs/core", "v1.0");
    host.publish("libs/scratch", "v0.1");

    let sink = Arc::new(CollectingSink::default());
    let orch = build(host.clone(), &dir, sink.clone());

    // baseline: nothing reported
    let first = orch.check_now().await;
    assert!(first.failures.is_empty(), "{:?}", first.failures);
    assert_eq!(first.results.len(), 3);
    assert_eq!(first.total_new(), 0);

    host.push_commit("infra/deploy", "d2");
    host.push_commit("infra/deploy", "d3");
    host.publish("libs/core", "v1.1");
    host.publish("libs/scratch", "v0.2");
    host.push_commit("infra/secrets", "s2");

    let second = orch.check_now().await;
    let ids: Vec<&str> = second.events.iter().map(|e| e.item.id()).collect();
    assert_eq!(ids, vec!["v1.1", "d2", "d3", "s2"]);

    let third = orch.check_now().await;
    assert_eq!(third.total_new(), 0);

    let delivered = sink.events.lock().unwrap();
    let secrets = delivered
        .iter()
        .find(|(_, e)| e.repo == "infra/secrets")
        .unwrap();
    assert_eq!(secrets.0.users, vec!["alice".to_string()]);
    assert!(secrets.0.groups.is_empty());
}

#[tokio::test]
async fn test_cursors_survive_restart() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.push_commit("infra/deploy", "d1");
    host.push_commit("infra/secrets", "s1");
    host.add_repo("libs", "core");

    {
        let orch = build(host.clone(), &dir, Arc::new(CollectingSink::default()));
        orch.check_now().await;
    }

    host.push_commit("infra/deploy", "d2");

    let orch = build(host, &dir, Arc::new(CollectingSink::default()));
    let summary = orch.check_now().await;
    let ids: Vec<&str> = summary.events.iter().map(|e| e.item.id()).collect();
    assert_eq!(ids, vec!["d2"]);

    // libs/core has no releases yet, so only the two commit targets are stored
    let status = orch.status().await;
    assert_eq!(status.tracked_targets, 2);
    assert_eq!(status.cached_groups.len(), 1);
}

#[tokio::test]
async fn test_missing_repo_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.push_commit("infra/secrets", "s1");

    let orch = build(host, &dir, Arc::new(CollectingSink::default()));
    let summary = orch.check_now().await;

    // infra/deploy has no commits list, libs group is unknown
    let failed: Vec<&str> = summary.failures.iter().map(|f| f.target.as_str()).collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&"gitlab:libs"));
    assert_eq!(summary.results.len(), 1);
}

#[tokio::test]
async fn test_reset_reseeds_silently() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.push_commit("infra/deploy", "d1");
    host.push_commit("infra/secrets", "s1");
    host.add_repo("libs", "core");

    let orch = build(host.clone(), &dir, Arc::new(CollectingSink::default()));
    orch.check_now().await;

    let removed = orch
        .reset(Some(Platform::GitLab), Some("infra/deploy"))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    host.push_commit("infra/deploy", "d2");
    let summary = orch.check_now().await;
    assert_eq!(summary.total_new(), 0);
}
