use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest release-note excerpt carried into an event
pub const BODY_EXCERPT_CHARS: usize = 200;

/// Which hosting platform a watch lives on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    #[serde(rename = "github", alias = "GitHub", alias = "Github")]
    GitHub,
    #[serde(rename = "gitlab", alias = "GitLab", alias = "Gitlab")]
    GitLab,
    #[serde(rename = "cnb", alias = "CNB", alias = "Cnb")]
    Cnb,
}

impl Platform {
    pub fn all() -> [Platform; 3] {
        [Platform::GitHub, Platform::GitLab, Platform::Cnb]
    }

    /// Lowercase id used in config files and state keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GitHub => "github",
            Platform::GitLab => "gitlab",
            Platform::Cnb => "cnb",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Platform::GitHub => "GitHub",
            Platform::GitLab => "GitLab",
            Platform::Cnb => "CNB",
        };
        f.pad(name)
    }
}

impl std::str::FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(Platform::GitHub),
            "gitlab" => Ok(Platform::GitLab),
            "cnb" => Ok(Platform::Cnb),
            other => Err(crate::Error::ConfigError(format!("unknown provider '{}'", other))),
        }
    }
}

/// What kind of activity a watch reports
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum WatchType {
    #[default]
    #[serde(alias = "commit")]
    Commits,
    #[serde(alias = "release")]
    Releases,
}

impl std::fmt::Display for WatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            WatchType::Commits => "commits",
            WatchType::Releases => "releases",
        })
    }
}

/// A single commit, normalized across providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    /// First line of the commit message
    pub message: String,
    pub author: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub url: String,
}

impl CommitInfo {
    pub fn short_sha(&self) -> &str {
        self.sha.get(..7).unwrap_or(&self.sha)
    }
}

/// A published release, normalized across providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
    pub body: Option<String>,
    pub author: Option<String>,
}

/// A repository discovered inside a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Owner-qualified id, e.g. `org/repo` or `group/sub/repo`
    pub full_name: String,
    /// Bare repository name, what include/exclude lists match against
    pub name: String,
    pub default_branch: String,
    pub description: Option<String>,
    pub url: String,
}

/// A single repository to watch, straight from config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedRepo {
    pub provider: Platform,
    pub repo: String,
    /// Empty means the provider's default branch
    #[serde(default)]
    pub branch: String,
    #[serde(default, alias = "type")]
    pub watch_type: WatchType,
    #[serde(default)]
    pub note: String,
}

/// A whole organization or group to watch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedGroup {
    pub provider: Platform,
    #[serde(alias = "org", alias = "organization")]
    pub group: String,
    #[serde(default, alias = "type")]
    pub watch_type: WatchType,
    /// Allow-list of bare repo names; empty means every repo
    #[serde(default, alias = "include")]
    pub include_repos: Vec<String>,
    #[serde(default, alias = "exclude")]
    pub exclude_repos: Vec<String>,
    /// Branch for every repo in the group; empty means each repo's default
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub note: String,
}

impl WatchedGroup {
    /// Include acts as an allow-list when non-empty, exclude always wins.
    /// Matching is exact and case-sensitive on the bare name.
    pub fn should_watch(&self, repo_name: &str) -> bool {
        if !self.include_repos.is_empty() && !self.include_repos.iter().any(|r| r == repo_name) {
            return false;
        }
        !self.exclude_repos.iter().any(|r| r == repo_name)
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.provider.as_str(), self.group)
    }
}

/// Chat destinations an event is pushed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destinations {
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
}

impl Destinations {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.users.is_empty()
    }

    /// Union, keeping first-seen order
    pub fn merge(&mut self, other: &Destinations) {
        for g in &other.groups {
            if !self.groups.contains(g) {
                self.groups.push(g.clone());
            }
        }
        for u in &other.users {
            if !self.users.contains(u) {
                self.users.push(u.clone());
            }
        }
    }
}

/// Where a concrete target came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum TargetSource {
    Repo,
    Group(String),
}

/// Identity of a watch target: (provider, repo, watch type, branch).
///
/// Releases are not branch-scoped, so their branch is always empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub provider: Platform,
    pub repo: String,
    pub watch_type: WatchType,
    pub branch: String,
}

impl TargetKey {
    pub fn new(provider: Platform, repo: &str, watch_type: WatchType, branch: &str) -> Self {
        let branch = match watch_type {
            WatchType::Commits => branch.to_string(),
            WatchType::Releases => String::new(),
        };
        Self {
            provider,
            repo: repo.to_string(),
            watch_type,
            branch,
        }
    }

    /// Key of the persisted cursor for this target
    pub fn storage_key(&self) -> String {
        match self.watch_type {
            WatchType::Commits => format!(
                "state:commits:{}:{}:{}",
                self.provider.as_str(),
                self.repo,
                self.branch
            ),
            WatchType::Releases => {
                format!("state:releases:{}:{}", self.provider.as_str(), self.repo)
            }
        }
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.watch_type {
            WatchType::Commits if !self.branch.is_empty() => write!(
                f,
                "{}/{}@{} ({})",
                self.provider.as_str(),
                self.repo,
                self.branch,
                self.watch_type
            ),
            _ => write!(f, "{}/{} ({})", self.provider.as_str(), self.repo, self.watch_type),
        }
    }
}

/// A concrete repo/branch/type combination checked each cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub provider: Platform,
    pub repo: String,
    /// May be empty until the default branch has been resolved
    pub branch: String,
    pub watch_type: WatchType,
    pub note: String,
    pub destinations: Destinations,
    pub source: TargetSource,
}

impl WatchTarget {
    pub fn from_repo(repo: &WatchedRepo, destinations: &Destinations) -> Self {
        Self {
            provider: repo.provider,
            repo: repo.repo.clone(),
            branch: repo.branch.clone(),
            watch_type: repo.watch_type,
            note: repo.note.clone(),
            destinations: destinations.clone(),
            source: TargetSource::Repo,
        }
    }

    pub fn from_group(group: &WatchedGroup, repo: &RepoInfo, destinations: &Destinations) -> Self {
        let branch = if group.branch.is_empty() {
            repo.default_branch.clone()
        } else {
            group.branch.clone()
        };

        Self {
            provider: group.provider,
            repo: repo.full_name.clone(),
            branch,
            watch_type: group.watch_type,
            note: group.note.clone(),
            destinations: destinations.clone(),
            source: TargetSource::Group(group.group.clone()),
        }
    }

    /// Commit targets need a concrete branch before they can be keyed
    pub fn needs_branch(&self) -> bool {
        self.watch_type == WatchType::Commits && self.branch.is_empty()
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.provider, &self.repo, self.watch_type, &self.branch)
    }
}

/// A new commit or release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateItem {
    Commit(CommitInfo),
    Release(ReleaseInfo),
}

impl UpdateItem {
    /// Short human id: abbreviated sha or release tag
    pub fn id(&self) -> &str {
        match self {
            UpdateItem::Commit(c) => c.short_sha(),
            UpdateItem::Release(r) => &r.tag,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            UpdateItem::Commit(c) => &c.url,
            UpdateItem::Release(r) => &r.url,
        }
    }
}

/// One notification's worth of data: which target, what happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub provider: Platform,
    pub repo: String,
    pub branch: String,
    pub watch_type: WatchType,
    pub note: String,
    pub item: UpdateItem,
}

impl UpdateEvent {
    pub fn new(target: &WatchTarget, item: UpdateItem) -> Self {
        Self {
            provider: target.provider,
            repo: target.repo.clone(),
            branch: target.branch.clone(),
            watch_type: target.watch_type,
            note: target.note.clone(),
            item,
        }
    }
}

/// First line of free text, trimmed
pub fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

/// First line of release notes, capped at [`BODY_EXCERPT_CHARS`]
pub fn excerpt(text: Option<&str>) -> Option<String> {
    let line = first_line(text?);
    if line.is_empty() {
        return None;
    }
    Some(match line.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((idx, _)) => line[..idx].to_string(),
        None => line,
    })
}
