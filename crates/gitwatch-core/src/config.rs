use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{Destinations, Platform, WatchTarget, WatchedGroup, WatchedRepo};
use crate::{Error, Result};

/// Shortest polling interval we allow, in seconds
pub const MIN_CHECK_INTERVAL: u64 = 60;

/// Main configuration structure
///
/// Loaded once from a TOML file and validated before anything else sees it.
/// Tokens may also come from `GITWATCH_<PROVIDER>_TOKEN` env vars, which win
/// over the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auto_check: bool,

    /// Seconds between periodic checks
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Report the newest item on a target's very first check instead of
    /// silently seeding the cursor
    #[serde(default)]
    pub first_push: bool,

    /// Recent commits/releases fetched per target
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Targets checked in parallel
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// SQLite file holding cursors and group snapshots
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    #[serde(default = "default_github")]
    pub github: Option<ProviderConfig>,
    #[serde(default)]
    pub gitlab: Option<ProviderConfig>,
    #[serde(default)]
    pub cnb: Option<ProviderConfig>,

    /// Global destinations
    #[serde(default)]
    pub push: Destinations,

    #[serde(default)]
    pub watch_repos: Vec<WatchedRepo>,

    #[serde(default)]
    pub watch_groups: Vec<WatchedGroup>,

    /// Watch blocks that deliver to their own destinations
    #[serde(default)]
    pub watch_targets: Vec<TargetBlock>,
}

fn default_check_interval() -> u64 {
    1800 // half an hour keeps unauthenticated GitHub quotas happy
}

fn default_page_size() -> u32 {
    20
}

fn default_max_concurrency() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    30
}

fn default_github() -> Option<ProviderConfig> {
    Some(ProviderConfig::default())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_check: false,
            check_interval: default_check_interval(),
            first_push: false,
            page_size: default_page_size(),
            max_concurrency: default_max_concurrency(),
            request_timeout_secs: default_request_timeout(),
            state_path: None,
            github: default_github(),
            gitlab: None,
            cnb: None,
            push: Destinations::default(),
            watch_repos: Vec::new(),
            watch_groups: Vec::new(),
            watch_targets: Vec::new(),
        }
    }
}

/// Per-provider settings. A present section means enabled unless it says
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub token: Option<String>,

    /// API base, for GitHub Enterprise, self-hosted GitLab or a CNB mirror
    pub api_url: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
            api_url: None,
        }
    }
}

impl ProviderConfig {
    /// Token with blanks treated as absent
    pub fn token(&self) -> Option<String> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// A group of watches with its own push destinations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetBlock {
    #[serde(default)]
    pub repos: Vec<WatchedRepo>,
    #[serde(default)]
    pub groups: Vec<WatchedGroup>,
    #[serde(default)]
    pub push: Destinations,
}

impl Config {
    /// Load config from `path`, or the default location when `None`.
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            Self::parse(&contents)?
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = Self::parse(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Get the config file path
    /// Uses XDG on Linux/macOS, AppData on Windows
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::ConfigError("Could not find config directory".into()))?;
        Ok(config_dir.join("gitwatch").join("config.toml"))
    }

    /// Where cursors live unless `state_path` overrides it
    pub fn state_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.state_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::ConfigError("Could not find data directory".into()))?;
        Ok(data_dir.join("gitwatch").join("state.db"))
    }

    fn apply_env(&mut self) {
        for platform in Platform::all() {
            let var = format!("GITWATCH_{}_TOKEN", platform.as_str().to_uppercase());
            let Ok(token) = std::env::var(&var) else {
                continue;
            };
            if token.trim().is_empty() {
                continue;
            }

            let slot = self.provider_slot(platform);
            slot.get_or_insert_with(ProviderConfig::default).token = Some(token);
        }
    }

    fn provider_slot(&mut self, platform: Platform) -> &mut Option<ProviderConfig> {
        match platform {
            Platform::GitHub => &mut self.github,
            Platform::GitLab => &mut self.gitlab,
            Platform::Cnb => &mut self.cnb,
        }
    }

    pub fn provider(&self, platform: Platform) -> Option<&ProviderConfig> {
        match platform {
            Platform::GitHub => self.github.as_ref(),
            Platform::GitLab => self.gitlab.as_ref(),
            Platform::Cnb => self.cnb.as_ref(),
        }
    }

    pub fn is_enabled(&self, platform: Platform) -> bool {
        self.provider(platform).map(|p| p.enabled).unwrap_or(false)
    }

    /// Polling interval with the floor applied
    pub fn effective_interval(&self) -> u64 {
        self.check_interval.max(MIN_CHECK_INTERVAL)
    }

    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, 100)
    }

    /// Every watched repo with the destinations it delivers to
    pub fn all_watch_repos(&self) -> Vec<(WatchedRepo, Destinations)> {
        let mut out: Vec<_> = self
            .watch_repos
            .iter()
            .map(|r| (r.clone(), self.push.clone()))
            .collect();

        for block in &self.watch_targets {
            let dest = self.block_destinations(block);
            out.extend(block.repos.iter().map(|r| (r.clone(), dest.clone())));
        }
        out
    }

    /// Every watched group with the destinations it delivers to
    pub fn all_watch_groups(&self) -> Vec<(WatchedGroup, Destinations)> {
        let mut out: Vec<_> = self
            .watch_groups
            .iter()
            .map(|g| (g.clone(), self.push.clone()))
            .collect();

        for block in &self.watch_targets {
            let dest = self.block_destinations(block);
            out.extend(block.groups.iter().map(|g| (g.clone(), dest.clone())));
        }
        out
    }

    /// Concrete targets for individually watched repos
    pub fn repo_targets(&self) -> Vec<WatchTarget> {
        self.all_watch_repos()
            .iter()
            .map(|(repo, dest)| WatchTarget::from_repo(repo, dest))
            .collect()
    }

    fn block_destinations(&self, block: &TargetBlock) -> Destinations {
        if block.push.is_empty() {
            self.push.clone()
        } else {
            block.push.clone()
        }
    }

    /// Reject malformed entries before they reach the watcher
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::ConfigError("page_size must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::ConfigError("max_concurrency must be at least 1".into()));
        }

        for (repo, _) in self.all_watch_repos() {
            validate_repo_id(&repo.repo)
                .map_err(|why| Error::ConfigError(format!("watch_repos '{}': {}", repo.repo, why)))?;
            validate_branch(&repo.branch)
                .map_err(|why| Error::ConfigError(format!("watch_repos '{}': {}", repo.repo, why)))?;
        }

        for (group, _) in self.all_watch_groups() {
            validate_group_id(&group.group).map_err(|why| {
                Error::ConfigError(format!("watch_groups '{}': {}", group.group, why))
            })?;
            validate_branch(&group.branch).map_err(|why| {
                Error::ConfigError(format!("watch_groups '{}': {}", group.group, why))
            })?;
        }

        Ok(())
    }
}

fn validate_group_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("name is empty");
    }
    if id.trim() != id {
        return Err("name has surrounding whitespace");
    }
    if id.starts_with('/') || id.ends_with('/') {
        return Err("name has a leading or trailing slash");
    }
    if id.split('/').any(str::is_empty) {
        return Err("name has an empty path segment");
    }
    Ok(())
}

fn validate_repo_id(id: &str) -> std::result::Result<(), &'static str> {
    validate_group_id(id)?;
    if !id.contains('/') {
        return Err("expected owner/repo");
    }
    Ok(())
}

fn validate_branch(branch: &str) -> std::result::Result<(), &'static str> {
    if branch.trim() != branch {
        return Err("branch has surrounding whitespace");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WatchType;

    const SAMPLE: &str = r#"
auto_check = true
check_interval = 10
first_push = true

[gitlab]
token = "glpat"
api_url = "https://git.example.com/api/v4"

[push]
groups = ["100"]

[[watch_repos]]
provider = "github"
repo = "rust-lang/rust"
type = "releases"

[[watch_groups]]
provider = "gitlab"
org = "platform"
include = ["api"]

[[watch_targets]]
push = { users = ["42"] }

[[watch_targets.repos]]
provider = "cnb"
repo = "team/tool"
branch = "dev"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        assert!(config.auto_check);
        assert_eq!(config.effective_interval(), MIN_CHECK_INTERVAL);
        assert!(config.is_enabled(Platform::GitHub));
        assert!(config.is_enabled(Platform::GitLab));
        assert!(!config.is_enabled(Platform::Cnb));

        let repos = config.all_watch_repos();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].0.watch_type, WatchType::Releases);
        assert_eq!(repos[0].1.groups, vec!["100".to_string()]);
        assert_eq!(repos[1].0.provider, Platform::Cnb);
        assert_eq!(repos[1].1.users, vec!["42".to_string()]);
        assert!(repos[1].1.groups.is_empty());

        let groups = config.all_watch_groups();
        assert_eq!(groups[0].0.group, "platform");
        assert_eq!(groups[0].0.include_repos, vec!["api".to_string()]);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert!(!config.auto_check);
        assert_eq!(config.check_interval, 1800);
        assert_eq!(config.page_size, 20);
        assert!(config.is_enabled(Platform::GitHub));
        assert!(!config.is_enabled(Platform::GitLab));
    }

    #[test]
    fn test_disabled_section() {
        let config = Config::from_toml_str("[github]\nenabled = false\n").unwrap();
        assert!(!config.is_enabled(Platform::GitHub));
    }

    #[test]
    fn test_rejects_malformed_watches() {
        let bad = [
            "[[watch_repos]]\nprovider = \"github\"\nrepo = \"norepo\"\n",
            "[[watch_repos]]\nprovider = \"github\"\nrepo = \"/a/b\"\n",
            "[[watch_repos]]\nprovider = \"github\"\nrepo = \"a/b \"\n",
            "[[watch_repos]]\nprovider = \"bitbucket\"\nrepo = \"a/b\"\n",
            "[[watch_repos]]\nprovider = \"github\"\nrepo = \"a/b\"\ntype = \"issues\"\n",
            "[[watch_groups]]\nprovider = \"github\"\ngroup = \"\"\n",
            "page_size = 0\n",
            "max_concurrency = 0\n",
        ];

        for toml in bad {
            assert!(
                matches!(Config::from_toml_str(toml), Err(Error::ConfigError(_))),
                "accepted: {}",
                toml
            );
        }
    }

    #[test]
    fn test_nested_gitlab_path_is_valid() {
        let toml = "[[watch_repos]]\nprovider = \"gitlab\"\nrepo = \"a/b/c\"\n";
        assert!(Config::from_toml_str(toml).is_ok());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(config.watch_repos.is_empty());
    }

    #[test]
    fn test_blank_token_is_none() {
        let cfg = ProviderConfig {
            enabled: true,
            token: Some("  ".into()),
            api_url: None,
        };
        assert_eq!(cfg.token(), None);
    }
}
