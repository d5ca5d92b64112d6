// Provider implementations for the supported hosting platforms
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::Config;
use crate::models::{CommitInfo, Platform, ReleaseInfo, RepoInfo};
use crate::{Error, Result};

pub mod cnb;
pub mod github;
pub mod gitlab;

pub use cnb::CnbProvider;
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;

/// Branch assumed when a provider doesn't report one
pub const FALLBACK_BRANCH: &str = "main";

/// What every hosting backend must answer.
///
/// Sequences come back newest first. Errors use the shared taxonomy so the
/// scheduler can tell a bad token from a throttled provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Most recent commits on `branch`, at most `limit`
    async fn get_recent_commits(&self, repo: &str, branch: &str, limit: u32) -> Result<Vec<CommitInfo>>;

    /// Most recent published releases, at most `limit`
    async fn get_recent_releases(&self, repo: &str, limit: u32) -> Result<Vec<ReleaseInfo>>;

    /// Every repository in a group or organization
    async fn get_group_repos(&self, group: &str) -> Result<Vec<RepoInfo>>;

    async fn resolve_default_branch(&self, repo: &str) -> Result<String>;
}

/// Display metadata for one configured provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub platform: Platform,
    pub enabled: bool,
    pub has_token: bool,
    pub api_url: String,
}

struct Entry {
    provider: Arc<dyn GitProvider>,
    has_token: bool,
    api_url: String,
}

/// The enabled providers, keyed by platform
#[derive(Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<Platform, Entry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client for every enabled provider section
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let mut registry = Self::new();

        for platform in Platform::all() {
            let Some(section) = config.provider(platform).filter(|p| p.enabled) else {
                continue;
            };
            let token = section.token();
            let api_url = section.api_url.clone();

            match platform {
                Platform::GitHub => {
                    let provider = GitHubProvider::new(token, api_url, timeout)?;
                    let (has_token, url) = (provider.has_token(), provider.api_url().to_string());
                    registry.insert(platform, Arc::new(provider), has_token, url);
                }
                Platform::GitLab => {
                    let provider = GitLabProvider::new(token, api_url, timeout)?;
                    let (has_token, url) = (provider.has_token(), provider.api_url().to_string());
                    registry.insert(platform, Arc::new(provider), has_token, url);
                }
                Platform::Cnb => {
                    let provider = CnbProvider::new(token, api_url, timeout)?;
                    let (has_token, url) = (provider.has_token(), provider.api_url().to_string());
                    registry.insert(platform, Arc::new(provider), has_token, url);
                }
            }
        }

        tracing::debug!("Enabled providers: {:?}", registry.enabled_platforms());
        Ok(registry)
    }

    /// Register a provider by hand, used to plug in test doubles
    pub fn insert(
        &mut self,
        platform: Platform,
        provider: Arc<dyn GitProvider>,
        has_token: bool,
        api_url: String,
    ) {
        self.entries.insert(
            platform,
            Entry {
                provider,
                has_token,
                api_url,
            },
        );
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn GitProvider>> {
        self.entries
            .get(&platform)
            .map(|e| Arc::clone(&e.provider))
            .ok_or_else(|| Error::ProviderDisabled(platform.to_string()))
    }

    pub fn is_enabled(&self, platform: Platform) -> bool {
        self.entries.contains_key(&platform)
    }

    pub fn enabled_platforms(&self) -> Vec<Platform> {
        self.entries.keys().copied().collect()
    }

    /// One row per known platform, enabled or not
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        Platform::all()
            .into_iter()
            .map(|platform| match self.entries.get(&platform) {
                Some(entry) => ProviderStatus {
                    platform,
                    enabled: true,
                    has_token: entry.has_token,
                    api_url: entry.api_url.clone(),
                },
                None => ProviderStatus {
                    platform,
                    enabled: false,
                    has_token: false,
                    api_url: String::new(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_follows_config() {
        let config = Config::from_toml_str(
            "[gitlab]\ntoken = \"glpat\"\napi_url = \"https://git.example.com/api/v4\"\n",
        )
        .unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();

        assert_eq!(
            registry.enabled_platforms(),
            vec![Platform::GitHub, Platform::GitLab]
        );
        assert!(matches!(
            registry.get(Platform::Cnb),
            Err(Error::ProviderDisabled(_))
        ));

        let statuses = registry.statuses();
        let gitlab = statuses.iter().find(|s| s.platform == Platform::GitLab).unwrap();
        assert!(gitlab.has_token);
        assert_eq!(gitlab.api_url, "https://git.example.com/api/v4");

        let cnb = statuses.iter().find(|s| s.platform == Platform::Cnb).unwrap();
        assert!(!cnb.enabled);
    }

    #[test]
    fn test_provider_without_token_still_builds() {
        let registry = ProviderRegistry::from_config(&Config::default()).unwrap();
        let github = &registry.statuses()[0];
        assert!(github.enabled);
        assert!(!github.has_token);
    }
}
