//! Drives check cycles: expand groups, fetch, diff, deliver.
//!
//! Only one cycle runs at a time. A manual check that arrives while the
//! periodic cycle is running waits for it and then runs in full. Within a
//! cycle, targets are checked concurrently up to `max_concurrency`, and a
//! failing target only ever affects its own entry in the summary.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use gitwatch_cache::KeyValueStore;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::diff::DiffEngine;
use crate::error::FailureKind;
use crate::group::{CachedGroup, GroupResolver};
use crate::models::{
    Destinations, Platform, RepoInfo, TargetKey, TargetSource, UpdateEvent, UpdateItem,
    WatchTarget, WatchType, WatchedGroup,
};
use crate::notify::NotificationSink;
use crate::providers::{ProviderRegistry, ProviderStatus};
use crate::{Error, Result};

/// Backoff applied when a provider throttles without saying for how long
pub const DEFAULT_RATE_LIMIT_BACKOFF: u64 = 60;

/// New-item count for one checked target
#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    pub target: TargetKey,
    pub new_items: usize,
}

/// Something that went wrong for one target or group
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    /// Target key or group label
    pub target: String,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl Failure {
    fn new(target: impl Into<String>, err: &Error) -> Self {
        Self {
            target: target.into(),
            kind: err.kind(),
            message: err.to_string(),
            retry_after: err.retry_after(),
        }
    }
}

/// Outcome of one full cycle
#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<TargetResult>,
    pub failures: Vec<Failure>,
    /// Watches whose provider is not enabled
    pub skipped: Vec<String>,
    /// Every new item, in delivery order
    pub events: Vec<UpdateEvent>,
    pub delivery_failures: usize,
}

impl CheckSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            results: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            events: Vec::new(),
            delivery_failures: 0,
        }
    }

    pub fn total_new(&self) -> usize {
        self.events.len()
    }
}

/// Outcome of a forced group refresh
#[derive(Debug, Clone, Serialize)]
pub struct GroupRefresh {
    pub group: String,
    /// Repos watched after the refresh (or still watched from cache on error)
    pub repos: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub groups: Vec<GroupRefresh>,
    pub skipped: Vec<String>,
}

/// Headline numbers of the most recent cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: usize,
    pub new_items: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThrottleStatus {
    pub platform: Platform,
    pub remaining_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub auto_check: bool,
    pub check_interval: u64,
    pub first_push: bool,
    pub providers: Vec<ProviderStatus>,
    pub watched_repos: usize,
    pub watched_groups: usize,
    pub tracked_targets: usize,
    pub cached_groups: Vec<CachedGroup>,
    pub throttled: Vec<ThrottleStatus>,
    pub last_cycle: Option<CycleRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Repo,
    Group,
}

/// One configured watch as the operator wrote it
#[derive(Debug, Clone, Serialize)]
pub struct WatchEntry {
    pub kind: WatchKind,
    pub provider: Platform,
    pub name: String,
    pub branch: String,
    pub watch_type: WatchType,
    pub note: String,
    /// False when the provider is disabled
    pub active: bool,
    /// Repos currently known for a group, if it has been resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_repos: Option<usize>,
    pub destinations: Destinations,
}

pub struct Orchestrator {
    config: Config,
    registry: Arc<ProviderRegistry>,
    resolver: GroupResolver,
    engine: DiffEngine,
    sink: Arc<dyn NotificationSink>,
    cycle_lock: tokio::sync::Mutex<()>,
    branches: RwLock<HashMap<(Platform, String), String>>,
    throttled: Mutex<HashMap<Platform, Instant>>,
    last_cycle: RwLock<Option<CycleRecord>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            resolver: GroupResolver::new(Arc::clone(&registry), Arc::clone(&store)),
            engine: DiffEngine::new(store, config.first_push),
            config,
            registry,
            sink,
            cycle_lock: tokio::sync::Mutex::new(()),
            branches: RwLock::new(HashMap::new()),
            throttled: Mutex::new(HashMap::new()),
            last_cycle: RwLock::new(None),
        }
    }

    /// Build providers from `config` and wire everything up
    pub fn from_config(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::from_config(&config)?);
        Ok(Self::new(config, registry, store, sink))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one full cycle now, after any cycle already in progress
    pub async fn check_now(&self) -> CheckSummary {
        let _cycle = self.cycle_lock.lock().await;
        let mut summary = CheckSummary::new(Utc::now());

        let targets = self.collect_targets(&mut summary).await;
        info!("Checking {} target(s)", targets.len());

        let outcomes: Vec<(WatchTarget, Result<Vec<UpdateItem>>)> = stream::iter(targets)
            .map(|target| async move {
                let result = self.check_target(&target).await;
                (target, result)
            })
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut deliveries = Vec::new();
        for (target, result) in outcomes {
            let key = target.key();
            match result {
                Ok(items) => {
                    if !items.is_empty() {
                        info!("{}: {} new", key, items.len());
                    }
                    summary.results.push(TargetResult {
                        target: key,
                        new_items: items.len(),
                    });
                    for item in items {
                        deliveries.push((target.destinations.clone(), UpdateEvent::new(&target, item)));
                    }
                }
                Err(e) => {
                    warn!("{}: {}", key, e);
                    summary.failures.push(Failure::new(key.to_string(), &e));
                }
            }
        }

        for (destinations, event) in deliveries {
            if let Err(e) = self.sink.deliver(&destinations, &event).await {
                error!(
                    "Delivery of {} {} failed: {}",
                    event.repo,
                    event.item.id(),
                    e
                );
                summary.delivery_failures += 1;
            }
            summary.events.push(event);
        }

        summary.finished_at = Utc::now();
        info!(
            "Cycle done: {} target(s), {} new, {} failure(s)",
            summary.results.len() + summary.failures.len(),
            summary.total_new(),
            summary.failures.len()
        );

        *self.last_cycle.write().await = Some(CycleRecord {
            started_at: summary.started_at,
            finished_at: summary.finished_at,
            targets: summary.results.len(),
            new_items: summary.total_new(),
            failures: summary.failures.len(),
        });

        summary
    }

    /// Expand groups, add single repos, fill in default branches, dedupe
    async fn collect_targets(&self, summary: &mut CheckSummary) -> Vec<WatchTarget> {
        let mut targets = Vec::new();

        for (group, destinations) in self.config.all_watch_groups() {
            if !self.registry.is_enabled(group.provider) {
                debug!("Skipping {}: provider disabled", group.label());
                summary.skipped.push(group.label());
                continue;
            }

            let repos = match self.resolve_group(&group).await {
                Ok(repos) => repos,
                Err(e) => {
                    summary.failures.push(Failure::new(group.label(), &e));
                    // keep watching what we already knew about
                    self.resolver.cached(&group).await.unwrap_or_default()
                }
            };

            targets.extend(
                repos
                    .iter()
                    .map(|repo| WatchTarget::from_group(&group, repo, &destinations)),
            );
        }

        for target in self.config.repo_targets() {
            if self.registry.is_enabled(target.provider) {
                targets.push(target);
            } else {
                debug!("Skipping {}: provider disabled", target.repo);
                summary
                    .skipped
                    .push(format!("{}:{}", target.provider.as_str(), target.repo));
            }
        }

        let targets = self.fill_branches(targets, summary).await;
        dedupe_targets(targets)
    }

    async fn resolve_group(&self, group: &WatchedGroup) -> Result<Vec<RepoInfo>> {
        if self.resolver.cached(group).await.is_none() {
            self.ensure_not_throttled(group.provider)?;
        }
        self.resolver
            .resolve(group, false)
            .await
            .map_err(|e| self.note_error(group.provider, e))
    }

    async fn fill_branches(
        &self,
        targets: Vec<WatchTarget>,
        summary: &mut CheckSummary,
    ) -> Vec<WatchTarget> {
        let resolved: Vec<(WatchTarget, Result<String>)> = stream::iter(targets)
            .map(|target| async move {
                if !target.needs_branch() {
                    let branch = target.branch.clone();
                    return (target, Ok(branch));
                }
                let branch = self.default_branch(target.provider, &target.repo).await;
                (target, branch)
            })
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut ready = Vec::with_capacity(resolved.len());
        for (mut target, branch) in resolved {
            match branch {
                Ok(branch) => {
                    target.branch = branch;
                    ready.push(target);
                }
                Err(e) => {
                    warn!("{}: could not resolve default branch: {}", target.repo, e);
                    let label = format!(
                        "{}/{} ({})",
                        target.provider.as_str(),
                        target.repo,
                        target.watch_type
                    );
                    summary.failures.push(Failure::new(label, &e));
                }
            }
        }
        ready
    }

    /// Default branch, looked up once per process per repo
    async fn default_branch(&self, platform: Platform, repo: &str) -> Result<String> {
        let key = (platform, repo.to_string());
        if let Some(branch) = self.branches.read().await.get(&key) {
            return Ok(branch.clone());
        }

        self.ensure_not_throttled(platform)?;
        let provider = self.registry.get(platform)?;
        let branch = provider
            .resolve_default_branch(repo)
            .await
            .map_err(|e| self.note_error(platform, e))?;

        debug!("{}:{} default branch is {}", platform.as_str(), repo, branch);
        self.branches.write().await.insert(key, branch.clone());
        Ok(branch)
    }

    async fn check_target(&self, target: &WatchTarget) -> Result<Vec<UpdateItem>> {
        self.ensure_not_throttled(target.provider)?;

        let provider = self.registry.get(target.provider)?;
        let key = target.key();
        let limit = self.config.effective_page_size();

        let items = match target.watch_type {
            WatchType::Commits => {
                let fetched = provider
                    .get_recent_commits(&target.repo, &target.branch, limit)
                    .await
                    .map_err(|e| self.note_error(target.provider, e))?;
                self.engine
                    .check(&key, fetched)
                    .await?
                    .into_iter()
                    .map(UpdateItem::Commit)
                    .collect()
            }
            WatchType::Releases => {
                let fetched = provider
                    .get_recent_releases(&target.repo, limit)
                    .await
                    .map_err(|e| self.note_error(target.provider, e))?;
                self.engine
                    .check(&key, fetched)
                    .await?
                    .into_iter()
                    .map(UpdateItem::Release)
                    .collect()
            }
        };

        Ok(items)
    }

    /// Start a provider backoff when it throttles us
    fn note_error(&self, platform: Platform, err: Error) -> Error {
        if let Error::RateLimitExceeded { retry_after } = &err {
            let secs = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF);
            warn!("{} is rate limiting, backing off for {}s", platform, secs);
            let until = Instant::now() + Duration::from_secs(secs);
            let mut throttled = self.throttled.lock().unwrap_or_else(|p| p.into_inner());
            let entry = throttled.entry(platform).or_insert(until);
            if *entry < until {
                *entry = until;
            }
        }
        err
    }

    fn throttle_remaining(&self, platform: Platform) -> Option<u64> {
        let mut throttled = self.throttled.lock().unwrap_or_else(|p| p.into_inner());
        let until = *throttled.get(&platform)?;
        let now = Instant::now();
        if until <= now {
            throttled.remove(&platform);
            return None;
        }
        Some((until - now).as_secs().max(1))
    }

    fn ensure_not_throttled(&self, platform: Platform) -> Result<()> {
        match self.throttle_remaining(platform) {
            Some(secs) => Err(Error::RateLimitExceeded {
                retry_after: Some(secs),
            }),
            None => Ok(()),
        }
    }

    /// Re-list every watched group and forget cached default branches.
    /// Waits for a running cycle so targets never change mid-cycle.
    pub async fn refresh_groups(&self) -> RefreshSummary {
        let _cycle = self.cycle_lock.lock().await;
        let mut summary = RefreshSummary::default();
        let mut seen = HashSet::new();

        self.branches.write().await.clear();

        for (group, _) in self.config.all_watch_groups() {
            // same group watched twice with different filters is listed once
            if !seen.insert((group.provider, group.group.clone())) {
                continue;
            }
            if !self.registry.is_enabled(group.provider) {
                summary.skipped.push(group.label());
                continue;
            }

            let result = match self.ensure_not_throttled(group.provider) {
                Ok(()) => self
                    .resolver
                    .resolve(&group, true)
                    .await
                    .map_err(|e| self.note_error(group.provider, e)),
                Err(e) => Err(e),
            };

            let entry = match result {
                Ok(repos) => GroupRefresh {
                    group: group.label(),
                    repos: repos.len(),
                    error: None,
                },
                Err(e) => {
                    warn!("Refresh of {} failed, keeping previous listing: {}", group.label(), e);
                    GroupRefresh {
                        group: group.label(),
                        repos: self.resolver.cached(&group).await.map(|r| r.len()).unwrap_or(0),
                        error: Some(Failure::new(group.label(), &e)),
                    }
                }
            };
            summary.groups.push(entry);
        }

        info!("Refreshed {} group(s)", summary.groups.len());
        summary
    }

    pub async fn status(&self) -> StatusReport {
        let tracked_targets = self.engine.tracked_targets().unwrap_or_else(|e| {
            warn!("Could not count stored cursors: {}", e);
            0
        });

        let throttled = Platform::all()
            .into_iter()
            .filter_map(|platform| {
                self.throttle_remaining(platform)
                    .map(|remaining_secs| ThrottleStatus {
                        platform,
                        remaining_secs,
                    })
            })
            .collect();

        StatusReport {
            auto_check: self.config.auto_check,
            check_interval: self.config.effective_interval(),
            first_push: self.config.first_push,
            providers: self.registry.statuses(),
            watched_repos: self.config.all_watch_repos().len(),
            watched_groups: self.config.all_watch_groups().len(),
            tracked_targets,
            cached_groups: self.resolver.entries().await,
            throttled,
            last_cycle: self.last_cycle.read().await.clone(),
        }
    }

    /// Configured watches with their current state
    pub async fn list_watches(&self) -> Vec<WatchEntry> {
        let mut entries = Vec::new();

        for (repo, destinations) in self.config.all_watch_repos() {
            entries.push(WatchEntry {
                kind: WatchKind::Repo,
                provider: repo.provider,
                active: self.registry.is_enabled(repo.provider),
                name: repo.repo,
                branch: repo.branch,
                watch_type: repo.watch_type,
                note: repo.note,
                resolved_repos: None,
                destinations,
            });
        }

        for (group, destinations) in self.config.all_watch_groups() {
            let resolved_repos = self.resolver.cached(&group).await.map(|r| r.len());
            entries.push(WatchEntry {
                kind: WatchKind::Group,
                provider: group.provider,
                active: self.registry.is_enabled(group.provider),
                name: group.group,
                branch: group.branch,
                watch_type: group.watch_type,
                note: group.note,
                resolved_repos,
                destinations,
            });
        }

        entries
    }

    pub fn providers(&self) -> Vec<ProviderStatus> {
        self.registry.statuses()
    }

    /// Forget stored cursors; waits for a running cycle first
    pub async fn reset(&self, provider: Option<Platform>, repo: Option<&str>) -> Result<usize> {
        let _cycle = self.cycle_lock.lock().await;
        self.engine.reset(provider, repo)
    }

    /// Check immediately, then every `check_interval` until `shutdown`
    /// resolves. A cycle that has started always runs to completion.
    pub async fn run_periodic<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let interval = Duration::from_secs(self.config.effective_interval());
        info!("Periodic checks every {}s", interval.as_secs());

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping periodic checks");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = self.check_now().await;
                    debug!("Periodic cycle reported {} new item(s)", summary.total_new());
                }
            }
        }
    }
}

/// Drop repeated targets, merging their destinations into the first
fn dedupe_targets(targets: Vec<WatchTarget>) -> Vec<WatchTarget> {
    let mut index: HashMap<TargetKey, usize> = HashMap::new();
    let mut unique: Vec<WatchTarget> = Vec::with_capacity(targets.len());

    for target in targets {
        let key = target.key();
        match index.get(&key) {
            Some(&pos) => {
                debug!("Duplicate target {} merged", key);
                let existing = &mut unique[pos];
                existing.destinations.merge(&target.destinations);
                if existing.note.is_empty() {
                    existing.note = target.note;
                }
                // a direct watch is more specific than a group member
                if target.source == TargetSource::Repo {
                    existing.source = TargetSource::Repo;
                }
            }
            None => {
                index.insert(key, unique.len());
                unique.push(target);
            }
        }
    }

    unique
}
