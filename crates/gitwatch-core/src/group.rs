// Expands watched groups into concrete repositories
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gitwatch_cache::{KeyValueStore, StoreExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{Platform, RepoInfo, WatchedGroup};
use crate::providers::ProviderRegistry;
use crate::Result;

/// Unfiltered listing of one group, as fetched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub repos: Vec<RepoInfo>,
    pub fetched_at: DateTime<Utc>,
}

/// Cache overview row for status output
#[derive(Debug, Clone, Serialize)]
pub struct CachedGroup {
    pub platform: Platform,
    pub group: String,
    pub repo_count: usize,
    pub fetched_at: DateTime<Utc>,
}

type GroupKey = (Platform, String);

/// Resolves groups through the providers and remembers the answer.
///
/// A listing is fetched once per process and then reused until an explicit
/// refresh. A failed fetch never drops what was already known: the previous
/// in-memory listing, or the snapshot persisted by an earlier run, stays in
/// place.
pub struct GroupResolver {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn KeyValueStore>,
    cache: RwLock<HashMap<GroupKey, GroupSnapshot>>,
}

fn storage_key(platform: Platform, group: &str) -> String {
    format!("group:{}:{}", platform.as_str(), group)
}

fn apply_filter(group: &WatchedGroup, repos: &[RepoInfo]) -> Vec<RepoInfo> {
    repos
        .iter()
        .filter(|r| group.should_watch(&r.name))
        .cloned()
        .collect()
}

impl GroupResolver {
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            registry,
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Filtered repositories of `group`, from cache unless `force_refresh`
    pub async fn resolve(&self, group: &WatchedGroup, force_refresh: bool) -> Result<Vec<RepoInfo>> {
        let key = (group.provider, group.group.clone());

        if !force_refresh {
            if let Some(snapshot) = self.cache.read().await.get(&key) {
                debug!("Group {} served from cache", group.label());
                return Ok(apply_filter(group, &snapshot.repos));
            }
        }

        let provider = self.registry.get(group.provider)?;
        match provider.get_group_repos(&group.group).await {
            Ok(repos) => {
                let snapshot = GroupSnapshot {
                    repos,
                    fetched_at: Utc::now(),
                };

                if let Err(e) = self
                    .store
                    .set_json(&storage_key(group.provider, &group.group), &snapshot)
                {
                    warn!("Could not persist listing for {}: {}", group.label(), e);
                }

                let filtered = apply_filter(group, &snapshot.repos);
                info!(
                    "Group {}: {} repos, {} watched",
                    group.label(),
                    snapshot.repos.len(),
                    filtered.len()
                );
                self.cache.write().await.insert(key, snapshot);
                Ok(filtered)
            }
            Err(e) => {
                warn!("Resolving {} failed: {}", group.label(), e);
                self.hydrate(&key).await;
                Err(e)
            }
        }
    }

    /// Load the persisted snapshot when nothing is in memory yet
    async fn hydrate(&self, key: &GroupKey) {
        let mut cache = self.cache.write().await;
        if cache.contains_key(key) {
            return;
        }

        match self.store.get_json::<GroupSnapshot>(&storage_key(key.0, &key.1)) {
            Ok(Some(snapshot)) => {
                info!(
                    "Using stored listing of {}:{} from {}",
                    key.0.as_str(),
                    key.1,
                    snapshot.fetched_at
                );
                cache.insert(key.clone(), snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!("Stored listing for {}:{} unreadable: {}", key.0.as_str(), key.1, e),
        }
    }

    /// Whatever is known about `group` without touching the network
    pub async fn cached(&self, group: &WatchedGroup) -> Option<Vec<RepoInfo>> {
        self.cache
            .read()
            .await
            .get(&(group.provider, group.group.clone()))
            .map(|snapshot| apply_filter(group, &snapshot.repos))
    }

    /// Drop every in-memory listing; persisted snapshots stay as fallback
    pub async fn invalidate_all(&self) {
        let mut cache = self.cache.write().await;
        debug!("Dropping {} cached group listing(s)", cache.len());
        cache.clear();
    }

    pub async fn entries(&self) -> Vec<CachedGroup> {
        let cache = self.cache.read().await;
        let mut rows: Vec<CachedGroup> = cache
            .iter()
            .map(|((platform, group), snapshot)| CachedGroup {
                platform: *platform,
                group: group.clone(),
                repo_count: snapshot.repos.len(),
                fetched_at: snapshot.fetched_at,
            })
            .collect();
        rows.sort_by(|a, b| (a.platform, &a.group).cmp(&(b.platform, &b.group)));
        rows
    }
}
