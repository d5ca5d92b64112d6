//! Decides which fetched commits or releases are new for a target.
//!
//! Each target keeps a cursor (the newest item seen) plus a bounded set of
//! recently seen ids. Fetched pages arrive newest first; new items leave
//! oldest first. Once an id is recorded it is never reported again unless the
//! state is reset.
//!
//! Commits are strictly ordered, so only items above the boundary are new.
//! Releases are not: an unrecorded tag listed below the boundary is reported
//! as well.
//!
//! When neither the cursor nor any recorded id appears in a page, history was
//! rewritten or more items landed than one page holds. In that case only the
//! single newest item is reported. Anything between it and the old cursor is
//! silently skipped; that is the accepted price of never flooding a chat with
//! a whole page of stale commits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use gitwatch_cache::{KeyValueStore, StoreError, StoreExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{CommitInfo, Platform, ReleaseInfo, TargetKey, WatchType};
use crate::{Error, Result};

/// How many recently seen ids are remembered per target
pub const RECENT_CAPACITY: usize = 128;

/// Something with a stable identity the cursor can point at
pub trait Trackable {
    fn cursor(&self) -> &str;
}

impl Trackable for CommitInfo {
    fn cursor(&self) -> &str {
        &self.sha
    }
}

impl Trackable for ReleaseInfo {
    fn cursor(&self) -> &str {
        &self.tag
    }
}

/// Persisted per-target state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenState {
    /// Newest id seen so far
    pub cursor: String,
    /// Recently seen ids, newest first
    #[serde(default)]
    pub recent: VecDeque<String>,
    pub updated_at: DateTime<Utc>,
}

impl SeenState {
    pub fn contains(&self, id: &str) -> bool {
        self.cursor == id || self.recent.iter().any(|r| r == id)
    }
}

/// Which path a check took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Nothing fetched, state untouched
    Empty,
    /// First check, cursor seeded silently
    Baseline,
    /// First check with `first_push`, newest item reported
    FirstPush,
    /// Cursor or a recorded id found, everything above it considered (and
    /// for releases, unrecorded tags listed below it)
    Advanced,
    /// Nothing recorded found, newest item reported
    CursorMiss,
}

#[derive(Debug)]
pub struct DiffOutcome<T> {
    /// Oldest first
    pub new_items: Vec<T>,
    /// State to persist, `None` when nothing should be written
    pub state: Option<SeenState>,
    pub kind: DiffKind,
}

/// Pure diff step: no IO, no clock other than the `now` it's given
pub fn diff_items<T: Trackable>(
    previous: Option<&SeenState>,
    fetched: Vec<T>,
    watch_type: WatchType,
    first_push: bool,
    now: DateTime<Utc>,
) -> DiffOutcome<T> {
    if fetched.is_empty() {
        return DiffOutcome {
            new_items: Vec::new(),
            state: None,
            kind: DiffKind::Empty,
        };
    }

    let Some(prev) = previous else {
        let state = next_state(None, &fetched, now);
        let (new_items, kind) = if first_push {
            (fetched.into_iter().take(1).collect(), DiffKind::FirstPush)
        } else {
            (Vec::new(), DiffKind::Baseline)
        };
        return DiffOutcome {
            new_items,
            state: Some(state),
            kind,
        };
    };

    let cursor_pos = fetched.iter().position(|item| item.cursor() == prev.cursor);
    let boundary = cursor_pos.or_else(|| fetched.iter().position(|item| prev.contains(item.cursor())));

    let mut state = next_state(Some(prev), &fetched, now);

    let (new_items, kind) = match boundary {
        Some(pos) => {
            // Head already recorded but the cursor itself is gone: keep the
            // old cursor rather than step backwards
            if cursor_pos.is_none() && pos == 0 {
                state.cursor = prev.cursor.clone();
            }

            // Releases can be published out of order (a backport tagged after
            // a newer major), so unrecorded tags down to the last recorded one
            // on the page count too. Below that is older history shifting in.
            let scan_to = match watch_type {
                WatchType::Commits => pos,
                WatchType::Releases => fetched
                    .iter()
                    .rposition(|item| prev.contains(item.cursor()))
                    .unwrap_or(pos),
            };

            let mut seen = HashSet::new();
            let mut items: Vec<T> = fetched
                .into_iter()
                .take(scan_to)
                .filter(|item| !prev.contains(item.cursor()) && seen.insert(item.cursor().to_string()))
                .collect();
            items.reverse();
            (items, DiffKind::Advanced)
        }
        None => (fetched.into_iter().take(1).collect(), DiffKind::CursorMiss),
    };

    DiffOutcome {
        new_items,
        state: Some(state),
        kind,
    }
}

fn next_state<T: Trackable>(previous: Option<&SeenState>, fetched: &[T], now: DateTime<Utc>) -> SeenState {
    let mut recent: VecDeque<String> = VecDeque::with_capacity(RECENT_CAPACITY);

    let older = previous.into_iter().flat_map(|p| p.recent.iter().map(String::as_str));
    for id in fetched.iter().map(|item| item.cursor()).chain(older) {
        if recent.len() == RECENT_CAPACITY {
            break;
        }
        if !recent.iter().any(|r| r == id) {
            recent.push_back(id.to_string());
        }
    }

    SeenState {
        cursor: fetched[0].cursor().to_string(),
        recent,
        updated_at: now,
    }
}

/// Owns every target's [`SeenState`] and serializes access per target
pub struct DiffEngine {
    store: Arc<dyn KeyValueStore>,
    first_push: bool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DiffEngine {
    pub fn new(store: Arc<dyn KeyValueStore>, first_push: bool) -> Self {
        Self {
            store,
            first_push,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Read the stored state; anything unreadable counts as never checked
    fn load(&self, storage_key: &str) -> Option<SeenState> {
        match self.store.get_json::<SeenState>(storage_key) {
            Ok(state) => state,
            Err(StoreError::Serialization { key, source }) => {
                warn!("Discarding corrupt state for {}: {}", key, source);
                None
            }
            Err(e) => {
                warn!("Could not read state for {}, treating as new: {}", storage_key, e);
                None
            }
        }
    }

    /// New items for `key` in oldest-first order. The read-modify-write is a
    /// critical section per key.
    pub async fn check<T: Trackable>(&self, key: &TargetKey, fetched: Vec<T>) -> Result<Vec<T>> {
        let storage_key = key.storage_key();
        let lock = self.key_lock(&storage_key);
        let _guard = lock.lock().await;

        let previous = self.load(&storage_key);
        let outcome = diff_items(
            previous.as_ref(),
            fetched,
            key.watch_type,
            self.first_push,
            Utc::now(),
        );

        match outcome.kind {
            DiffKind::Empty => debug!("{}: empty page, state untouched", key),
            DiffKind::Baseline => info!("{}: first check, baseline seeded", key),
            DiffKind::CursorMiss => warn!(
                "{}: cursor {} not in fetched page, reporting newest item only",
                key,
                previous.as_ref().map(|p| p.cursor.as_str()).unwrap_or_default()
            ),
            DiffKind::FirstPush | DiffKind::Advanced => {
                debug!("{}: {} new item(s)", key, outcome.new_items.len())
            }
        }

        if let Some(state) = &outcome.state {
            self.store.set_json(&storage_key, state).map_err(|e| {
                tracing::error!("Failed to persist state for {}: {}", key, e);
                Error::from(e)
            })?;
        }

        Ok(outcome.new_items)
    }

    pub fn seen_state(&self, key: &TargetKey) -> Result<Option<SeenState>> {
        Ok(self.store.get_json(&key.storage_key())?)
    }

    /// Number of targets with a stored cursor
    pub fn tracked_targets(&self) -> Result<usize> {
        Ok(self.store.keys_with_prefix("state:")?.len())
    }

    /// Forget cursors so the next check re-seeds. With no provider everything
    /// goes; a repo without a provider matches that repo on every provider.
    pub fn reset(&self, provider: Option<Platform>, repo: Option<&str>) -> Result<usize> {
        let platforms: Vec<Platform> = match provider {
            Some(p) => vec![p],
            None if repo.is_some() => Platform::all().to_vec(),
            None => {
                return self.remove_keys(self.store.keys_with_prefix("state:")?);
            }
        };

        let mut keys = Vec::new();
        for platform in platforms {
            let p = platform.as_str();
            match repo {
                Some(repo) => {
                    keys.extend(
                        self.store
                            .keys_with_prefix(&format!("state:commits:{}:{}:", p, repo))?,
                    );
                    let release_key = format!("state:releases:{}:{}", p, repo);
                    if self.store.get(&release_key)?.is_some() {
                        keys.push(release_key);
                    }
                }
                None => {
                    keys.extend(self.store.keys_with_prefix(&format!("state:commits:{}:", p))?);
                    keys.extend(self.store.keys_with_prefix(&format!("state:releases:{}:", p))?);
                }
            }
        }

        self.remove_keys(keys)
    }

    fn remove_keys(&self, keys: Vec<String>) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.store.remove(&key)? {
                removed += 1;
            }
        }
        info!("Reset {} stored cursor(s)", removed);
        Ok(removed)
    }
}
