// Update detection: providers, group resolution, diffing and the check cycle
pub mod config;
pub mod diff;
pub mod error;
pub mod group;
pub mod models;
pub mod notify;
pub mod providers;
pub mod scheduler;

pub use config::Config;
pub use diff::{DiffEngine, SeenState, Trackable};
pub use error::{Error, FailureKind};
pub use group::GroupResolver;
pub use models::{
    CommitInfo, Destinations, Platform, ReleaseInfo, RepoInfo, TargetKey, UpdateEvent, UpdateItem,
    WatchTarget, WatchType, WatchedGroup, WatchedRepo,
};
pub use notify::NotificationSink;
pub use providers::{GitProvider, ProviderRegistry, ProviderStatus};
pub use scheduler::{CheckSummary, Orchestrator, RefreshSummary, StatusReport, WatchEntry};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
