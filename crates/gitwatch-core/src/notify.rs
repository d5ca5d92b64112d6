use async_trait::async_trait;

use crate::models::{Destinations, UpdateEvent};
use crate::Result;

/// Where detected updates go. Formatting and transport are up to the
/// implementation; the watcher only hands over structured events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, destinations: &Destinations, event: &UpdateEvent) -> Result<()>;
}
