// Durable key/value state for cursors and group snapshots
// SQLite keeps it in one file that survives restarts

pub mod cache;
pub mod store;

pub use cache::SqliteStore;
pub use store::{KeyValueStore, MemoryStore, StoreError, StoreExt};

pub type Result<T> = std::result::Result<T, StoreError>;
