pub mod compression;
pub mod config;
pub mod connectivity;
pub mod manager;
pub mod repository;
pub mod transport;
pub mod types;
pub mod utils;
pub mod worker;

// Re-exports
pub use types::*;

pub use config::SyncQueueConfig;
pub use connectivity::ConnectivityMonitor;
pub use manager::SyncQueueManager;
pub use repository::{InMemorySyncQueueRepository, SqliteSyncQueueRepository, SyncQueueRepository};
pub use transport::{HttpSyncTransport, SyncTransport};
pub use worker::{SyncWorker, SyncWorkerMessage};
