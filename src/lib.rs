// Public modules
pub mod domains;
pub mod errors;
pub mod ffi;
pub mod globals;

// Private modules
mod db_migration;

pub use domains::sync::{
    ConnectivityMonitor, FlushOutcome, QueueStatus, SyncEvent, SyncItem, SyncItemKind,
    SyncOperation, SyncQueueConfig, SyncQueueManager,
};

/// Initialize the library with the given database URL and queue configuration.
/// Must be called (inside a tokio runtime) before any other function in the library.
pub async fn initialize(db_url: &str, config: SyncQueueConfig) -> ffi::FFIResult<()> {
    globals::initialize(db_url, config).await
}

/// Report connectivity from the host
pub fn set_online(online: bool) -> ffi::FFIResult<bool> {
    globals::set_online(online)
}

pub fn is_online() -> bool {
    globals::is_online()
}

/// Get the queue manager, for hosts embedding the crate directly
pub fn get_queue_manager() -> ffi::FFIResult<SyncQueueManager> {
    globals::get_queue_manager()
}
