pub mod sync;

pub use sync::{SyncQueueManager, SyncQueueRepository, SyncTransport};
