//! Background worker that drives the sync queue: periodic flushes, flushes on
//! reconnect, and message-based control from the host.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domains::sync::manager::SyncQueueManager;
use crate::domains::sync::types::{FlushOutcome, QueueStatus};

const MESSAGE_CHANNEL_CAPACITY: usize = 32;

/// Messages that can be sent to the sync worker
#[derive(Debug)]
pub enum SyncWorkerMessage {
    /// Run a flush pass now and report how it went
    FlushNow {
        response: oneshot::Sender<FlushOutcome>,
    },
    /// Get the current queue status
    GetStatus {
        response: oneshot::Sender<QueueStatus>,
    },
    /// Toggle payload compression for later replays
    SetCompression {
        enabled: bool,
        response: oneshot::Sender<()>,
    },
    /// Stop the worker
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

pub struct SyncWorker {
    manager: SyncQueueManager,
    flush_interval: Duration,
    connectivity: watch::Receiver<bool>,
    message_receiver: mpsc::Receiver<SyncWorkerMessage>,
    message_sender: mpsc::Sender<SyncWorkerMessage>,
}

impl SyncWorker {
    pub fn new(manager: SyncQueueManager, flush_interval: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        // Subscribe here so transitions between new() and the first poll are not lost
        let connectivity = manager.connectivity().subscribe();
        Self {
            manager,
            flush_interval,
            connectivity,
            message_receiver: receiver,
            message_sender: sender,
        }
    }

    pub fn get_message_sender(&self) -> mpsc::Sender<SyncWorkerMessage> {
        self.message_sender.clone()
    }

    /// Spawn the worker loop
    pub fn start(self) -> (JoinHandle<()>, mpsc::Sender<SyncWorkerMessage>) {
        let sender = self.message_sender.clone();
        let handle = tokio::spawn(async move {
            self.run().await;
            log::info!("Sync worker shut down");
        });
        (handle, sender)
    }

    async fn run(self) {
        let SyncWorker { manager, flush_interval, mut connectivity, mut message_receiver, message_sender } = self;
        // Only the handles given out by start() keep the channel open
        drop(message_sender);

        let mut watching_connectivity = true;
        let mut interval = tokio::time::interval(flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_response: Option<oneshot::Sender<()>> = None;

        log::info!("Starting sync worker, flush interval {:?}", flush_interval);

        loop {
            tokio::select! {
                message = message_receiver.recv() => {
                    match message {
                        Some(SyncWorkerMessage::FlushNow { response }) => {
                            let outcome = manager.flush().await;
                            let _ = response.send(outcome);
                        }
                        Some(SyncWorkerMessage::GetStatus { response }) => {
                            let _ = response.send(manager.status().await);
                        }
                        Some(SyncWorkerMessage::SetCompression { enabled, response }) => {
                            manager.set_compression_enabled(enabled);
                            let _ = response.send(());
                        }
                        Some(SyncWorkerMessage::Shutdown { response }) => {
                            log::info!("Sync worker shutdown requested");
                            shutdown_response = Some(response);
                            break;
                        }
                        None => {
                            log::debug!("Sync worker channel closed, shutting down");
                            break;
                        }
                    }
                }

                changed = connectivity.changed(), if watching_connectivity => {
                    if changed.is_err() {
                        watching_connectivity = false;
                        continue;
                    }
                    let online = *connectivity.borrow_and_update();
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        if let Some(outcome) = manager.handle_connectivity_change(online).await {
                            log::debug!("Reconnect flush finished: {:?}", outcome);
                        }
                    });
                }

                _ = interval.tick() => {
                    if manager.connectivity().is_online() && !manager.is_syncing() {
                        manager.trigger_flush();
                    }
                }
            }
        }

        if let Some(response) = shutdown_response {
            let _ = response.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::sync::config::SyncQueueConfig;
    use crate::domains::sync::connectivity::ConnectivityMonitor;
    use crate::domains::sync::repository::InMemorySyncQueueRepository;
    use crate::domains::sync::transport::MockSyncTransport;
    use crate::domains::sync::types::{SyncEvent, SyncItemKind, SyncOperation};
    use serde_json::json;
    use std::sync::Arc;

    fn offline_manager(transport: Arc<MockSyncTransport>) -> SyncQueueManager {
        SyncQueueManager::new(
            Arc::new(InMemorySyncQueueRepository::new()),
            transport,
            ConnectivityMonitor::new(false),
            &SyncQueueConfig::default(),
        )
    }

    async fn shutdown(sender: &mpsc::Sender<SyncWorkerMessage>, handle: JoinHandle<()>) {
        let (tx, rx) = oneshot::channel();
        sender.send(SyncWorkerMessage::Shutdown { response: tx }).await.unwrap();
        rx.await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_flushes_queue() {
        let transport = Arc::new(MockSyncTransport::always_succeed());
        let manager = offline_manager(transport.clone());
        manager
            .enqueue(SyncItemKind::Photo, SyncOperation::Create, json!({"uri": "porch.jpg"}))
            .await
            .unwrap();

        let mut events = manager.subscribe();
        let (handle, sender) = SyncWorker::new(manager.clone(), Duration::from_secs(3600)).start();

        manager.connectivity().set_online(true);
        let report = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(SyncEvent::FlushCompleted { report }) = events.recv().await {
                    return report;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(manager.status().await.synced, 1);

        shutdown(&sender, handle).await;
    }

    #[tokio::test]
    async fn test_messages_drive_the_manager() {
        let transport = Arc::new(MockSyncTransport::always_succeed());
        let manager = offline_manager(transport.clone());
        manager
            .enqueue(SyncItemKind::Message, SyncOperation::Create, json!({"text": "on my way"}))
            .await
            .unwrap();
        let (handle, sender) = SyncWorker::new(manager.clone(), Duration::from_secs(3600)).start();

        let (tx, rx) = oneshot::channel();
        sender.send(SyncWorkerMessage::FlushNow { response: tx }).await.unwrap();
        assert_eq!(rx.await.unwrap(), FlushOutcome::Offline);

        let (tx, rx) = oneshot::channel();
        sender.send(SyncWorkerMessage::SetCompression { enabled: false, response: tx }).await.unwrap();
        rx.await.unwrap();

        let (tx, rx) = oneshot::channel();
        sender.send(SyncWorkerMessage::GetStatus { response: tx }).await.unwrap();
        let status = rx.await.unwrap();
        assert_eq!(status.pending, 1);
        assert!(!status.compression_enabled);
        assert!(!status.is_online);

        shutdown(&sender, handle).await;
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_interval_flushes_when_online() {
        let transport = Arc::new(MockSyncTransport::always_succeed());
        let manager = offline_manager(transport.clone());
        manager
            .enqueue(SyncItemKind::Signature, SyncOperation::Create, json!({"signed_by": "owner"}))
            .await
            .unwrap();
        // Flip silently so only the timer can pick the item up
        manager.connectivity().set_online(true);

        let (handle, sender) = SyncWorker::new(manager.clone(), Duration::from_millis(50)).start();
        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.status().await.synced == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        shutdown(&sender, handle).await;
        assert_eq!(transport.call_count(), 1);
    }
}
