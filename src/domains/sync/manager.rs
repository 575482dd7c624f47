//! The offline mutation queue.
//!
//! Every mutation is written to the local store before anything touches the
//! network. Flush passes then replay eligible items one at a time, in
//! enqueue order, against the transport. An item that keeps failing is
//! parked as failed after `max_retries` attempts and stays there until the
//! user retries or discards it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::domains::sync::compression::prepare_payload;
use crate::domains::sync::config::SyncQueueConfig;
use crate::domains::sync::connectivity::ConnectivityMonitor;
use crate::domains::sync::repository::SyncQueueRepository;
use crate::domains::sync::transport::SyncTransport;
use crate::domains::sync::types::{
    progress_percent, DataUsage, FlushOutcome, FlushReport, OutboundMutation, QueueCounts,
    QueueStatus, SyncEvent, SyncItem, SyncItemKind, SyncItemSnapshot, SyncItemState, SyncOperation,
};
use crate::domains::sync::utils::{format_sync_operation, generate_item_id, is_empty_payload};
use crate::errors::{DomainError, DomainResult, ServiceError, ServiceResult, SyncError, SyncResult, ValidationError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Mutable state shared by every clone of a manager
struct QueueState {
    /// Mirror of the store, in enqueue order
    items: RwLock<Vec<SyncItem>>,
    is_syncing: AtomicBool,
    compression_enabled: AtomicBool,
    progress_percent: AtomicU8,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    data_usage: Mutex<DataUsage>,
}

/// Clears the syncing flag when a flush pass ends, however it ends.
struct SyncingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns the mutation queue and replays it against the transport.
#[derive(Clone)]
pub struct SyncQueueManager {
    repo: Arc<dyn SyncQueueRepository>,
    transport: Arc<dyn SyncTransport>,
    connectivity: ConnectivityMonitor,
    max_retries: u32,
    transport_timeout: Duration,
    state: Arc<QueueState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncQueueManager {
    pub fn new(
        repo: Arc<dyn SyncQueueRepository>,
        transport: Arc<dyn SyncTransport>,
        connectivity: ConnectivityMonitor,
        config: &SyncQueueConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            repo,
            transport,
            connectivity,
            max_retries: config.max_retries,
            transport_timeout: config.transport_timeout(),
            state: Arc::new(QueueState {
                items: RwLock::new(Vec::new()),
                is_syncing: AtomicBool::new(false),
                compression_enabled: AtomicBool::new(config.compression_enabled),
                progress_percent: AtomicU8::new(0),
                last_sync_time: Mutex::new(None),
                data_usage: Mutex::new(DataUsage::default()),
            }),
            events,
        }
    }

    /// Reload the mirror from the store, e.g. after an app restart.
    pub async fn restore(&self) -> DomainResult<usize> {
        let stored = self.repo.get_all().await?;
        let count = stored.len();
        *self.state.items.write().await = stored;
        log::info!("Restored {} queued mutations from local store", count);
        Ok(count)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Queue a mutation. The item is persisted before this returns; when
    /// online, a flush is started in the background.
    pub async fn enqueue(
        &self,
        kind: SyncItemKind,
        operation: SyncOperation,
        payload: serde_json::Value,
    ) -> ServiceResult<SyncItem> {
        if is_empty_payload(&payload) {
            return Err(ServiceError::Domain(DomainError::Validation(ValidationError::required("payload"))));
        }

        let mut item = SyncItem::new(kind, operation, payload);
        {
            let mut items = self.state.items.write().await;
            while items.iter().any(|existing| existing.id == item.id) {
                item.id = generate_item_id();
            }
            if let Err(e) = self.repo.put(&item).await {
                log::error!("Failed to persist queued mutation {}: {}", item.id, e);
            }
            items.push(item.clone());
        }

        log::debug!("{}", format_sync_operation(operation.as_str(), kind.as_str(), &item.id, "queued", None));
        self.emit(SyncEvent::ItemQueued { id: item.id.clone() });

        if self.connectivity.is_online() {
            self.trigger_flush();
        }

        Ok(item)
    }

    /// Start a flush without waiting for it.
    pub fn trigger_flush(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.flush().await;
        });
    }

    /// Run one sync pass over every eligible item.
    pub async fn flush(&self) -> FlushOutcome {
        if !self.connectivity.is_online() {
            log::debug!("Skipping flush while offline");
            return FlushOutcome::Offline;
        }

        let _guard = match SyncingGuard::acquire(&self.state.is_syncing) {
            Some(guard) => guard,
            None => {
                log::debug!("Flush already in progress, dropping request");
                return FlushOutcome::AlreadySyncing;
            }
        };

        let batch: Vec<SyncItem> = self.state.items.read().await
            .iter()
            .filter(|item| item.is_eligible(self.max_retries))
            .cloned()
            .collect();

        if batch.is_empty() {
            return FlushOutcome::NothingToSync;
        }

        let total = batch.len();
        log::info!("Starting sync pass for {} queued mutations", total);
        self.state.progress_percent.store(0, Ordering::Release);

        let mut report = FlushReport::default();
        for (index, item) in batch.iter().enumerate() {
            report.attempted += 1;
            match self.replay(item).await {
                Ok((sent, received)) => {
                    self.record_success(&item.id, sent, received).await;
                    report.succeeded += 1;
                    report.bytes_sent += sent;
                    report.bytes_received += received;
                    log::debug!("{}", format_sync_operation(
                        item.operation.as_str(), item.kind.as_str(), &item.id, "synced", None,
                    ));
                }
                Err(e) => {
                    report.failed += 1;
                    let transient = e.is_transient();
                    let retry_count = self.record_failure(&item.id, transient).await;
                    let exhausted = retry_count.map_or(false, |count| count >= self.max_retries);
                    if exhausted {
                        report.exhausted += 1;
                    }
                    let line = format_sync_operation(
                        item.operation.as_str(),
                        item.kind.as_str(),
                        &item.id,
                        if exhausted { "failed permanently" } else { "failed" },
                        Some(e.to_string().as_str()),
                    );
                    // A rejection will not fix itself on the next pass
                    if transient {
                        log::warn!("{}", line);
                    } else {
                        log::error!("{} (rejected by server)", line);
                    }
                }
            }

            let completed = index + 1;
            let percent = progress_percent(completed, total);
            self.state.progress_percent.store(percent, Ordering::Release);
            self.emit(SyncEvent::Progress { completed, total, percent });
        }

        *self.state.last_sync_time.lock().await = Some(Utc::now());
        log::info!(
            "Sync pass finished: {} synced, {} failed ({} exhausted)",
            report.succeeded, report.failed, report.exhausted
        );
        self.emit(SyncEvent::FlushCompleted { report: report.clone() });

        FlushOutcome::Completed(report)
    }

    /// Serialize, encode and send one item. Returns bytes sent and received.
    async fn replay(&self, item: &SyncItem) -> SyncResult<(u64, u64)> {
        let compression_enabled = self.state.compression_enabled.load(Ordering::Acquire);
        let prepared = prepare_payload(&item.payload, compression_enabled)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        let bytes_sent = prepared.len() as u64;

        let mutation = OutboundMutation {
            id: item.id.clone(),
            kind: item.kind,
            operation: item.operation,
            created_at: item.created_at,
            encoding: prepared.encoding,
            body: prepared.body,
        };

        match tokio::time::timeout(self.transport_timeout, self.transport.send(&mutation)).await {
            Ok(Ok(bytes_received)) => Ok((bytes_sent, bytes_received)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SyncError::Timeout(self.transport_timeout.as_secs())),
        }
    }

    async fn record_success(&self, id: &str, sent: u64, received: u64) {
        {
            let mut usage = self.state.data_usage.lock().await;
            usage.sent_bytes += sent;
            usage.received_bytes += received;
        }

        let mut items = self.state.items.write().await;
        let Some(item) = items.iter_mut().find(|item| item.id == id) else {
            // Discarded while the request was in flight
            log::debug!("Synced item {} is no longer queued", id);
            return;
        };
        item.synced = true;
        if let Err(e) = self.repo.put(item).await {
            log::error!("Failed to persist synced state for {}: {}", id, e);
        }
        drop(items);

        self.emit(SyncEvent::ItemSynced { id: id.to_string() });
    }

    /// Returns the new retry count, or None if the item was discarded meanwhile.
    async fn record_failure(&self, id: &str, transient: bool) -> Option<u32> {
        let mut items = self.state.items.write().await;
        let item = items.iter_mut().find(|item| item.id == id)?;
        item.retry_count = item.retry_count.saturating_add(1);
        let retry_count = item.retry_count;
        if let Err(e) = self.repo.put(item).await {
            log::error!("Failed to persist retry count for {}: {}", id, e);
        }
        drop(items);

        self.emit(SyncEvent::ItemFailed {
            id: id.to_string(),
            retry_count,
            exhausted: retry_count >= self.max_retries,
            transient,
        });
        Some(retry_count)
    }

    /// Drop every delivered item from the store and the mirror.
    pub async fn clear_synced(&self) -> usize {
        let mut items = self.state.items.write().await;
        let synced_ids: Vec<String> = items.iter()
            .filter(|item| item.synced)
            .map(|item| item.id.clone())
            .collect();

        for id in &synced_ids {
            if let Err(e) = self.repo.delete(id).await {
                log::error!("Failed to delete synced item {} from local store: {}", id, e);
            }
        }
        items.retain(|item| !item.synced);

        if !synced_ids.is_empty() {
            log::info!("Cleared {} synced mutations", synced_ids.len());
        }
        synced_ids.len()
    }

    /// Give every failed item a fresh set of attempts.
    pub async fn retry_failed(&self) -> usize {
        let reset = {
            let mut items = self.state.items.write().await;
            let mut reset = 0;
            for item in items.iter_mut().filter(|item| item.state(self.max_retries) == SyncItemState::Failed) {
                item.retry_count = 0;
                if let Err(e) = self.repo.put(item).await {
                    log::error!("Failed to persist retry reset for {}: {}", item.id, e);
                }
                reset += 1;
            }
            reset
        };

        if reset > 0 {
            log::info!("Re-queued {} failed mutations", reset);
            if self.connectivity.is_online() {
                self.trigger_flush();
            }
        }
        reset
    }

    /// Reset the attempts of one item. Returns false for an already synced item.
    pub async fn retry_item(&self, id: &str) -> ServiceResult<bool> {
        {
            let mut items = self.state.items.write().await;
            let item = items.iter_mut()
                .find(|item| item.id == id)
                .ok_or_else(|| DomainError::EntityNotFound("SyncItem".to_string(), id.to_string()))?;
            if item.synced {
                return Ok(false);
            }
            item.retry_count = 0;
            if let Err(e) = self.repo.put(item).await {
                log::error!("Failed to persist retry reset for {}: {}", id, e);
            }
        }

        if self.connectivity.is_online() {
            self.trigger_flush();
        }
        Ok(true)
    }

    /// Remove one item regardless of its state.
    pub async fn discard(&self, id: &str) -> ServiceResult<bool> {
        let mut items = self.state.items.write().await;
        let before = items.len();
        items.retain(|item| item.id != id);
        let removed = items.len() != before;

        if let Err(e) = self.repo.delete(id).await {
            log::error!("Failed to delete discarded item {} from local store: {}", id, e);
        }
        if removed {
            log::info!("Discarded queued mutation {}", id);
        }
        Ok(removed)
    }

    pub fn set_compression_enabled(&self, enabled: bool) {
        self.state.compression_enabled.store(enabled, Ordering::Release);
        log::debug!("Payload compression {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn compression_enabled(&self) -> bool {
        self.state.compression_enabled.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.state.is_syncing.load(Ordering::Acquire)
    }

    /// React to a connectivity report from the environment.
    pub async fn handle_connectivity_change(&self, online: bool) -> Option<FlushOutcome> {
        self.emit(SyncEvent::ConnectivityChanged { online });
        if !online {
            return None;
        }
        Some(self.flush().await)
    }

    /// Status snapshot, recomputed from the full item set.
    pub async fn status(&self) -> QueueStatus {
        let counts = {
            let items = self.state.items.read().await;
            QueueCounts::tally(&items, self.max_retries)
        };
        QueueStatus {
            pending: counts.pending,
            synced: counts.synced,
            failed: counts.failed,
            is_syncing: self.is_syncing(),
            is_online: self.connectivity.is_online(),
            compression_enabled: self.compression_enabled(),
            progress_percent: self.state.progress_percent.load(Ordering::Acquire),
            last_sync_time: *self.state.last_sync_time.lock().await,
            data_usage: *self.state.data_usage.lock().await,
        }
    }

    /// Every queued item with its derived state, in enqueue order.
    pub async fn items(&self) -> Vec<SyncItemSnapshot> {
        self.state.items.read().await
            .iter()
            .map(|item| SyncItemSnapshot {
                state: item.state(self.max_retries),
                item: item.clone(),
            })
            .collect()
    }
}
