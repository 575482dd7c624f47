use crate::errors::{DomainError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::compression::PayloadEncoding;
use super::utils::generate_item_id;

/// What a queued mutation is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncItemKind {
    Inspection,
    Photo,
    Signature,
    ChecklistEntry,
    Message,
}

impl SyncItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncItemKind::Inspection => "inspection",
            SyncItemKind::Photo => "photo",
            SyncItemKind::Signature => "signature",
            SyncItemKind::ChecklistEntry => "checklist_entry",
            SyncItemKind::Message => "message",
        }
    }
}

impl FromStr for SyncItemKind {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inspection" => Ok(SyncItemKind::Inspection),
            "photo" => Ok(SyncItemKind::Photo),
            "signature" => Ok(SyncItemKind::Signature),
            "checklist_entry" | "checklist" => Ok(SyncItemKind::ChecklistEntry),
            "message" => Ok(SyncItemKind::Message),
            _ => Err(DomainError::Validation(ValidationError::invalid_value(
                "kind",
                &format!("unknown sync item kind: {}", s),
            ))),
        }
    }
}

impl From<SyncItemKind> for String {
    fn from(kind: SyncItemKind) -> Self {
        kind.as_str().to_string()
    }
}

/// The type of mutation being replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl FromStr for SyncOperation {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            _ => Err(DomainError::Validation(ValidationError::invalid_value(
                "operation",
                &format!("unknown sync operation: {}", s),
            ))),
        }
    }
}

impl From<SyncOperation> for String {
    fn from(op: SyncOperation) -> Self {
        op.as_str().to_string()
    }
}

/// Replay state of a single item, derived from `(synced, retry_count, max_retries)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncItemState {
    /// Not yet delivered and still has attempts left
    Pending,
    /// Delivered; never re-sent
    Synced,
    /// Out of attempts; needs a manual retry or discard
    Failed,
}

/// One queued mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: String,
    pub kind: SyncItemKind,
    pub operation: SyncOperation,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub retry_count: u32,
}

impl SyncItem {
    pub fn new(kind: SyncItemKind, operation: SyncOperation, payload: serde_json::Value) -> Self {
        Self {
            id: generate_item_id(),
            kind,
            operation,
            payload,
            created_at: Utc::now(),
            synced: false,
            retry_count: 0,
        }
    }

    pub fn state(&self, max_retries: u32) -> SyncItemState {
        if self.synced {
            SyncItemState::Synced
        } else if self.retry_count >= max_retries {
            SyncItemState::Failed
        } else {
            SyncItemState::Pending
        }
    }

    pub fn is_eligible(&self, max_retries: u32) -> bool {
        self.state(max_retries) == SyncItemState::Pending
    }
}

/// An item together with its derived state, for listing in the UI.
#[derive(Debug, Clone, Serialize)]
pub struct SyncItemSnapshot {
    #[serde(flatten)]
    pub item: SyncItem,
    pub state: SyncItemState,
}

/// Counts of items per state. Always recomputed from the full item set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn tally(items: &[SyncItem], max_retries: u32) -> Self {
        items.iter().fold(QueueCounts::default(), |mut counts, item| {
            match item.state(max_retries) {
                SyncItemState::Pending => counts.pending += 1,
                SyncItemState::Synced => counts.synced += 1,
                SyncItemState::Failed => counts.failed += 1,
            }
            counts
        })
    }
}

/// Bytes exchanged with the remote endpoint by successful replays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataUsage {
    pub sent_bytes: u64,
    pub received_bytes: u64,
}

/// Read-only status snapshot handed to the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
    pub is_syncing: bool,
    pub is_online: bool,
    pub compression_enabled: bool,
    pub progress_percent: u8,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub data_usage: DataUsage,
}

/// Summary of one completed flush pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items whose last attempt pushed them over the retry limit
    pub exhausted: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Result of asking the manager to flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    AlreadySyncing,
    Offline,
    NothingToSync,
    Completed(FlushReport),
}

impl FlushOutcome {
    pub fn report(&self) -> Option<&FlushReport> {
        match self {
            FlushOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Notifications published while the queue changes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    ItemQueued { id: String },
    ItemSynced { id: String },
    ItemFailed { id: String, retry_count: u32, exhausted: bool, transient: bool },
    Progress { completed: usize, total: usize, percent: u8 },
    FlushCompleted { report: FlushReport },
    ConnectivityChanged { online: bool },
}

/// Wire envelope for one replayed mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMutation {
    pub id: String,
    pub kind: SyncItemKind,
    pub operation: SyncOperation,
    pub created_at: DateTime<Utc>,
    pub encoding: PayloadEncoding,
    pub body: String,
}

pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed.min(total) * 100) / total) as u8
}
