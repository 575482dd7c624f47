use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::errors::{DbError, DomainError, DomainResult};
use crate::domains::sync::types::{SyncItem, SyncItemKind, SyncOperation};

/// Durable, id-keyed storage for queued mutations
#[async_trait]
pub trait SyncQueueRepository: Send + Sync {
    /// Fetch a single item
    async fn get(&self, id: &str) -> DomainResult<Option<SyncItem>>;

    /// All items in enqueue order
    async fn get_all(&self) -> DomainResult<Vec<SyncItem>>;

    /// Insert or replace an item, keeping its original queue position
    async fn put(&self, item: &SyncItem) -> DomainResult<()>;

    /// Remove an item. Returns whether anything was deleted.
    async fn delete(&self, id: &str) -> DomainResult<bool>;
}

/// SQLite implementation of the SyncQueueRepository
pub struct SqliteSyncQueueRepository {
    pool: SqlitePool,
}

impl SqliteSyncQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> DomainResult<SyncItem> {
        let id: String = row.try_get("id").map_err(DbError::from)?;
        let kind: String = row.try_get("kind").map_err(DbError::from)?;
        let operation: String = row.try_get("operation").map_err(DbError::from)?;
        let payload: String = row.try_get("payload").map_err(DbError::from)?;
        let created_at: String = row.try_get("created_at").map_err(DbError::from)?;
        let synced: i64 = row.try_get("synced").map_err(DbError::from)?;
        let retry_count: i64 = row.try_get("retry_count").map_err(DbError::from)?;

        let payload = serde_json::from_str(&payload)
            .map_err(|e| DomainError::Internal(format!("Corrupt payload for queue item {}: {}", id, e)))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| DomainError::Internal(format!("Invalid date format: {}", created_at)))?
            .with_timezone(&Utc);

        Ok(SyncItem {
            kind: kind.parse::<SyncItemKind>()?,
            operation: operation.parse::<SyncOperation>()?,
            payload,
            created_at,
            synced: synced != 0,
            retry_count: retry_count.max(0) as u32,
            id,
        })
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    // Fixed width so that lexical order equals chronological order
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl SyncQueueRepository for SqliteSyncQueueRepository {
    async fn get(&self, id: &str) -> DomainResult<Option<SyncItem>> {
        let row = sqlx::query(
            "SELECT id, kind, operation, payload, created_at, synced, retry_count
             FROM sync_queue
             WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn get_all(&self) -> DomainResult<Vec<SyncItem>> {
        let rows = sqlx::query(
            "SELECT id, kind, operation, payload, created_at, synced, retry_count
             FROM sync_queue
             ORDER BY seq ASC"
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn put(&self, item: &SyncItem) -> DomainResult<()> {
        let payload = serde_json::to_string(&item.payload)
            .map_err(|e| DomainError::Internal(format!("Failed to serialize payload for {}: {}", item.id, e)))?;
        let now_str = timestamp(&Utc::now());

        // seq is assigned on first insert only, so replay order survives updates
        sqlx::query(
            "INSERT INTO sync_queue
             (id, kind, operation, payload, created_at, synced, retry_count, updated_at, seq)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue))
             ON CONFLICT(id) DO UPDATE SET
                 kind = excluded.kind,
                 operation = excluded.operation,
                 payload = excluded.payload,
                 synced = excluded.synced,
                 retry_count = excluded.retry_count,
                 updated_at = excluded.updated_at"
        )
        .bind(&item.id)
        .bind(item.kind.as_str())
        .bind(item.operation.as_str())
        .bind(payload)
        .bind(timestamp(&item.created_at))
        .bind(item.synced as i64)
        .bind(item.retry_count as i64)
        .bind(now_str)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected() > 0)
    }
}

/// Process-local implementation, for tests and hosts without a database
#[derive(Default)]
pub struct InMemorySyncQueueRepository {
    items: Mutex<Vec<SyncItem>>,
}

impl InMemorySyncQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncQueueRepository for InMemorySyncQueueRepository {
    async fn get(&self, id: &str) -> DomainResult<Option<SyncItem>> {
        let items = self.items.lock().await;
        Ok(items.iter().find(|item| item.id == id).cloned())
    }

    async fn get_all(&self) -> DomainResult<Vec<SyncItem>> {
        Ok(self.items.lock().await.clone())
    }

    async fn put(&self, item: &SyncItem) -> DomainResult<()> {
        let mut items = self.items.lock().await;
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => items.push(item.clone()),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> DomainResult<bool> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| item.id != id);
        Ok(items.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_migration::run_migrations;
    use serde_json::json;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn sqlite_repo() -> SqliteSyncQueueRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteSyncQueueRepository::new(pool)
    }

    fn item(kind: SyncItemKind, note: &str) -> SyncItem {
        SyncItem::new(kind, SyncOperation::Create, json!({ "note": note }))
    }

    async fn exercise_contract(repo: &dyn SyncQueueRepository) {
        let a = item(SyncItemKind::Inspection, "a");
        let b = item(SyncItemKind::Photo, "b");
        let c = item(SyncItemKind::Signature, "c");
        for it in [&a, &b, &c] {
            repo.put(it).await.unwrap();
        }

        let fetched = repo.get(&b.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, b.id);
        assert_eq!(fetched.kind, SyncItemKind::Photo);
        assert_eq!(fetched.payload, b.payload);
        assert_eq!(repo.get("missing").await.unwrap(), None);

        // Updating the first item must not move it behind the others.
        let mut a_updated = a.clone();
        a_updated.retry_count = 2;
        repo.put(&a_updated).await.unwrap();

        let ids: Vec<String> = repo.get_all().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone(), c.id.clone()]);
        assert_eq!(repo.get(&a.id).await.unwrap().unwrap().retry_count, 2);

        assert!(repo.delete(&b.id).await.unwrap());
        assert!(!repo.delete(&b.id).await.unwrap());
        assert_eq!(repo.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_repository_contract() {
        let repo = sqlite_repo().await;
        exercise_contract(&repo).await;
    }

    #[tokio::test]
    async fn test_in_memory_repository_contract() {
        let repo = InMemorySyncQueueRepository::new();
        exercise_contract(&repo).await;
    }

    #[tokio::test]
    async fn test_sqlite_order_ignores_clock_changes() {
        let repo = sqlite_repo().await;
        let first = item(SyncItemKind::ChecklistEntry, "exit signs");
        let mut second = item(SyncItemKind::Photo, "exit signs photo");
        // Device clock corrected backwards between the two enqueues
        second.created_at = first.created_at - chrono::Duration::seconds(60);

        repo.put(&first).await.unwrap();
        repo.put(&second).await.unwrap();

        let mut first_retried = first.clone();
        first_retried.retry_count = 1;
        repo.put(&first_retried).await.unwrap();

        let ids: Vec<String> = repo.get_all().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);
    }

    #[tokio::test]
    async fn test_sqlite_round_trips_fields() {
        let repo = sqlite_repo().await;
        let mut original = SyncItem::new(
            SyncItemKind::ChecklistEntry,
            SyncOperation::Update,
            json!({"items": [{"label": "exit signs", "ok": true}], "score": 9.5}),
        );
        original.synced = true;
        original.retry_count = 1;
        repo.put(&original).await.unwrap();

        let loaded = repo.get(&original.id).await.unwrap().unwrap();
        assert_eq!(loaded.kind, SyncItemKind::ChecklistEntry);
        assert_eq!(loaded.operation, SyncOperation::Update);
        assert_eq!(loaded.payload, original.payload);
        assert!(loaded.synced);
        assert_eq!(loaded.retry_count, 1);
        // Stored at microsecond precision
        assert_eq!(
            loaded.created_at.timestamp_micros(),
            original.created_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_sqlite_items_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.sqlite");
        let url = format!("sqlite://{}", db_path.display());
        let queued = item(SyncItemKind::Message, "hello");

        {
            let options = SqliteConnectOptions::from_str(&url).unwrap().create_if_missing(true);
            let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await.unwrap();
            run_migrations(&pool).await.unwrap();
            SqliteSyncQueueRepository::new(pool.clone()).put(&queued).await.unwrap();
            pool.close().await;
        }

        let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = SqliteSyncQueueRepository::new(pool);
        assert_eq!(repo.get(&queued.id).await.unwrap().map(|i| i.id), Some(queued.id));
    }
}
