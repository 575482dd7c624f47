use crate::db_migration::run_migrations;
use crate::domains::sync::config::SyncQueueConfig;
use crate::domains::sync::connectivity::ConnectivityMonitor;
use crate::domains::sync::manager::SyncQueueManager;
use crate::domains::sync::repository::{SqliteSyncQueueRepository, SyncQueueRepository};
use crate::domains::sync::transport::{HttpSyncTransport, SyncTransport};
use crate::domains::sync::worker::{SyncWorker, SyncWorkerMessage};
use crate::ffi::error::{FFIError, FFIResult};
use lazy_static::lazy_static;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const FILE_DB_MAX_CONNECTIONS: u32 = 5;

// Global state definitions
lazy_static! {
    static ref INIT_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
    static ref INITIALIZED: AtomicBool = AtomicBool::new(false);

    static ref DB_POOL: Mutex<Option<SqlitePool>> = Mutex::new(None);
    static ref CONNECTIVITY: Mutex<Option<ConnectivityMonitor>> = Mutex::new(None);
    static ref QUEUE_MANAGER: Mutex<Option<SyncQueueManager>> = Mutex::new(None);
    static ref WORKER_SENDER: Mutex<Option<mpsc::Sender<SyncWorkerMessage>>> = Mutex::new(None);
    static ref WORKER_HANDLE: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Runtime shared by every FFI call. Built on first use and never torn down.
pub fn runtime() -> FFIResult<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("permit-sync")
        .build()
        .map_err(|e| FFIError::internal(format!("Failed to create async runtime: {}", e)))?;
    // Losing the race just drops our copy
    let _ = RUNTIME.set(runtime);
    RUNTIME.get().ok_or_else(|| FFIError::internal("Async runtime unavailable".to_string()))
}

// --- Getter Functions ---

pub fn get_connectivity() -> FFIResult<ConnectivityMonitor> {
    CONNECTIVITY.lock().map_err(|_| FFIError::internal("CONNECTIVITY lock poisoned".to_string()))?.clone().ok_or_else(|| FFIError::not_initialized("Connectivity monitor"))
}
pub fn get_queue_manager() -> FFIResult<SyncQueueManager> {
    QUEUE_MANAGER.lock().map_err(|_| FFIError::internal("QUEUE_MANAGER lock poisoned".to_string()))?.clone().ok_or_else(|| FFIError::not_initialized("Sync queue manager"))
}
pub fn get_worker_sender() -> FFIResult<mpsc::Sender<SyncWorkerMessage>> {
    WORKER_SENDER.lock().map_err(|_| FFIError::internal("WORKER_SENDER lock poisoned".to_string()))?.clone().ok_or_else(|| FFIError::not_initialized("Sync worker"))
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

pub fn is_online() -> bool {
    get_connectivity().map(|c| c.is_online()).unwrap_or(false)
}

/// Report connectivity from the host. Returns true on a transition.
pub fn set_online(online: bool) -> FFIResult<bool> {
    Ok(get_connectivity()?.set_online(online))
}

fn is_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}

/// Every connection to an in-memory database opens its own empty database,
/// so those URLs get exactly one connection that is never recycled.
fn pool_options(db_url: &str) -> SqlitePoolOptions {
    if is_memory_url(db_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(FILE_DB_MAX_CONNECTIONS)
    }
}

fn init_logging() {
    #[cfg(debug_assertions)]
    let default_level = "debug";
    #[cfg(not(debug_assertions))]
    let default_level = "info";

    // Already initialized by the host or an earlier call
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .try_init();
}

/// Initialize global services. Must run inside a tokio runtime.
pub async fn initialize(db_url: &str, config: SyncQueueConfig) -> FFIResult<()> {
    let _guard = INIT_MUTEX.lock().await;

    if INITIALIZED.load(Ordering::Acquire) {
        log::debug!("Library already initialized");
        return Ok(());
    }

    let result = initialize_internal(db_url, config).await;

    if result.is_ok() {
        INITIALIZED.store(true, Ordering::Release);
    }

    result
}

async fn initialize_internal(db_url: &str, config: SyncQueueConfig) -> FFIResult<()> {
    init_logging();

    log::info!("Starting internal initialization");
    log::debug!("Database URL: {}", db_url);
    log::debug!("Sync endpoint: {}", config.endpoint_url());

    config.validate()?;

    let options = SqliteConnectOptions::from_str(db_url)
        .map_err(|e| FFIError::invalid_argument(&format!("Invalid database URL: {}", e)))?
        .create_if_missing(true);
    let pool = pool_options(db_url)
        .connect_with(options)
        .await
        .map_err(|e| FFIError::internal(format!("Database connection failed: {}", e)))?;

    run_migrations(&pool).await?;
    log::info!("Database ready");

    let repo: Arc<dyn SyncQueueRepository> = Arc::new(SqliteSyncQueueRepository::new(pool.clone()));
    let transport: Arc<dyn SyncTransport> = Arc::new(HttpSyncTransport::new(&config)?);
    let connectivity = ConnectivityMonitor::new(config.start_online);
    let manager = SyncQueueManager::new(repo, transport, connectivity.clone(), &config);
    manager.restore().await?;

    let (worker_handle, worker_sender) = SyncWorker::new(manager.clone(), config.flush_interval()).start();

    *DB_POOL.lock().map_err(|_| FFIError::internal("DB_POOL lock poisoned".to_string()))? = Some(pool);
    *CONNECTIVITY.lock().map_err(|_| FFIError::internal("CONNECTIVITY lock poisoned".to_string()))? = Some(connectivity);
    *QUEUE_MANAGER.lock().map_err(|_| FFIError::internal("QUEUE_MANAGER lock poisoned".to_string()))? = Some(manager);
    *WORKER_SENDER.lock().map_err(|_| FFIError::internal("WORKER_SENDER lock poisoned".to_string()))? = Some(worker_sender);
    *WORKER_HANDLE.lock().map_err(|_| FFIError::internal("WORKER_HANDLE lock poisoned".to_string()))? = Some(worker_handle);

    log::info!("Initialization complete");
    Ok(())
}

/// Stop the worker and release global services. Queued items stay in the database.
pub async fn shutdown() -> FFIResult<()> {
    let _guard = INIT_MUTEX.lock().await;

    if !INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }

    let sender = WORKER_SENDER.lock().map_err(|_| FFIError::internal("WORKER_SENDER lock poisoned".to_string()))?.take();
    let handle = WORKER_HANDLE.lock().map_err(|_| FFIError::internal("WORKER_HANDLE lock poisoned".to_string()))?.take();

    if let Some(sender) = sender {
        let (tx, rx) = oneshot::channel();
        if sender.send(SyncWorkerMessage::Shutdown { response: tx }).await.is_ok() {
            if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, rx).await.is_err() {
                log::warn!("Sync worker did not acknowledge shutdown in time");
            }
        }
    }
    if let Some(handle) = handle {
        if !handle.is_finished() {
            handle.abort();
        }
    }

    QUEUE_MANAGER.lock().map_err(|_| FFIError::internal("QUEUE_MANAGER lock poisoned".to_string()))?.take();
    CONNECTIVITY.lock().map_err(|_| FFIError::internal("CONNECTIVITY lock poisoned".to_string()))?.take();
    let pool = DB_POOL.lock().map_err(|_| FFIError::internal("DB_POOL lock poisoned".to_string()))?.take();
    if let Some(pool) = pool {
        pool.close().await;
    }

    INITIALIZED.store(false, Ordering::Release);
    log::info!("Library shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::sync::types::{SyncItem, SyncItemKind, SyncOperation};
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_database_shares_one_connection() {
        assert_eq!(pool_options("sqlite::memory:").get_max_connections(), 1);
        assert_eq!(pool_options("sqlite:file:queue?mode=memory&cache=shared").get_max_connections(), 1);
        assert_eq!(pool_options("sqlite://queue.sqlite").get_max_connections(), FILE_DB_MAX_CONNECTIONS);

        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = pool_options("sqlite::memory:").connect_with(options).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let repo = SqliteSyncQueueRepository::new(pool);
        let queued = SyncItem::new(SyncItemKind::Signature, SyncOperation::Create, json!({"signer": "inspector"}));
        repo.put(&queued).await.unwrap();
        let ids: Vec<String> = repo.get_all().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![queued.id]);
    }

    #[tokio::test]
    async fn test_initialize_restore_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite://{}", dir.path().join("queue.sqlite").display());
        let config = SyncQueueConfig {
            api_base_url: "http://127.0.0.1:9".to_string(),
            start_online: false,
            ..SyncQueueConfig::default()
        };

        initialize(&db_url, config.clone()).await.unwrap();
        assert!(is_initialized());
        assert!(!is_online());

        let manager = get_queue_manager().unwrap();
        let item = manager
            .enqueue(SyncItemKind::ChecklistEntry, SyncOperation::Update, json!({"label": "smoke detector", "ok": false}))
            .await
            .unwrap();
        assert_eq!(manager.status().await.pending, 1);

        shutdown().await.unwrap();
        assert!(!is_initialized());
        assert!(get_queue_manager().is_err());

        // Items written before shutdown come back on the next start
        initialize(&db_url, config).await.unwrap();
        let ids: Vec<String> = get_queue_manager().unwrap().items().await.into_iter().map(|s| s.item.id).collect();
        assert_eq!(ids, vec![item.id]);
        shutdown().await.unwrap();
    }
}
