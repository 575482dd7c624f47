// src/ffi/sync.rs
// =============================================================================
// SYNC QUEUE – FFI BINDINGS
// =============================================================================
// Exposes the offline mutation queue to the host app. JSON in, JSON out.
//
// MEMORY OWNERSHIP:
// - The host owns input JSON strings (read-only in Rust)
// - Rust owns output strings (the host must call free_string)
//
// JSON CONTRACTS:
// - enqueue: {"kind": "inspection|photo|signature|checklist_entry|message",
//             "operation": "create|update|delete", "payload": {...}}
// - retry_item / discard: {"id": "sync_..."}
// -----------------------------------------------------------------------------

use crate::domains::sync::types::{SyncItemKind, SyncOperation};
use crate::domains::sync::worker::SyncWorkerMessage;
use crate::ffi::error::{ErrorCode, FFIError, FFIResult};
use crate::ffi::{block_on_async, handle_status_result, parse_json_input, to_ffi_error, write_json_result};
use crate::globals;
use serde::Deserialize;
use std::os::raw::{c_char, c_int};
use tokio::sync::oneshot;

#[derive(Deserialize)]
struct EnqueueRequest {
    kind: String,
    operation: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct ItemIdRequest {
    id: String,
}

fn worker_gone() -> FFIError {
    FFIError::new(ErrorCode::ServiceGeneral, "Sync worker is not running")
}

/// Queue a mutation locally. Output: the stored SyncItem.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_enqueue(payload_json: *const c_char, result: *mut *mut c_char) -> c_int {
    unsafe {
        write_json_result(result, || {
            let request: EnqueueRequest = parse_json_input(payload_json)?;
            let kind = request.kind.parse::<SyncItemKind>().map_err(to_ffi_error)?;
            let operation = request.operation.parse::<SyncOperation>().map_err(to_ffi_error)?;

            let manager = globals::get_queue_manager()?;
            block_on_async(async {
                manager.enqueue(kind, operation, request.payload).await.map_err(to_ffi_error)
            })
        })
    }
}

/// Run a flush pass and wait for it. Output: FlushOutcome.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_flush_now(result: *mut *mut c_char) -> c_int {
    unsafe {
        write_json_result(result, || {
            let sender = globals::get_worker_sender()?;
            block_on_async(async {
                let (tx, rx) = oneshot::channel();
                sender.send(SyncWorkerMessage::FlushNow { response: tx })
                    .await
                    .map_err(|_| worker_gone())?;
                rx.await.map_err(|_| worker_gone())
            })
        })
    }
}

/// Remove delivered items. Output: {"cleared": n}
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_clear_synced(result: *mut *mut c_char) -> c_int {
    unsafe {
        write_json_result(result, || {
            let manager = globals::get_queue_manager()?;
            let cleared = block_on_async(async { FFIResult::Ok(manager.clear_synced().await) })?;
            Ok(serde_json::json!({ "cleared": cleared }))
        })
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_set_compression_enabled(enabled: bool) -> c_int {
    handle_status_result(|| {
        let sender = globals::get_worker_sender()?;
        block_on_async(async {
            let (tx, rx) = oneshot::channel();
            sender.send(SyncWorkerMessage::SetCompression { enabled, response: tx })
                .await
                .map_err(|_| worker_gone())?;
            rx.await.map_err(|_| worker_gone())
        })
    })
}

/// Output: QueueStatus
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_get_status(result: *mut *mut c_char) -> c_int {
    unsafe {
        write_json_result(result, || {
            let manager = globals::get_queue_manager()?;
            block_on_async(async { FFIResult::Ok(manager.status().await) })
        })
    }
}

/// Output: array of items with their derived state, in replay order
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_list_items(result: *mut *mut c_char) -> c_int {
    unsafe {
        write_json_result(result, || {
            let manager = globals::get_queue_manager()?;
            block_on_async(async { FFIResult::Ok(manager.items().await) })
        })
    }
}

/// Give every failed item a fresh set of attempts. Output: {"requeued": n}
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_retry_failed(result: *mut *mut c_char) -> c_int {
    unsafe {
        write_json_result(result, || {
            let manager = globals::get_queue_manager()?;
            let requeued = block_on_async(async { FFIResult::Ok(manager.retry_failed().await) })?;
            Ok(serde_json::json!({ "requeued": requeued }))
        })
    }
}

/// Input: {"id": "..."}. Output: {"reset": bool}
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_retry_item(payload_json: *const c_char, result: *mut *mut c_char) -> c_int {
    unsafe {
        write_json_result(result, || {
            let request: ItemIdRequest = parse_json_input(payload_json)?;
            let manager = globals::get_queue_manager()?;
            let reset = block_on_async(async {
                manager.retry_item(&request.id).await.map_err(to_ffi_error)
            })?;
            Ok(serde_json::json!({ "reset": reset }))
        })
    }
}

/// Input: {"id": "..."}. Output: {"discarded": bool}
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_discard(payload_json: *const c_char, result: *mut *mut c_char) -> c_int {
    unsafe {
        write_json_result(result, || {
            let request: ItemIdRequest = parse_json_input(payload_json)?;
            let manager = globals::get_queue_manager()?;
            let discarded = block_on_async(async {
                manager.discard(&request.id).await.map_err(to_ffi_error)
            })?;
            Ok(serde_json::json!({ "discarded": discarded }))
        })
    }
}

/// Connectivity report from the host. Going online wakes the worker, which flushes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_set_online(online: bool) -> c_int {
    handle_status_result(|| globals::set_online(online).map(|_| ()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sync_queue_is_online() -> bool {
    globals::is_online()
}
