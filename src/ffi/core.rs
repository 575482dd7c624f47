// src/ffi/core.rs
// ============================================================================
// Core FFI functions for library initialization and management
// ============================================================================

use crate::domains::sync::config::SyncQueueConfig;
use crate::ffi::{block_on_async, handle_status_result, parse_json_input, error::FFIError};
use crate::ffi::error::FFIResult;
use std::ffi::{c_char, CStr, CString};
use std::os::raw::c_int;

/// Environment config with the host's JSON overrides applied key by key
fn resolve_config(config_json: *const c_char) -> FFIResult<SyncQueueConfig> {
    let base = SyncQueueConfig::from_env()?;
    if config_json.is_null() {
        return Ok(base);
    }

    let overrides: serde_json::Value = parse_json_input(config_json)?;
    let serde_json::Value::Object(overrides) = overrides else {
        return Err(FFIError::invalid_argument("config_json must be a JSON object"));
    };

    let mut merged = serde_json::to_value(&base)
        .map_err(|e| FFIError::internal(format!("Failed to serialize config: {}", e)))?;
    if let serde_json::Value::Object(fields) = &mut merged {
        fields.extend(overrides);
    }
    let config: SyncQueueConfig = serde_json::from_value(merged)
        .map_err(|e| FFIError::invalid_argument(&format!("Invalid config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Initialize the library with a database URL and optional JSON config overrides
/// (`config_json` may be null). Returns 0 on success, non-zero on error.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn initialize_library(
    db_url: *const c_char,
    config_json: *const c_char,
) -> c_int {
    let result = std::panic::catch_unwind(|| {
        if db_url.is_null() {
            return Err(FFIError::invalid_argument("Null db_url provided for initialization"));
        }

        let db_url_str = match unsafe { CStr::from_ptr(db_url) }.to_str() {
            Ok(s) => s.to_string(),
            Err(_) => return Err(FFIError::invalid_argument("Invalid db_url string")),
        };

        // Validate that we received a proper SQLite URL, not a file path
        if !db_url_str.starts_with("sqlite:") {
            return Err(FFIError::invalid_argument(
                "db_url must be a SQLite URL starting with 'sqlite:', not a file path"
            ));
        }

        let config = resolve_config(config_json)?;

        block_on_async(async {
            crate::initialize(&db_url_str, config).await
        })
    });

    match result {
        Ok(ffi_result) => handle_status_result(|| ffi_result),
        Err(panic_payload) => {
            let panic_msg = if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Panicked during FFI call, but panic message is not a string".to_string()
            };
            log::error!("Panic in initialize_library: {}", panic_msg);
            handle_status_result(|| Err(FFIError::internal(format!("Panic during initialization: {}", panic_msg))))
        }
    }
}

/// Stop the background worker and release global services
#[unsafe(no_mangle)]
pub unsafe extern "C" fn shutdown_library() -> c_int {
    handle_status_result(|| block_on_async(crate::globals::shutdown()))
}

/// Frees a C string that was allocated by Rust and passed over FFI.
/// Call this exactly once for every string returned by this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = unsafe { CString::from_raw(ptr) };
    }
}

/// Last error on the calling thread as JSON (`{code, message, details}`).
/// Returns null if the last call succeeded; free the result with free_string().
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_last_error() -> *mut c_char {
    crate::ffi::error::get_last_error_message()
}
