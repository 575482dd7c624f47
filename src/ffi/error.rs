use std::cell::RefCell;
use std::ffi::CString;
use std::fmt;
use std::os::raw::c_char;
use serde::{Deserialize, Serialize};
use crate::errors::{DomainError, DbError, ServiceError, SyncError, ValidationError};

/// Error codes for FFI boundary
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Success (no error)
    Success = 0,

    // General errors (1-99)
    InvalidArgument = 2,
    NullPointer = 3,
    InvalidUtf8 = 4,
    InternalError = 6,
    NotInitialized = 7,

    // Database errors (100-199)
    DatabaseGeneral = 100,
    DatabaseMigration = 106,

    // Domain errors (200-299)
    DomainGeneral = 200,
    EntityNotFound = 201,
    ValidationFailed = 204,
    CompressionError = 208,

    // Service errors (300-399)
    ServiceGeneral = 300,
    ConfigurationError = 310,

    // Sync errors (400-499)
    SyncGeneral = 400,
    SyncNetworkError = 401,
    SyncServerError = 405,
    SyncTimeout = 411,
    SyncSerialization = 413,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as i32)
    }
}

/// Error type for FFI boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FFIError {
    /// Error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (JSON string)
    pub details: Option<String>,
}

impl fmt::Display for FFIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(details) = &self.details {
            write!(f, "{}: {} ({})", self.code, self.message, details)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for FFIError {}

impl FFIError {
    pub fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: &str, details: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            details: Some(details.to_string()),
        }
    }

    pub fn invalid_argument(message: &str) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn internal(message: String) -> Self {
        Self::new(ErrorCode::InternalError, &message)
    }

    pub fn not_initialized(component: &str) -> Self {
        Self::new(ErrorCode::NotInitialized, &format!("{} not initialized", component))
    }
}

impl From<DbError> for FFIError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(sqlx_err) => {
                Self::new(ErrorCode::DatabaseGeneral, &sqlx_err.to_string())
            },
            DbError::Migration(msg) => {
                Self::new(ErrorCode::DatabaseMigration, &msg)
            },
            DbError::Other(msg) => {
                Self::new(ErrorCode::DatabaseGeneral, &msg)
            },
        }
    }
}

impl From<DomainError> for FFIError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Database(db_err) => db_err.into(),
            DomainError::EntityNotFound(entity, id) => {
                Self::with_details(
                    ErrorCode::EntityNotFound,
                    &format!("Entity not found: {} with ID {}", entity, id),
                    &serde_json::json!({ "entity": entity, "id": id }).to_string()
                )
            },
            DomainError::Validation(val_err) => val_err.into(),
            DomainError::Sync(sync_err) => sync_err.into(),
            DomainError::Compression(msg) => {
                Self::new(ErrorCode::CompressionError, &msg)
            },
            DomainError::Internal(msg) => {
                Self::new(ErrorCode::InternalError, &msg)
            },
        }
    }
}

impl From<ServiceError> for FFIError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Domain(domain_err) => domain_err.into(),
            ServiceError::Configuration(msg) => {
                Self::new(ErrorCode::ConfigurationError, &msg)
            },
        }
    }
}

impl From<SyncError> for FFIError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Network(msg) => {
                Self::new(ErrorCode::SyncNetworkError, &msg)
            },
            SyncError::ServerError { status, message } => {
                Self::with_details(
                    ErrorCode::SyncServerError,
                    &format!("Server responded with {}", status),
                    &serde_json::json!({ "status": status, "message": message }).to_string()
                )
            },
            SyncError::Timeout(secs) => {
                Self::new(ErrorCode::SyncTimeout, &format!("Sync timeout after {} seconds", secs))
            },
            SyncError::Serialization(msg) => {
                Self::new(ErrorCode::SyncSerialization, &msg)
            },
            SyncError::Other(msg) => {
                Self::new(ErrorCode::SyncGeneral, &msg)
            }
        }
    }
}

impl From<ValidationError> for FFIError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Required { field } => {
                Self::with_details(
                    ErrorCode::ValidationFailed,
                    &format!("Field '{}' is required", field),
                    &serde_json::json!({ "field": field, "type": "required" }).to_string()
                )
            },
            ValidationError::InvalidValue { field, reason } => {
                Self::with_details(
                    ErrorCode::ValidationFailed,
                    &format!("Field '{}' contains an invalid value: {}", field, reason),
                    &serde_json::json!({ "field": field, "type": "invalid_value", "reason": reason }).to_string()
                )
            },
        }
    }
}

impl From<std::ffi::NulError> for FFIError {
    fn from(_: std::ffi::NulError) -> Self {
        Self::new(ErrorCode::InvalidUtf8, "String contains null bytes, cannot create CString")
    }
}

/// Result type alias for FFI functions
pub type FFIResult<T> = Result<T, FFIError>;

thread_local! {
    static LAST_ERROR: RefCell<Option<FFIError>> = const { RefCell::new(None) };
}

/// Remember the most recent error on this thread for `get_last_error()`
pub fn set_last_error(error: &FFIError) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(error.clone()));
}

pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

pub fn last_error() -> Option<FFIError> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Last error as an owned C string (JSON), or null when there is none.
/// The caller frees the result with `free_string()`.
pub fn get_last_error_message() -> *mut c_char {
    let Some(error) = last_error() else {
        return std::ptr::null_mut();
    };
    let json = serde_json::to_string(&error).unwrap_or_else(|_| error.message.clone());
    CString::new(json).map_or(std::ptr::null_mut(), |s| s.into_raw())
}
