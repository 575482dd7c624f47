use serde::Serialize;
use thiserror::Error;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("DbError", 2)?;
        match self {
            DbError::Sqlx(err) => {
                state.serialize_field("type", "Sqlx")?;
                state.serialize_field("message", &err.to_string())?;
            }
            DbError::Migration(s) => {
                state.serialize_field("type", "Migration")?;
                state.serialize_field("message", s)?;
            }
            DbError::Other(s) => {
                state.serialize_field("type", "Other")?;
                state.serialize_field("message", s)?;
            }
        }
        state.end()
    }
}

/// sqlx::Error is not Clone, so the SQLx variant degrades to `Other` on clone.
impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Sqlx(err) => DbError::Other(format!("SQLx error: {}", err)),
            DbError::Migration(s) => DbError::Migration(s.clone()),
            DbError::Other(s) => DbError::Other(s.clone()),
        }
    }
}

/// Domain-level errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Entity not found: {0} with ID {1}")]
    EntityNotFound(String, String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Service-level errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum ServiceError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors raised while replaying a queued mutation against the remote endpoint
#[derive(Debug, Error, Clone, Serialize)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error {status}: {message}")]
    ServerError {
        status: u16,
        message: String,
    },

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Payload serialization failed: {0}")]
    Serialization(String),

    #[error("Sync error: {0}")]
    Other(String),
}

impl SyncError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Validation errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required {
        field: String,
    },

    #[error("Field '{field}' contains an invalid value: {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        Self::Required {
            field: field.to_string(),
        }
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::Network("reset".into()).is_transient());
        assert!(SyncError::Timeout(30).is_transient());
        assert!(SyncError::ServerError { status: 503, message: "down".into() }.is_transient());
        assert!(SyncError::ServerError { status: 429, message: "slow down".into() }.is_transient());
        assert!(!SyncError::ServerError { status: 400, message: "bad".into() }.is_transient());
        assert!(!SyncError::Serialization("nan".into()).is_transient());
    }

    #[test]
    fn test_db_error_clone_degrades_sqlx() {
        let err = DbError::Sqlx(sqlx::Error::RowNotFound);
        match err.clone() {
            DbError::Other(msg) => assert!(msg.starts_with("SQLx error")),
            other => panic!("unexpected clone: {:?}", other),
        }
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(ValidationError::required("payload").to_string(), "Field 'payload' is required");
        let err = DomainError::from(ValidationError::invalid_value("kind", "unknown"));
        assert_eq!(err.to_string(), "Validation error: Field 'kind' contains an invalid value: unknown");
    }
}
