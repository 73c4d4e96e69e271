use thiserror::Error;

use crate::infrastructure::connectors::ConnectorError;

/// Error taxonomy surfaced by every engine operation.
///
/// Violations are data, never errors; these variants cover rejected input,
/// missing entities, authorization, illegal transitions, external failures,
/// and invariant breakage. A failed operation never leaves partially
/// mutated state behind.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("transient external failure: {0}")]
    TransientExternal(String),
    #[error("permanent external failure: {0}")]
    PermanentExternal(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable error-kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::NotFound { .. } => "NOT_FOUND",
            ServiceError::PermissionDenied(_) => "PERMISSION_DENIED",
            ServiceError::State(_) => "STATE_ERROR",
            ServiceError::TransientExternal(_) => "TRANSIENT_EXTERNAL",
            ServiceError::PermanentExternal(_) => "PERMANENT_EXTERNAL",
            ServiceError::Fatal(_) => "FATAL",
        }
    }
}

impl From<ConnectorError> for ServiceError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Transient(msg) => ServiceError::TransientExternal(msg),
            ConnectorError::Permanent(msg) => ServiceError::PermanentExternal(msg),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
