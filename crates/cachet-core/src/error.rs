use thiserror::Error;

/// Error kinds exposed to the HTTP boundary. The message is what a caller
/// may see; internal detail stays in logs.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or out-of-policy input (400).
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials or session (401). The message never
    /// distinguishes "wrong password" from "no such user".
    #[error("{0}")]
    Auth(String),

    /// Authenticated but not entitled (403).
    #[error("{0}")]
    Forbidden(String),

    /// Missing, deleted, or owned by someone else — indistinguishable (404).
    #[error("{0}")]
    NotFound(String),

    /// Duplicate unique field (409).
    #[error("{0}")]
    Conflict(String),

    /// Storage quota exceeded (402).
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Blob-store failure, distinct from database errors so operators can
    /// tell disk problems from data-layer problems (5xx).
    #[error("storage backend error: {0}")]
    Storage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_found() -> Self {
        ServiceError::NotFound("not found".into())
    }

    pub fn invalid_credentials() -> Self {
        ServiceError::Auth("invalid credentials".into())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
