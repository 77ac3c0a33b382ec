use std::time::Duration;
use thiserror::Error;

/// Errors from the repository layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("edit conflict: the record was modified or deleted by another request")]
    EditConflict,

    #[error("a user with this email address already exists")]
    DuplicateEmail,

    #[error("store operation exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    /// Infrastructure faults, as opposed to outcomes about the data itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Sqlx(_))
    }
}
