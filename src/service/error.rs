//! Error types for the service surface.

use thiserror::Error;

use crate::store::StorageError;

/// A command that could not be carried out at all.
///
/// Refusals by the workflow are not errors; they come back as
/// [`Rejection`](crate::workflow::Rejection)s inside a committed result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Nothing was committed, not even an audit entry.
    #[error("{0}")]
    StorageUnavailable(StorageError),

    /// Retries were exhausted; the caller may try again.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { .. } => ServiceError::ConcurrentModification(err),
            other => ServiceError::StorageUnavailable(other),
        }
    }
}
