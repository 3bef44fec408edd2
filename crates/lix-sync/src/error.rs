//! Error types for the sync module.

use lix_store::StoreError;
use thiserror::Error;

use crate::messages::StatusCode;

/// Errors that can occur during sync operations.
///
/// On the server every variant maps to a response status via
/// [`SyncError::status`]; on the client non-success responses are mapped
/// back into the matching variant.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed request, schema violation or identity conflict.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A Lix with the same id already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown Lix id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Server-side failure unrelated to the request.
    #[error("internal error: {0}")]
    Internal(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request or response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl SyncError {
    /// The response status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            SyncError::BadRequest(_) | SyncError::Decode(_) => StatusCode::BadRequest,
            SyncError::Conflict(_) => StatusCode::Conflict,
            SyncError::NotFound(_) => StatusCode::NotFound,
            SyncError::Store(StoreError::Validation(_) | StoreError::InvalidData(_)) => {
                StatusCode::BadRequest
            }
            SyncError::Store(StoreError::NotFound(_)) => StatusCode::NotFound,
            SyncError::Store(_) | SyncError::Internal(_) | SyncError::Transport(_) => {
                StatusCode::InternalServerError
            }
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lix_core::ValidationError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SyncError::BadRequest("x".into()).status(),
            StatusCode::BadRequest
        );
        assert_eq!(SyncError::Decode("x".into()).status(), StatusCode::BadRequest);
        assert_eq!(SyncError::Conflict("x".into()).status(), StatusCode::Conflict);
        assert_eq!(SyncError::NotFound("x".into()).status(), StatusCode::NotFound);
        assert_eq!(
            SyncError::Internal("x".into()).status(),
            StatusCode::InternalServerError
        );

        let violation = StoreError::Validation(ValidationError::violation("csv_row_v1", "bad"));
        assert_eq!(SyncError::from(violation).status(), StatusCode::BadRequest);
        assert_eq!(
            SyncError::from(StoreError::Backend("disk".into())).status(),
            StatusCode::InternalServerError
        );
    }
}
