//! Registrar error types

use axum::response::{IntoResponse, Response};
use healthpass_core::{ErrorKind, Rejection};
use thiserror::Error;

use crate::response::ApiResponse;
use crate::store::StoreError;

/// Result type for registrar operations
pub type RegistrarResult<T> = Result<T, RegistrarError>;

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("{0}")]
    Validation(String),

    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Expired(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Core(#[from] healthpass_core::Error),
}

impl RegistrarError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistrarError::Validation(_) | RegistrarError::Core(_) => ErrorKind::Validation,
            RegistrarError::OrganizationNotFound(_) | RegistrarError::NotFound(_) => {
                ErrorKind::NotFound
            }
            RegistrarError::InvalidState(_) => ErrorKind::InvalidState,
            RegistrarError::Expired(_) => ErrorKind::Expired,
            RegistrarError::Conflict(_) => ErrorKind::Conflict,
            RegistrarError::Notification(_) | RegistrarError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Turn a rejected code check into an error naming the code
    pub fn rejected(rejection: Rejection, label: &str, code: &str) -> Self {
        match rejection {
            Rejection::NotFound => RegistrarError::NotFound(format!("{} {} not found", label, code)),
            Rejection::InvalidState => {
                RegistrarError::InvalidState(format!("{} {} was already used", label, code))
            }
            Rejection::Expired => RegistrarError::Expired(format!("{} {} has expired", label, code)),
            Rejection::BadFormat => RegistrarError::Core(healthpass_core::Error::VerificationFormat),
        }
    }

    /// Two writers raced on the same document; the loser sees the code as taken
    pub fn lost_race(label: &str, code: &str) -> Self {
        RegistrarError::Conflict(format!(
            "{} {} was already used by a concurrent request",
            label, code
        ))
    }
}

/// Store failures that reach this conversion were not expected by the caller.
/// Creation conflicts are classified explicitly before they get here.
impl From<StoreError> for RegistrarError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { collection, key } => RegistrarError::Conflict(format!(
                "Document {} in {} was modified concurrently",
                key, collection
            )),
            StoreError::NotFound { collection, key } => {
                RegistrarError::NotFound(format!("Document {} not found in {}", key, collection))
            }
            StoreError::Serialization(e) => RegistrarError::Internal(format!("malformed document: {}", e)),
            StoreError::Internal(msg) => RegistrarError::Internal(msg),
        }
    }
}

impl IntoResponse for RegistrarError {
    fn into_response(self) -> Response {
        let message = match &self {
            RegistrarError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            RegistrarError::Notification(msg) => {
                tracing::error!("Notification failed: {}", msg);
                "Notification could not be delivered".to_string()
            }
            other => other.to_string(),
        };

        ApiResponse::<()>::error(self.kind(), message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_rejection_messages() {
        let used = RegistrarError::rejected(Rejection::InvalidState, "Registration code", "ABCDE");
        assert_eq!(used.kind(), ErrorKind::InvalidState);
        assert!(used.to_string().contains("already used"));

        let expired = RegistrarError::rejected(Rejection::Expired, "Registration code", "ABCDE");
        assert_eq!(expired.kind(), ErrorKind::Expired);

        let format = RegistrarError::rejected(Rejection::BadFormat, "Verification code", "x");
        assert_eq!(format.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_store_errors_classify() {
        let err: RegistrarError = StoreError::Internal("disk full".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err: RegistrarError = StoreError::conflict("c", "k").into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_into_response_status() {
        let response = RegistrarError::OrganizationNotFound("acme".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = RegistrarError::Internal("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
