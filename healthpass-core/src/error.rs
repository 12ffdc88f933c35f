//! Error types for the onboarding core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Code must be between {min} and {max} characters")]
    CodeLength { min: usize, max: usize },

    #[error("Invalid verification code format")]
    VerificationFormat,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid holder id {holder_id}: {reason}")]
    InvalidHolderId { holder_id: String, reason: String },

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Every core error describes caller input, so it always classifies as validation
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// Semantic error classification shared by every public operation.
///
/// The status code is an HTTP-style classification only; nothing in the
/// engine assumes it is sent over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input
    Validation,
    /// Code or organization absent
    NotFound,
    /// Code exists but is not in a usable state (already used)
    InvalidState,
    /// Code exists but its expiration has passed
    Expired,
    /// A concurrent write or duplicate id was detected
    Conflict,
    /// Batch stopped at the error threshold; partial results are still returned
    ThresholdAbort,
    /// Store or dispatcher failure
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState => 400,
            ErrorKind::Expired => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::ThresholdAbort => 200,
            ErrorKind::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Expired => "expired",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ThresholdAbort => "threshold_abort",
            ErrorKind::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_message_names_bounds() {
        let err = Error::CodeLength { min: 5, max: 64 };
        assert_eq!(err.to_string(), "Code must be between 5 and 64 characters");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::Expired.status_code(), 400);
        assert_eq!(ErrorKind::ThresholdAbort.status_code(), 200);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
    }
}
