//! Classification of creation conflicts
//!
//! A duplicate id on create is never reported as-is. The existing document
//! is re-validated so the caller learns whether the code was already spent,
//! has expired, or was simply submitted twice.

use chrono::Utc;
use healthpass_core::Rejection;

use crate::error::RegistrarError;
use crate::registration::{CodeCheck, RegistrationCodes, LABEL};
use crate::store::DocumentStore;

pub struct ConflictResolver<S> {
    codes: RegistrationCodes<S>,
}

impl<S: DocumentStore> ConflictResolver<S> {
    pub fn new(codes: RegistrationCodes<S>) -> Self {
        Self { codes }
    }

    /// Explain why creating `code` conflicted
    pub fn classify(&self, entity: &str, code: &str) -> RegistrarError {
        self.classify_at(entity, code, Utc::now().timestamp())
    }

    pub fn classify_at(&self, entity: &str, code: &str, now: i64) -> RegistrarError {
        let check = match self.codes.validate_at(entity, code, now) {
            Ok(check) => check,
            Err(e) => return e,
        };

        let classified = match check {
            CodeCheck::Rejected(rejection @ (Rejection::Expired | Rejection::InvalidState)) => {
                RegistrarError::rejected(rejection, LABEL, code)
            }
            // Still valid, or gone since the write: either way the id was taken
            CodeCheck::Valid(_) | CodeCheck::Rejected(_) => {
                RegistrarError::Conflict(format!("{} {}: document already exists", LABEL, code))
            }
        };

        tracing::debug!(entity, code, reason = %classified, "Classified creation conflict");
        classified
    }
}
