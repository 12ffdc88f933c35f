//! Registration code lifecycle: NEW -> USED, or GLOBAL
//!
//! Every transition re-reads the document and writes with the revision it
//! read. Nothing is cached between calls.

use std::sync::Arc;

use chrono::Utc;
use healthpass_core::validation::{check_registration, is_live_verification};
use healthpass_core::{
    CodeLengthBounds, CodeStatus, HolderRecord, Rejection, RegistrationCodeDocument,
    VerificationCodeDocument,
};

use crate::error::{RegistrarError, RegistrarResult};
use crate::store::{collections, DocumentStore, DocumentStoreExt, StoreError, StoredDocument};

pub(crate) const LABEL: &str = "Registration code";

/// Outcome of validating a code. Rejections are expected and never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeCheck<T> {
    Valid(StoredDocument<T>),
    Rejected(Rejection),
}

impl<T> CodeCheck<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, CodeCheck::Valid(_))
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            CodeCheck::Valid(_) => None,
            CodeCheck::Rejected(r) => Some(*r),
        }
    }

    /// Convert a rejection into the matching error
    pub fn into_result(self, label: &str, code: &str) -> RegistrarResult<StoredDocument<T>> {
        match self {
            CodeCheck::Valid(stored) => Ok(stored),
            CodeCheck::Rejected(r) => Err(RegistrarError::rejected(r, label, code)),
        }
    }
}

/// Registration code state machine
pub struct RegistrationCodes<S> {
    store: Arc<S>,
}

impl<S> Clone for RegistrationCodes<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore> RegistrationCodes<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Build a document for `code` without persisting it
    pub fn build(
        &self,
        code: &str,
        holder: &HolderRecord,
        expiration_timestamp: i64,
        is_global: bool,
        bounds: &CodeLengthBounds,
    ) -> RegistrarResult<RegistrationCodeDocument> {
        let now = Utc::now().timestamp();
        Ok(RegistrationCodeDocument::build(
            code,
            holder,
            now,
            expiration_timestamp,
            is_global,
            bounds,
        )?)
    }

    pub fn read(
        &self,
        entity: &str,
        code: &str,
    ) -> RegistrarResult<Option<StoredDocument<RegistrationCodeDocument>>> {
        Ok(self
            .store
            .read_typed(&collections::registration(entity), code)?)
    }

    pub fn validate(
        &self,
        entity: &str,
        code: &str,
    ) -> RegistrarResult<CodeCheck<RegistrationCodeDocument>> {
        self.validate_at(entity, code, Utc::now().timestamp())
    }

    /// Validate `code` as of `now` (epoch seconds)
    pub fn validate_at(
        &self,
        entity: &str,
        code: &str,
        now: i64,
    ) -> RegistrarResult<CodeCheck<RegistrationCodeDocument>> {
        let Some(stored) = self.read(entity, code)? else {
            tracing::debug!(entity, code, "Registration code not found");
            return Ok(CodeCheck::Rejected(Rejection::NotFound));
        };

        if let Some(verification) = &stored.body.verification_code {
            self.clean_stale_verification(entity, code, verification, now);
        }

        match check_registration(&stored.body, now) {
            Ok(()) => Ok(CodeCheck::Valid(stored)),
            Err(rejection) => {
                tracing::debug!(entity, code, ?rejection, "Registration code rejected");
                Ok(CodeCheck::Rejected(rejection))
            }
        }
    }

    /// Drop a verification document that no longer backs an active MFA flow.
    /// Best effort: failures are logged and otherwise ignored.
    fn clean_stale_verification(&self, entity: &str, code: &str, verification: &str, now: i64) {
        let collection = collections::verification(entity);
        let stored = match self
            .store
            .read_typed::<VerificationCodeDocument>(&collection, verification)
        {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(entity, code, error = %e, "Could not read attached verification code");
                return;
            }
        };

        if is_live_verification(&stored.body, now) && stored.body.register_code == code {
            return;
        }

        match self.store.delete(&collection, verification, &stored.revision) {
            Ok(()) => tracing::debug!(entity, code, "Removed stale verification code"),
            Err(e) => {
                tracing::warn!(entity, code, error = %e, "Could not remove stale verification code")
            }
        }
    }

    /// Mark a code as used.
    ///
    /// `stored` is the document as returned by validation. GLOBAL codes are
    /// left untouched. A revision that moved since validation is a conflict.
    pub fn consume(
        &self,
        entity: &str,
        stored: &StoredDocument<RegistrationCodeDocument>,
    ) -> RegistrarResult<StoredDocument<RegistrationCodeDocument>> {
        let code = stored.key.as_str();
        let now = Utc::now().timestamp();

        let current = self
            .read(entity, code)?
            .ok_or_else(|| RegistrarError::rejected(Rejection::NotFound, LABEL, code))?;

        check_registration(&current.body, now)
            .map_err(|r| RegistrarError::rejected(r, LABEL, code))?;

        if current.body.status == CodeStatus::Global {
            return Ok(current);
        }

        if current.revision != stored.revision {
            tracing::info!(entity, code, "Registration code changed since validation");
            return Err(RegistrarError::lost_race(LABEL, code));
        }

        let mut body = current.body;
        body.status = CodeStatus::Used;
        body.updated_timestamp = now;

        let collection = collections::registration(entity);
        match self
            .store
            .update_typed(&collection, code, &current.revision, &body)
        {
            Ok(revision) => {
                tracing::info!(entity, code, "Registration code consumed");
                Ok(StoredDocument {
                    key: current.key,
                    revision,
                    body,
                })
            }
            Err(StoreError::Conflict { .. }) => Err(RegistrarError::lost_race(LABEL, code)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an unused code together with its verification code
    pub fn rollback(&self, entity: &str, code: &str) -> RegistrarResult<RegistrationCodeDocument> {
        let current = self
            .read(entity, code)?
            .ok_or_else(|| RegistrarError::rejected(Rejection::NotFound, LABEL, code))?;

        if current.body.status == CodeStatus::Used {
            return Err(RegistrarError::InvalidState(format!(
                "{} {} was already used and cannot be rolled back",
                LABEL, code
            )));
        }

        self.delete_with_verification(entity, current)
    }

    /// Delete a code and its attached verification code at the revision read
    pub(crate) fn delete_with_verification(
        &self,
        entity: &str,
        current: StoredDocument<RegistrationCodeDocument>,
    ) -> RegistrarResult<RegistrationCodeDocument> {
        if let Some(verification) = &current.body.verification_code {
            self.store
                .remove(&collections::verification(entity), verification)?;
        }

        match self.store.delete(
            &collections::registration(entity),
            &current.key,
            &current.revision,
        ) {
            Ok(()) => {
                tracing::info!(entity, code = %current.key, "Registration code deleted");
                Ok(current.body)
            }
            Err(StoreError::Conflict { .. }) => Err(RegistrarError::Conflict(format!(
                "{} {} changed while it was being deleted",
                LABEL, current.key
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
