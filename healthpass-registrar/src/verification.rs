//! Verification code lifecycle for the MFA flow
//!
//! A verification code is bound to one registration code. Issuing a new one
//! removes the previous one first, so at most one is live at a time.

use std::sync::Arc;

use chrono::Utc;
use healthpass_core::codes::{format_verification_code, parse_verification_code};
use healthpass_core::validation::{check_registration, check_verification};
use healthpass_core::{
    CodeGenerator, Rejection, RegistrationCodeDocument, VerificationCodeDocument,
    VerificationStatus,
};
use serde::Serialize;

use crate::config::RegistrarConfig;
use crate::error::{RegistrarError, RegistrarResult};
use crate::registration::{CodeCheck, LABEL as REGISTRATION_LABEL};
use crate::store::{
    collections, DocumentStore, DocumentStoreExt, Revision, Selector, StoreError, StoredDocument,
};

pub(crate) const LABEL: &str = "Verification code";

/// A freshly issued verification code
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedVerification {
    pub verification_code: String,
    pub status: VerificationStatus,
    pub expiration_timestamp: i64,
    /// The registration document as updated to reference the new code
    #[serde(skip)]
    pub registration: StoredDocument<RegistrationCodeDocument>,
}

/// Verification code state machine
pub struct VerificationCodes<S> {
    store: Arc<S>,
    generator: Arc<dyn CodeGenerator>,
    retry_limit: u32,
    ttl_seconds: i64,
    query_limit: usize,
}

impl<S: DocumentStore> VerificationCodes<S> {
    pub fn new(store: Arc<S>, generator: Arc<dyn CodeGenerator>, config: &RegistrarConfig) -> Self {
        Self {
            store,
            generator,
            retry_limit: config.verification_retry_limit.max(1),
            ttl_seconds: config.verification_ttl_seconds(),
            query_limit: config.query_limit,
        }
    }

    /// Issue a verification code for a validated registration code
    pub fn issue(
        &self,
        entity: &str,
        registration: &StoredDocument<RegistrationCodeDocument>,
    ) -> RegistrarResult<IssuedVerification> {
        let now = Utc::now().timestamp();
        let code = registration.key.as_str();
        let reg_collection = collections::registration(entity);
        let ver_collection = collections::verification(entity);

        let current = self
            .store
            .read_typed::<RegistrationCodeDocument>(&reg_collection, code)?
            .ok_or_else(|| RegistrarError::rejected(Rejection::NotFound, REGISTRATION_LABEL, code))?;
        check_registration(&current.body, now)
            .map_err(|r| RegistrarError::rejected(r, REGISTRATION_LABEL, code))?;
        if current.revision != registration.revision {
            return Err(RegistrarError::Conflict(format!(
                "{} {} changed since it was validated",
                REGISTRATION_LABEL,
                code
            )));
        }

        self.retire_previous(entity, &current)?;

        let (key, revision) = self.allocate(&ver_collection, code, now)?;

        let mut body = current.body;
        body.verification_code = Some(key.clone());
        body.updated_timestamp = now;

        match self
            .store
            .update_typed(&reg_collection, code, &current.revision, &body)
        {
            Ok(reg_revision) => {
                tracing::info!(entity, code, "Verification code issued");
                Ok(IssuedVerification {
                    verification_code: key,
                    status: VerificationStatus::New,
                    expiration_timestamp: now + self.ttl_seconds,
                    registration: StoredDocument {
                        key: current.key,
                        revision: reg_revision,
                        body,
                    },
                })
            }
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&ver_collection, &key, &revision) {
                    tracing::warn!(entity, code, error = %cleanup, "Could not remove orphaned verification code");
                }
                match e {
                    StoreError::Conflict { .. } => Err(RegistrarError::Conflict(format!(
                        "{} {} changed while a verification code was being issued",
                        REGISTRATION_LABEL,
                        code
                    ))),
                    other => Err(other.into()),
                }
            }
        }
    }

    /// Remove the verification code attached to `registration` and any stray
    /// one still pointing at the same registration code
    fn retire_previous(
        &self,
        entity: &str,
        registration: &StoredDocument<RegistrationCodeDocument>,
    ) -> RegistrarResult<()> {
        let collection = collections::verification(entity);

        if let Some(previous) = &registration.body.verification_code {
            if self.store.remove(&collection, previous)? {
                tracing::debug!(entity, code = %registration.key, "Removed previous verification code");
            }
        }

        let strays = self.store.query(
            &collection,
            &Selector::new().eq("registerCode", registration.key.as_str()),
            self.query_limit,
        )?;
        for stray in strays {
            match self.store.delete(&collection, &stray.key, &stray.revision) {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Create a verification document under a fresh code.
    ///
    /// Only an id collision triggers another attempt, and never more than
    /// `retry_limit` attempts are made.
    fn allocate(&self, collection: &str, register_code: &str, now: i64) -> RegistrarResult<(String, Revision)> {
        let mut last_collision = None;

        for attempt in 1..=self.retry_limit {
            let key = format_verification_code(self.generator.verification_code());
            let doc = VerificationCodeDocument {
                id: key.clone(),
                verification_status: VerificationStatus::New,
                register_code: register_code.to_string(),
                registration_doc_id: register_code.to_string(),
                created_timestamp: now,
                expiration_timestamp: now + self.ttl_seconds,
            };

            match self.store.create_typed(collection, &key, &doc) {
                Ok(revision) => return Ok((key, revision)),
                Err(StoreError::Conflict { .. }) => {
                    tracing::warn!(attempt, limit = self.retry_limit, "Verification code collision");
                    last_collision = Some(key);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistrarError::Conflict(format!(
            "Could not allocate a unique verification code after {} attempts (last collision on {})",
            self.retry_limit,
            last_collision.unwrap_or_default()
        )))
    }

    pub fn read(
        &self,
        entity: &str,
        key: &str,
    ) -> RegistrarResult<Option<StoredDocument<VerificationCodeDocument>>> {
        Ok(self
            .store
            .read_typed(&collections::verification(entity), key)?)
    }

    pub fn validate(
        &self,
        entity: &str,
        code: &str,
    ) -> RegistrarResult<CodeCheck<VerificationCodeDocument>> {
        self.validate_at(entity, code, Utc::now().timestamp())
    }

    /// Validate user input as a verification code as of `now`
    pub fn validate_at(
        &self,
        entity: &str,
        code: &str,
        now: i64,
    ) -> RegistrarResult<CodeCheck<VerificationCodeDocument>> {
        let Ok(key) = parse_verification_code(code) else {
            return Ok(CodeCheck::Rejected(Rejection::BadFormat));
        };

        let Some(stored) = self.read(entity, &key)? else {
            return Ok(CodeCheck::Rejected(Rejection::NotFound));
        };

        Ok(match check_verification(&stored.body, now) {
            Ok(()) => CodeCheck::Valid(stored),
            Err(rejection) => CodeCheck::Rejected(rejection),
        })
    }

    /// Mark a verification code as used. One-way.
    pub fn consume(
        &self,
        entity: &str,
        stored: &StoredDocument<VerificationCodeDocument>,
    ) -> RegistrarResult<StoredDocument<VerificationCodeDocument>> {
        let key = stored.key.as_str();
        let now = Utc::now().timestamp();

        let current = self
            .read(entity, key)?
            .ok_or_else(|| RegistrarError::rejected(Rejection::NotFound, LABEL, key))?;

        check_verification(&current.body, now).map_err(|r| RegistrarError::rejected(r, LABEL, key))?;

        if current.revision != stored.revision {
            return Err(RegistrarError::lost_race(LABEL, key));
        }

        let mut body = current.body;
        body.verification_status = VerificationStatus::Used;

        match self.store.update_typed(
            &collections::verification(entity),
            key,
            &current.revision,
            &body,
        ) {
            Ok(revision) => Ok(StoredDocument {
                key: current.key,
                revision,
                body,
            }),
            Err(StoreError::Conflict { .. }) => Err(RegistrarError::lost_race(LABEL, key)),
            Err(e) => Err(e.into()),
        }
    }
}
