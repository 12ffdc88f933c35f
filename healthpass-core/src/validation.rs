//! Usability and expiration rules shared by both code kinds

use serde::Deserialize;

use crate::documents::{
    CodeStatus, RegistrationCodeDocument, VerificationCodeDocument, VerificationStatus,
};
use crate::error::{Error, ErrorKind};

/// Inclusive length bounds for registration codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CodeLengthBounds {
    pub min: usize,
    pub max: usize,
}

impl Default for CodeLengthBounds {
    fn default() -> Self {
        Self { min: 5, max: 64 }
    }
}

impl CodeLengthBounds {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn check(&self, code: &str) -> Result<(), Error> {
        let len = code.chars().count();
        if len < self.min || len > self.max {
            return Err(Error::CodeLength {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Why an existing code cannot be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    /// Already consumed
    InvalidState,
    Expired,
    /// Input was not a well-formed code; the store was never consulted
    BadFormat,
}

impl Rejection {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Rejection::NotFound => ErrorKind::NotFound,
            Rejection::InvalidState => ErrorKind::InvalidState,
            Rejection::Expired => ErrorKind::Expired,
            Rejection::BadFormat => ErrorKind::Validation,
        }
    }
}

/// Expiry is strict: a code is already expired at its expiration second.
pub fn is_expired(now: i64, expiration_timestamp: i64) -> bool {
    now >= expiration_timestamp
}

/// Decide whether a stored registration code may be used at `now`
pub fn check_registration(doc: &RegistrationCodeDocument, now: i64) -> Result<(), Rejection> {
    match doc.status {
        CodeStatus::Global => Ok(()),
        CodeStatus::Used => Err(Rejection::InvalidState),
        CodeStatus::New if is_expired(now, doc.expiration_timestamp) => Err(Rejection::Expired),
        CodeStatus::New => Ok(()),
    }
}

/// Decide whether a stored verification code may be used at `now`
pub fn check_verification(doc: &VerificationCodeDocument, now: i64) -> Result<(), Rejection> {
    if doc.verification_status == VerificationStatus::Used {
        return Err(Rejection::InvalidState);
    }
    if is_expired(now, doc.expiration_timestamp) {
        return Err(Rejection::Expired);
    }
    Ok(())
}

/// A verification document still represents an active MFA flow
pub fn is_live_verification(doc: &VerificationCodeDocument, now: i64) -> bool {
    check_verification(doc, now).is_ok()
}
