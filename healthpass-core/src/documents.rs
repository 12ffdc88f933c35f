//! Stored document shapes for registration codes, verification codes and
//! upload queue items

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::validation::CodeLengthBounds;

/// Holder fields supplied by the organization. Carried through unchanged.
pub type HolderRecord = Map<String, Value>;

/// Lifecycle status of a registration code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    /// Issued and not yet consumed
    New,
    /// Consumed; terminal
    Used,
    /// Multi-use code that never expires and never transitions
    Global,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::New => "new",
            CodeStatus::Used => "used",
            CodeStatus::Global => "global",
        }
    }
}

/// Lifecycle status of a verification code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    New,
    Used,
}

/// A registration code. The document key is the code itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCodeDocument {
    pub id: String,
    pub register_code: String,
    pub status: CodeStatus,
    pub created_timestamp: i64,
    pub updated_timestamp: i64,
    pub expiration_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
    #[serde(flatten)]
    pub holder: HolderRecord,
}

/// Fields owned by the document itself; never copied from a holder record
const RESERVED_FIELDS: &[&str] = &[
    "id",
    "registerCode",
    "status",
    "createdTimestamp",
    "updatedTimestamp",
    "expirationTimestamp",
    "verificationCode",
];

impl RegistrationCodeDocument {
    /// Build a new document for `code`. Does not touch any store.
    pub fn build(
        code: &str,
        holder: &HolderRecord,
        now: i64,
        expiration_timestamp: i64,
        is_global: bool,
        bounds: &CodeLengthBounds,
    ) -> Result<Self, Error> {
        bounds.check(code)?;

        let holder = holder
            .iter()
            .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            id: code.to_string(),
            register_code: code.to_string(),
            status: if is_global {
                CodeStatus::Global
            } else {
                CodeStatus::New
            },
            created_timestamp: now,
            updated_timestamp: now,
            expiration_timestamp,
            verification_code: None,
            holder,
        })
    }

    pub fn is_global(&self) -> bool {
        self.status == CodeStatus::Global
    }

    /// Mobile number of the holder, if the record carries a non-empty one
    pub fn mobile(&self) -> Option<&str> {
        holder_str(&self.holder, "mobile")
    }

    /// Email address of the holder, if the record carries a non-empty one
    pub fn email(&self) -> Option<&str> {
        holder_str(&self.holder, "email")
    }
}

/// A short-lived numeric code bound to one registration code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCodeDocument {
    pub id: String,
    pub verification_status: VerificationStatus,
    pub register_code: String,
    #[serde(rename = "registrationDocID")]
    pub registration_doc_id: String,
    pub created_timestamp: i64,
    pub expiration_timestamp: i64,
}

/// A pending holder record in an organization's upload queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub id: String,
    pub record: HolderRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Code already stored and delivered for this item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_code: Option<String>,
}

impl BatchItem {
    pub fn mobile(&self) -> Option<&str> {
        holder_str(&self.record, "mobile")
    }

    pub fn email(&self) -> Option<&str> {
        holder_str(&self.record, "email")
    }

    /// A code the organization supplied for this holder, if any
    pub fn supplied_code(&self) -> Option<&str> {
        holder_str(&self.record, "registerCode")
    }
}

/// Read a trimmed, non-empty string field from a holder record
pub fn holder_str<'a>(record: &'a HolderRecord, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
