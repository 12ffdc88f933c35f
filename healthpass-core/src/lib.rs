//! Healthpass onboarding core
//!
//! Pure building blocks for holder onboarding:
//! - Registration and verification code documents as they are stored
//! - Random code generation
//! - Usability and expiration rules
//! - Holder identity rules selected by an organization's entity type

pub mod codes;
pub mod documents;
pub mod entity;
pub mod error;
pub mod validation;

pub use codes::{CodeGenerator, RandomCodeGenerator};
pub use documents::{
    BatchItem, CodeStatus, HolderRecord, RegistrationCodeDocument, VerificationCodeDocument,
    VerificationStatus,
};
pub use entity::{EntityRegistry, HolderIdentity};
pub use error::{Error, ErrorKind};
pub use validation::{CodeLengthBounds, Rejection};

/// Result type for healthpass-core operations
pub type Result<T> = std::result::Result<T, Error>;
