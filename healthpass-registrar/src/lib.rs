//! Healthpass Registrar
//!
//! Registration and verification code lifecycle for holder onboarding,
//! with bulk pre-registration of holders uploaded by an organization.

pub mod audit;
pub mod batch;
pub mod config;
pub mod conflict;
pub mod error;
pub mod notify;
pub mod onboarding;
pub mod orgs;
pub mod queue;
pub mod registration;
pub mod response;
pub mod store;
pub mod verification;

pub use audit::{AuditAction, AuditLog, TracingAuditLog};
pub use batch::{BatchProcessor, BatchReport, NotificationParams};
pub use config::{MessageTemplate, NotificationTemplates, OrganizationConfig, RegistrarConfig};
pub use conflict::ConflictResolver;
pub use error::{RegistrarError, RegistrarResult};
pub use notify::{dispatch_code, Channel, ConsoleNotifier, Notifier, SmtpConfig, SmtpNotifier};
pub use onboarding::{Registrar, RegistrationStart};
pub use orgs::{InMemoryOrganizationDirectory, Organization, OrganizationDirectory};
pub use queue::StoreBatchQueue;
pub use registration::{CodeCheck, RegistrationCodes};
pub use response::ApiResponse;
pub use store::{
    DocumentStore, DocumentStoreExt, InMemoryDocumentStore, Revision, Selector,
    SqliteDocumentStore, StoreError, StoredDocument,
};
pub use verification::{IssuedVerification, VerificationCodes};
