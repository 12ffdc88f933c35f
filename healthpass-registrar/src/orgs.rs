//! Organization configuration provider
//!
//! Organization documents are resolved against the entity registry and the
//! engine defaults once, when they are loaded. Operations then work with the
//! resolved [`Organization`] and never look the entity type up again.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use healthpass_core::{CodeLengthBounds, EntityRegistry, HolderIdentity};

use crate::config::{MessageTemplate, OrganizationConfig, RegistrarConfig};
use crate::error::{RegistrarError, RegistrarResult};

/// An organization with its entity type and limits resolved
#[derive(Clone)]
pub struct Organization {
    pub id: String,
    pub identity: &'static dyn HolderIdentity,
    pub mfa_enabled: bool,
    pub notify_holders: bool,
    pub code_bounds: CodeLengthBounds,
    pub code_length: usize,
    pub batch_max_error_threshold: usize,
    pub registration_template: Option<MessageTemplate>,
    pub verification_template: Option<MessageTemplate>,
}

impl fmt::Debug for Organization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Organization")
            .field("id", &self.id)
            .field("entity_type", &self.identity.key())
            .field("mfa_enabled", &self.mfa_enabled)
            .field("notify_holders", &self.notify_holders)
            .field("code_bounds", &self.code_bounds)
            .field("code_length", &self.code_length)
            .field("batch_max_error_threshold", &self.batch_max_error_threshold)
            .finish()
    }
}

impl Organization {
    pub fn resolve(
        config: &OrganizationConfig,
        registry: &EntityRegistry,
        defaults: &RegistrarConfig,
    ) -> RegistrarResult<Self> {
        let identity = registry.resolve(&config.entity_type)?;
        let code_bounds = config.code_bounds.unwrap_or(defaults.code_bounds);
        let code_length = config.code_length.unwrap_or(defaults.code_length);

        if code_bounds.min > code_bounds.max {
            return Err(RegistrarError::Validation(format!(
                "organization {}: code bounds {}..{} are empty",
                config.id, code_bounds.min, code_bounds.max
            )));
        }
        code_bounds.check(&"x".repeat(code_length)).map_err(|_| {
            RegistrarError::Validation(format!(
                "organization {}: generated code length {} is outside {}..={}",
                config.id, code_length, code_bounds.min, code_bounds.max
            ))
        })?;

        if config.notify_holders && config.templates.registration.is_none() {
            return Err(RegistrarError::Validation(format!(
                "organization {} notifies holders but has no registration template",
                config.id
            )));
        }
        if config.mfa_enabled && config.templates.verification.is_none() {
            return Err(RegistrarError::Validation(format!(
                "organization {} enables MFA but has no verification template",
                config.id
            )));
        }

        Ok(Self {
            id: config.id.clone(),
            identity,
            mfa_enabled: config.mfa_enabled,
            notify_holders: config.notify_holders,
            code_bounds,
            code_length,
            batch_max_error_threshold: config
                .batch_max_error_threshold
                .unwrap_or(defaults.batch_max_error_threshold),
            registration_template: config.templates.registration.clone(),
            verification_template: config.templates.verification.clone(),
        })
    }
}

/// Trait for resolving organization ids to their configuration
pub trait OrganizationDirectory: Send + Sync {
    fn organization(&self, id: &str) -> RegistrarResult<Option<Organization>>;
}

/// In-memory organization directory
pub struct InMemoryOrganizationDirectory {
    orgs: RwLock<HashMap<String, Organization>>,
}

impl InMemoryOrganizationDirectory {
    pub fn new() -> Self {
        Self {
            orgs: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve and load a set of organization documents
    pub fn from_configs(
        configs: &[OrganizationConfig],
        registry: &EntityRegistry,
        defaults: &RegistrarConfig,
    ) -> RegistrarResult<Self> {
        let directory = Self::new();
        for config in configs {
            directory.insert(Organization::resolve(config, registry, defaults)?)?;
        }
        Ok(directory)
    }

    /// Load organization documents from a JSON array
    pub fn from_json(
        json: &str,
        registry: &EntityRegistry,
        defaults: &RegistrarConfig,
    ) -> RegistrarResult<Self> {
        let configs: Vec<OrganizationConfig> = serde_json::from_str(json)
            .map_err(|e| RegistrarError::Validation(format!("invalid organization config: {}", e)))?;
        Self::from_configs(&configs, registry, defaults)
    }

    pub fn insert(&self, org: Organization) -> RegistrarResult<()> {
        tracing::debug!(organization = %org.id, entity_type = org.identity.key(), "Loaded organization");
        self.orgs
            .write()
            .map_err(|_| RegistrarError::Internal("organization directory lock poisoned".into()))?
            .insert(org.id.clone(), org);
        Ok(())
    }
}

impl Default for InMemoryOrganizationDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl OrganizationDirectory for InMemoryOrganizationDirectory {
    fn organization(&self, id: &str) -> RegistrarResult<Option<Organization>> {
        Ok(self
            .orgs
            .read()
            .map_err(|_| RegistrarError::Internal("organization directory lock poisoned".into()))?
            .get(id)
            .cloned())
    }
}
