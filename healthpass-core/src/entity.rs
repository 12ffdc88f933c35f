//! Holder identity rules per organization entity type
//!
//! Each organization declares an entity type. The type selects how the
//! holder id is found in a source record, which fields a record must carry,
//! and what a well-formed holder id looks like. Types are resolved once when
//! the organization configuration is loaded.

use std::collections::HashMap;

use crate::documents::{holder_str, HolderRecord};
use crate::error::Error;

/// Capability set selected by an entity type
pub trait HolderIdentity: Send + Sync {
    /// Registry key of this entity type
    fn key(&self) -> &'static str;

    /// Field holding the holder id in a source record
    fn holder_id_field(&self) -> &'static str;

    /// Fields every source record must carry
    fn required_fields(&self) -> &'static [&'static str];

    /// Check the shape of a holder id
    fn validate_holder_id(&self, holder_id: &str) -> Result<(), Error>;

    /// Extract and validate the holder id of a source record
    fn holder_id(&self, record: &HolderRecord) -> Result<String, Error> {
        let field = self.holder_id_field();
        let holder_id = holder_str(record, field).ok_or_else(|| Error::MissingField(field.into()))?;
        self.validate_holder_id(holder_id)?;
        Ok(holder_id.to_string())
    }

    /// Check every required field is present and non-empty
    fn check_required(&self, record: &HolderRecord) -> Result<(), Error> {
        for field in self.required_fields() {
            let present = match record.get(*field) {
                Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
                Some(serde_json::Value::Null) | None => false,
                Some(_) => true,
            };
            if !present {
                return Err(Error::MissingField((*field).into()));
            }
        }
        Ok(())
    }
}

/// Generic holders identified by an organization-assigned id
pub struct StandardHolders;

impl HolderIdentity for StandardHolders {
    fn key(&self) -> &'static str {
        "standard"
    }

    fn holder_id_field(&self) -> &'static str {
        "holderId"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["holderId"]
    }

    fn validate_holder_id(&self, holder_id: &str) -> Result<(), Error> {
        if holder_id.len() > 128 {
            return Err(Error::InvalidHolderId {
                holder_id: holder_id.into(),
                reason: "longer than 128 characters".into(),
            });
        }
        Ok(())
    }
}

/// Employees identified by an employee number, reachable by email
pub struct EmployeeHolders;

impl HolderIdentity for EmployeeHolders {
    fn key(&self) -> &'static str {
        "employee"
    }

    fn holder_id_field(&self) -> &'static str {
        "employeeId"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["employeeId", "name", "email"]
    }

    fn validate_holder_id(&self, holder_id: &str) -> Result<(), Error> {
        if !holder_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidHolderId {
                holder_id: holder_id.into(),
                reason: "only letters, digits, '-' and '_' are allowed".into(),
            });
        }
        Ok(())
    }
}

/// Maps entity-type keys to their statically known identity rules
pub struct EntityRegistry {
    types: HashMap<&'static str, &'static dyn HolderIdentity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registry with the built-in entity types
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(&StandardHolders);
        registry.register(&EmployeeHolders);
        registry
    }

    pub fn register(&mut self, identity: &'static dyn HolderIdentity) {
        self.types.insert(identity.key(), identity);
    }

    pub fn resolve(&self, key: &str) -> Result<&'static dyn HolderIdentity, Error> {
        self.types
            .get(key)
            .copied()
            .ok_or_else(|| Error::UnknownEntityType(key.to_string()))
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
