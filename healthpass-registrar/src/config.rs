//! Registrar configuration

use healthpass_core::CodeLengthBounds;
use serde::Deserialize;

/// Engine-wide settings, passed explicitly into every component
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Length of generated registration codes
    pub code_length: usize,

    /// Accepted registration code lengths, unless an organization overrides them
    pub code_bounds: CodeLengthBounds,

    /// Attempts at allocating an unused verification code before giving up
    pub verification_retry_limit: u32,

    /// Lifetime of a verification code
    pub verification_ttl_minutes: i64,

    /// Lifetime of a registration code created by a batch or single issue
    pub registration_ttl_days: i64,

    /// Failures after which a batch is abandoned
    pub batch_max_error_threshold: usize,

    /// Upper bound on documents returned by a single query
    pub query_limit: usize,

    /// SQLite database file used by the binary
    pub database_path: String,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            code_length: 10,
            code_bounds: CodeLengthBounds::default(),
            verification_retry_limit: 3,
            verification_ttl_minutes: 10,
            registration_ttl_days: 30,
            batch_max_error_threshold: 20,
            query_limit: 200,
            database_path: "healthpass.db".to_string(),
        }
    }
}

impl RegistrarConfig {
    /// Create config from environment variables, falling back to defaults
    ///
    /// - HEALTHPASS_CODE_LENGTH
    /// - HEALTHPASS_CODE_MIN_LENGTH / HEALTHPASS_CODE_MAX_LENGTH
    /// - HEALTHPASS_VERIFICATION_RETRY_LIMIT
    /// - HEALTHPASS_VERIFICATION_TTL_MINUTES
    /// - HEALTHPASS_REGISTRATION_TTL_DAYS
    /// - HEALTHPASS_BATCH_MAX_ERROR_THRESHOLD
    /// - HEALTHPASS_QUERY_LIMIT
    /// - HEALTHPASS_DATABASE_PATH
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            code_length: parsed("HEALTHPASS_CODE_LENGTH", defaults.code_length),
            code_bounds: CodeLengthBounds::new(
                parsed("HEALTHPASS_CODE_MIN_LENGTH", defaults.code_bounds.min),
                parsed("HEALTHPASS_CODE_MAX_LENGTH", defaults.code_bounds.max),
            ),
            verification_retry_limit: parsed(
                "HEALTHPASS_VERIFICATION_RETRY_LIMIT",
                defaults.verification_retry_limit,
            ),
            verification_ttl_minutes: parsed(
                "HEALTHPASS_VERIFICATION_TTL_MINUTES",
                defaults.verification_ttl_minutes,
            ),
            registration_ttl_days: parsed(
                "HEALTHPASS_REGISTRATION_TTL_DAYS",
                defaults.registration_ttl_days,
            ),
            batch_max_error_threshold: parsed(
                "HEALTHPASS_BATCH_MAX_ERROR_THRESHOLD",
                defaults.batch_max_error_threshold,
            ),
            query_limit: parsed("HEALTHPASS_QUERY_LIMIT", defaults.query_limit),
            database_path: std::env::var("HEALTHPASS_DATABASE_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.database_path),
        }
    }

    pub fn verification_ttl_seconds(&self) -> i64 {
        self.verification_ttl_minutes * 60
    }

    pub fn registration_ttl_seconds(&self) -> i64 {
        self.registration_ttl_days * 24 * 60 * 60
    }
}

/// Text sent to a holder over either channel. `{code}` is replaced by the code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub sms: String,
    pub email_subject: String,
    pub email_body: String,
}

impl MessageTemplate {
    pub fn sms_text(&self, code: &str) -> String {
        self.sms.replace("{code}", code)
    }

    pub fn email_subject(&self, code: &str) -> String {
        self.email_subject.replace("{code}", code)
    }

    pub fn email_body(&self, code: &str) -> String {
        self.email_body.replace("{code}", code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplates {
    /// Sent when a registration code is issued
    pub registration: Option<MessageTemplate>,
    /// Sent when an MFA verification code is issued
    pub verification: Option<MessageTemplate>,
}

/// Organization configuration document as supplied by the config provider
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationConfig {
    pub id: String,

    #[serde(default = "default_entity_type")]
    pub entity_type: String,

    /// Require a verification code on top of the registration code
    #[serde(default)]
    pub mfa_enabled: bool,

    /// Send registration codes to holders when they are issued
    #[serde(default)]
    pub notify_holders: bool,

    #[serde(default)]
    pub code_bounds: Option<CodeLengthBounds>,

    #[serde(default)]
    pub code_length: Option<usize>,

    #[serde(default)]
    pub batch_max_error_threshold: Option<usize>,

    #[serde(default)]
    pub templates: NotificationTemplates,
}

fn default_entity_type() -> String {
    "standard".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = RegistrarConfig::default();
        assert_eq!(config.batch_max_error_threshold, 20);
        assert_eq!(config.code_bounds, CodeLengthBounds::new(5, 64));
        assert_eq!(config.verification_ttl_seconds(), 600);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: RegistrarConfig =
            serde_json::from_value(json!({ "verification_retry_limit": 7 })).unwrap();
        assert_eq!(config.verification_retry_limit, 7);
        assert_eq!(config.code_length, 10);
    }

    #[test]
    fn test_organization_config_document() {
        let org: OrganizationConfig = serde_json::from_value(json!({
            "id": "acme",
            "mfaEnabled": true,
            "codeBounds": { "min": 6, "max": 12 },
            "templates": {
                "verification": {
                    "sms": "Your code is {code}",
                    "emailSubject": "Verify",
                    "emailBody": "Code: {code}"
                }
            }
        }))
        .unwrap();

        assert_eq!(org.entity_type, "standard");
        assert!(org.mfa_enabled);
        assert!(!org.notify_holders);
        assert_eq!(org.code_bounds, Some(CodeLengthBounds::new(6, 12)));
        let template = org.templates.verification.unwrap();
        assert_eq!(template.sms_text("12345678"), "Your code is 12345678");
    }
}
