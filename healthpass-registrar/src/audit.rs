//! Audit trail of code lifecycle events

/// What happened to a holder's code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CodeIssued,
    CodeConsumed,
    CodeRolledBack,
    CodeRetired,
    VerificationIssued,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CodeIssued => "code_issued",
            AuditAction::CodeConsumed => "code_consumed",
            AuditAction::CodeRolledBack => "code_rolled_back",
            AuditAction::CodeRetired => "code_retired",
            AuditAction::VerificationIssued => "verification_issued",
        }
    }
}

/// Trait for recording audit entries keyed by holder
pub trait AuditLog: Send + Sync {
    fn record(&self, entity: &str, holder_id: &str, action: AuditAction, detail: &str);
}

/// Emits audit entries on the `audit` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, entity: &str, holder_id: &str, action: AuditAction, detail: &str) {
        tracing::info!(
            target: "audit",
            entity = %entity,
            holder_id = %holder_id,
            action = action.as_str(),
            detail = %detail,
        );
    }
}
