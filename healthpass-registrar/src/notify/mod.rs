//! Holder notification abstractions

pub mod console;
pub mod smtp;

pub use console::ConsoleNotifier;
pub use smtp::{SmtpConfig, SmtpNotifier};

use serde::Serialize;

use crate::config::MessageTemplate;

/// Trait for delivering codes to holders. Failures are reported synchronously.
pub trait Notifier: Send + Sync {
    /// Send a text message to a mobile number
    fn send_sms(&self, destination: &str, text: &str) -> Result<(), String>;

    /// Send an email
    fn send_email(&self, destination: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Allow using Box<dyn Notifier> as a Notifier
impl Notifier for Box<dyn Notifier> {
    fn send_sms(&self, destination: &str, text: &str) -> Result<(), String> {
        (**self).send_sms(destination, text)
    }

    fn send_email(&self, destination: &str, subject: &str, body: &str) -> Result<(), String> {
        (**self).send_email(destination, subject, body)
    }
}

/// Channel a code was delivered over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
}

/// Send `code` by SMS when a mobile number is known, otherwise by email
pub fn dispatch_code(
    notifier: &dyn Notifier,
    template: &MessageTemplate,
    mobile: Option<&str>,
    email: Option<&str>,
    code: &str,
) -> Result<Channel, String> {
    match (mobile, email) {
        (Some(mobile), _) => notifier
            .send_sms(mobile, &template.sms_text(code))
            .map(|()| Channel::Sms),
        (None, Some(email)) => notifier
            .send_email(email, &template.email_subject(code), &template.email_body(code))
            .map(|()| Channel::Email),
        (None, None) => Err("holder has neither a mobile number nor an email address".to_string()),
    }
}
