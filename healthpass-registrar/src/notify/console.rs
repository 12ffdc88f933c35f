//! Console-based notifier for development

use super::Notifier;

/// Notifier that logs to console (for development)
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for ConsoleNotifier {
    fn send_sms(&self, destination: &str, text: &str) -> Result<(), String> {
        println!();
        println!("========================================");
        println!("  SMS TO: {}", destination);
        println!("  {}", text);
        println!("========================================");
        println!();

        tracing::info!(mobile = %destination, "SMS written to console");

        Ok(())
    }

    fn send_email(&self, destination: &str, subject: &str, body: &str) -> Result<(), String> {
        println!();
        println!("========================================");
        println!("  EMAIL TO: {}", destination);
        println!("  SUBJECT: {}", subject);
        println!();
        println!("{}", body);
        println!("========================================");
        println!();

        tracing::info!(email = %destination, "Email written to console");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageTemplate;
    use crate::notify::{dispatch_code, Channel};

    fn template() -> MessageTemplate {
        MessageTemplate {
            sms: "code {code}".into(),
            email_subject: "Your code".into(),
            email_body: "code {code}".into(),
        }
    }

    #[test]
    fn test_dispatch_prefers_sms() {
        let notifier = ConsoleNotifier::new();
        let channel =
            dispatch_code(&notifier, &template(), Some("+15550100"), Some("a@x.org"), "ABCDE")
                .unwrap();
        assert_eq!(channel, Channel::Sms);
    }

    #[test]
    fn test_dispatch_falls_back_to_email() {
        let notifier = ConsoleNotifier::new();
        let channel = dispatch_code(&notifier, &template(), None, Some("a@x.org"), "ABCDE").unwrap();
        assert_eq!(channel, Channel::Email);
    }

    #[test]
    fn test_dispatch_without_contact_fails() {
        let notifier = ConsoleNotifier::new();
        assert!(dispatch_code(&notifier, &template(), None, None, "ABCDE").is_err());
    }
}
