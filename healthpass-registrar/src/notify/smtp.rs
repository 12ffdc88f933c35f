//! Holder notification over SMTP. SMS goes through an email-to-SMS gateway.

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};

use super::Notifier;

const DEFAULT_PORT: u16 = 465;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender mailbox, either `addr@host` or `Name <addr@host>`
    pub sender: String,
    /// SMS is mailed to `<digits>@<domain>` when set
    pub sms_gateway_domain: Option<String>,
}

impl SmtpConfig {
    /// Read `SMTP_HOST`, `SMTP_USERNAME`, `SMTP_PASSWORD` and `SMTP_SENDER`.
    /// `SMTP_PORT` and `SMTP_SMS_GATEWAY_DOMAIN` are optional.
    ///
    /// `None` when any required variable is unset or empty.
    pub fn from_env() -> Option<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|s| !s.trim().is_empty());

        Some(Self {
            host: var("SMTP_HOST")?,
            port: var("SMTP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            username: var("SMTP_USERNAME")?,
            password: var("SMTP_PASSWORD")?,
            sender: var("SMTP_SENDER")?,
            sms_gateway_domain: var("SMTP_SMS_GATEWAY_DOMAIN"),
        })
    }
}

/// Gateway address for a mobile number: digits only, at the gateway domain
fn sms_gateway_address(mobile: &str, domain: &str) -> Result<String, String> {
    let digits: String = mobile.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(format!("Invalid mobile number: {}", mobile));
    }
    Ok(format!("{}@{}", digits, domain))
}

pub struct SmtpNotifier {
    transport: SmtpTransport,
    sender: Mailbox,
    sms_gateway_domain: Option<String>,
}

impl SmtpNotifier {
    /// Connect to the relay. Fails early on a bad sender or an unreachable host.
    pub fn new(config: SmtpConfig) -> Result<Self, String> {
        let sender: Mailbox = config
            .sender
            .parse()
            .map_err(|e| format!("Invalid sender {}: {}", config.sender, e))?;

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| format!("Could not configure relay {}: {}", config.host, e))?
            .port(config.port)
            .credentials(Credentials::new(config.username, config.password))
            .build();

        transport
            .test_connection()
            .map_err(|e| format!("Relay {} unreachable: {}", config.host, e))?;

        tracing::info!(host = %config.host, port = config.port, sender = %sender, "SMTP notifier ready");

        Ok(Self {
            transport,
            sender,
            sms_gateway_domain: config.sms_gateway_domain,
        })
    }

    fn deliver(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let recipient: Mailbox = to
            .parse()
            .map_err(|e| format!("Invalid recipient {}: {}", to, e))?;

        let message = Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| format!("Could not build message for {}: {}", to, e))?;

        self.transport
            .send(&message)
            .map(|_| ())
            .map_err(|e| format!("Relay rejected message for {}: {}", to, e))
    }
}

impl Notifier for SmtpNotifier {
    fn send_sms(&self, destination: &str, text: &str) -> Result<(), String> {
        let domain = self
            .sms_gateway_domain
            .as_deref()
            .ok_or_else(|| "SMS delivery is not configured".to_string())?;
        let address = sms_gateway_address(destination, domain)?;

        self.deliver(&address, "", text)?;
        tracing::info!(mobile = %destination, "SMS sent through email gateway");
        Ok(())
    }

    fn send_email(&self, destination: &str, subject: &str, body: &str) -> Result<(), String> {
        self.deliver(destination, subject, body)?;
        tracing::info!(email = %destination, "Email sent");
        Ok(())
    }
}
