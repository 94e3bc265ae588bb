use std::collections::HashMap;

use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};

use super::{build_message, MailTransport, TransportError};

/// STARTTLS relay configured from the `email_smtp_*` settings.
pub struct SmtpMailer {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl SmtpMailer {
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self, TransportError> {
        let host = settings.get("email_smtp_host").cloned().unwrap_or_default();
        let port: u16 = settings
            .get("email_smtp_port")
            .and_then(|v| v.parse().ok())
            .unwrap_or(587);
        let username = settings.get("email_smtp_username").cloned().unwrap_or_default();
        let password = settings.get("email_smtp_password").cloned().unwrap_or_default();

        if host.is_empty() {
            return Err(TransportError::Send("SMTP host not configured".into()));
        }

        Ok(Self {
            host,
            port,
            username,
            password,
        })
    }
}

impl MailTransport for SmtpMailer {
    fn send(&self, subject: &str, body: &str, from: &str, to: &str) -> Result<(), TransportError> {
        let email = build_message(subject, body, from, to)?;

        let mut builder = SmtpTransport::starttls_relay(&self.host)
            .map_err(|e| TransportError::Send(format!("SMTP relay error: {}", e)))?
            .port(self.port);
        if !self.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.username.clone(),
                self.password.clone(),
            ));
        }

        builder
            .build()
            .send(&email)
            .map_err(|e| TransportError::Send(format!("SMTP send error: {}", e)))?;
        Ok(())
    }
}
