pub mod console;
pub mod dispatch;
pub mod notify;
pub mod smtp;

use std::sync::Arc;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::Message;
use thiserror::Error;

use crate::store::Store;

/// Used when neither `email_from_address` nor an SMTP username is configured.
pub const DEFAULT_FROM: &str = "mailings@localhost";

#[derive(Debug, Error)]
pub enum TransportError {
    /// The message could not be assembled: bad address or header injection.
    #[error("Invalid header: {0}")]
    BadHeader(String),
    /// The message was built but the transport refused or failed to deliver it.
    #[error("{0}")]
    Send(String),
}

/// Delivers one plain-text email. Implementations must not retry.
pub trait MailTransport: Send + Sync {
    fn send(&self, subject: &str, body: &str, from: &str, to: &str) -> Result<(), TransportError>;
}

/// Build a plain-text message, rejecting anything that would corrupt the headers.
pub fn build_message(
    subject: &str,
    body: &str,
    from: &str,
    to: &str,
) -> Result<Message, TransportError> {
    if subject.contains(|c| c == '\r' || c == '\n') {
        return Err(TransportError::BadHeader(
            "Header values can't contain newlines".into(),
        ));
    }
    let from: Mailbox = from
        .parse()
        .map_err(|e| TransportError::BadHeader(format!("Invalid from address: {}", e)))?;
    let to: Mailbox = to
        .parse()
        .map_err(|e| TransportError::BadHeader(format!("Invalid to address: {}", e)))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| TransportError::BadHeader(format!("Failed to build email: {}", e)))
}

/// Determine the "from" address from settings.
pub fn sender_address(store: &dyn Store) -> String {
    let from_addr = store.setting_get_or("email_from_address", "");
    if !from_addr.trim().is_empty() {
        return from_addr.trim().to_string();
    }
    let smtp_user = store.setting_get_or("email_smtp_username", "");
    if smtp_user.contains('@') {
        return smtp_user;
    }
    DEFAULT_FROM.to_string()
}

/// Picks the backend from the `email_backend` setting on every send, so
/// settings changes apply without a restart.
pub struct ConfiguredMailer {
    store: Arc<dyn Store>,
}

impl ConfiguredMailer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl MailTransport for ConfiguredMailer {
    fn send(&self, subject: &str, body: &str, from: &str, to: &str) -> Result<(), TransportError> {
        let backend = self.store.setting_get_or("email_backend", "console");
        match backend.as_str() {
            "smtp" => {
                let settings = self.store.setting_get_group("email_smtp_");
                smtp::SmtpMailer::from_settings(&settings)?.send(subject, body, from, to)
            }
            "console" => console::ConsoleMailer.send(subject, body, from, to),
            other => Err(TransportError::Send(format!(
                "Unknown email backend: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_message_accepts_plain_input() {
        let msg = build_message("Hello", "Body", "from@example.com", "to@example.com");
        assert!(msg.is_ok());
    }

    #[test]
    fn build_message_rejects_newline_in_subject() {
        let err = build_message("Hi\r\nBcc: x@evil.com", "Body", "from@example.com", "to@example.com")
            .unwrap_err();
        assert!(matches!(err, TransportError::BadHeader(_)));
        assert_eq!(err.to_string(), "Invalid header: Header values can't contain newlines");
    }

    #[test]
    fn build_message_rejects_bad_recipient() {
        let err = build_message("Hi", "Body", "from@example.com", "not-an-address").unwrap_err();
        assert!(matches!(err, TransportError::BadHeader(_)));
        assert!(err.to_string().contains("Invalid to address"));
    }
}
