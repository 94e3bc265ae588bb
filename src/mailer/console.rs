use super::{build_message, MailTransport, TransportError};

/// Development backend: writes the formatted message to the log instead of
/// sending it. Header validation still applies.
pub struct ConsoleMailer;

impl MailTransport for ConsoleMailer {
    fn send(&self, subject: &str, body: &str, from: &str, to: &str) -> Result<(), TransportError> {
        let email = build_message(subject, body, from, to)?;
        log::info!(
            "[mail] console delivery to {}\n{}",
            to,
            String::from_utf8_lossy(&email.formatted())
        );
        Ok(())
    }
}
