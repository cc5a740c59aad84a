// SMTP delivery of alert emails
// Uses an implicit-TLS relay (port 465 by default) with sender credentials.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::info;

use crate::monitor::config::MailSettings;
use crate::monitor::error::DeliveryError;
use crate::monitor::notify::{AlertMessage, Notifier};
use crate::monitor::snapshot::ListingItem;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EmailNotifier {
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    /// Validate addresses and build the relay transport. No connection is
    /// opened until the first alert is sent.
    pub fn new(settings: &MailSettings) -> Result<Self, DeliveryError> {
        let from = parse_mailbox(&settings.from)?;
        let to = settings
            .to
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>, _>>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?
            .port(settings.smtp_port)
            .credentials(SmtpCredentials::new(
                settings.from.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self { from, to, transport })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, items: &[ListingItem]) -> Result<(), DeliveryError> {
        let alert = AlertMessage::now(items);
        let message = build_message(&self.from, &self.to, &alert)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        info!(count = items.len(), recipients = self.to.len(), "Alert email sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address.parse::<Mailbox>().map_err(|e| DeliveryError::Address {
        address: address.to_string(),
        cause: e.to_string(),
    })
}

fn build_message(
    from: &Mailbox,
    to: &[Mailbox],
    alert: &AlertMessage,
) -> Result<Message, DeliveryError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(alert.subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for recipient in to {
        builder = builder.to(recipient.clone());
    }
    builder
        .body(alert.body.clone())
        .map_err(|e| DeliveryError::Compose(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_address() {
        let err = parse_mailbox("not an address").unwrap_err();
        assert!(matches!(err, DeliveryError::Address { .. }));
    }

    #[test]
    fn message_addresses_every_recipient() {
        let from = parse_mailbox("alerts@example.com").unwrap();
        let to = vec![
            parse_mailbox("a@example.com").unwrap(),
            parse_mailbox("b@example.com").unwrap(),
        ];
        let alert = AlertMessage {
            subject: "New Companies Alert - 17-Oct 03:04 PM".to_string(),
            body: "1. Initech\n".to_string(),
        };

        let message = build_message(&from, &to, &alert).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: alerts@example.com"));
        assert!(raw.contains("a@example.com"));
        assert!(raw.contains("b@example.com"));
        assert!(raw.contains("Subject: New Companies Alert - 17-Oct 03:04 PM"));
        assert!(raw.contains("1. Initech"));
    }

    #[test]
    fn message_without_recipients_fails_to_compose() {
        let from = parse_mailbox("alerts@example.com").unwrap();
        let alert = AlertMessage {
            subject: "s".to_string(),
            body: "b".to_string(),
        };
        let err = build_message(&from, &[], &alert).unwrap_err();
        assert!(matches!(err, DeliveryError::Compose(_)));
    }
}
