use accord_core::Notifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::config::SmtpSettings;

/// Delivers notifications through an SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("transport", &"<AsyncSmtpTransport>")
            .finish()
    }
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let builder = if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .with_context(|| format!("invalid SMTP relay {}", settings.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        let builder = builder.port(settings.port);
        let builder = match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        let message = build_message(from, to, subject, body)?;
        let response = self
            .transport
            .send(message)
            .await
            .with_context(|| format!("SMTP delivery to {to} failed"))?;
        debug!(code = %response.code(), "smtp accepted message");
        info!(recipient = to, "notification sent");

        Ok(())
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        info!(from, to, subject, "notification not delivered (no SMTP relay configured)");
        debug!(body, "undelivered notification body");
        Ok(())
    }
}

fn build_message(from: &str, to: &str, subject: &str, body: &str) -> Result<Message> {
    let from: Mailbox = from
        .parse()
        .with_context(|| format!("invalid sender address '{from}'"))?;
    let to: Mailbox = to
        .parse()
        .with_context(|| format!("invalid recipient address '{to}'"))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .body(body.to_string())
        .context("failed to build email")
}
