//! SMTP delivery for alert emails.

use anyhow::{Context, Result};
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

use super::templates::RenderedEmail;

type Transport = AsyncSmtpTransport<Tokio1Executor>;

/// Sends rendered alert emails through one SMTP relay
#[derive(Clone)]
pub struct SmtpMailer {
    transport: Transport,
    from: Mailbox,
}

impl SmtpMailer {
    /// `None` when SMTP is not configured or the relay settings are unusable
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }

        match Self::build(config) {
            Ok(mailer) => Some(mailer),
            Err(e) => {
                tracing::error!(error = %e, "Invalid SMTP configuration, alert emails disabled");
                None
            }
        }
    }

    fn build(config: &EmailConfig) -> Result<Self> {
        let host = config.smtp_host.as_deref().unwrap_or_default();
        let address = config.from_address.as_deref().unwrap_or_default();

        let from = Mailbox::new(
            Some(config.from_name.clone()),
            address
                .parse()
                .with_context(|| format!("Invalid from address: {}", address))?,
        );

        let builder = if config.smtp_tls {
            Transport::relay(host)?
        } else {
            Transport::builder_dangerous(host)
        };
        let builder = builder.port(config.smtp_port);
        let builder = match (&config.smtp_username, &config.smtp_password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Deliver one email as a text/HTML alternative
    pub async fn send(&self, to: &str, email: &RenderedEmail) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().with_context(|| format!("Invalid recipient: {}", to))?)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))?;

        self.transport.send(message).await?;
        tracing::info!(to = %to, subject = %email.subject, "Alert email delivered");
        Ok(())
    }
}
