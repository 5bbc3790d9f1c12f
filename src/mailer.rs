use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<()>;
}

/// Development fallback when no SMTP transport is configured: the link is
/// written to the log so the flow stays testable end to end.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<()> {
        info!(%to, %link, "no mail transport configured, verification link logged");
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .context("configure smtp relay")?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        let from = config
            .from_email
            .parse::<Mailbox>()
            .context("parse FROM_EMAIL")?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse::<Mailbox>().context("parse recipient address")?)
            .subject("Confirm your email")
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(format!("Click the link to confirm your email: {link}")),
                    )
                    .singlepart(
                        SinglePart::builder().header(ContentType::TEXT_HTML).body(format!(
                            "<p>Click the link to confirm your email:</p><p><a href=\"{link}\">{link}</a></p>"
                        )),
                    ),
            )
            .context("build verification message")?;
        self.transport
            .send(message)
            .await
            .context("send verification message")?;
        Ok(())
    }
}

pub fn from_config(smtp: Option<&SmtpConfig>) -> anyhow::Result<Arc<dyn Mailer>> {
    match smtp {
        Some(config) => Ok(Arc::new(SmtpMailer::new(config)?)),
        None => Ok(Arc::new(LogMailer)),
    }
}
