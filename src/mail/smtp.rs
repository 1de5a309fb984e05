use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use crate::domain::email_settings::EmailSettings;
use crate::mail::{MailTransport, OutgoingEmail, TransportError, TransportFactory};

/// SMTPS port, spoken over TLS from the first byte. Other ports upgrade with STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct SmtpTransportFactory {
    timeout: Duration,
}

impl SmtpTransportFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// 5xx replies and client-side misuse are permanent. 4xx replies, timeouts and
/// connection problems may clear up on their own.
fn classify(err: lettre::transport::smtp::Error) -> TransportError {
    if err.is_permanent() || err.is_client() {
        TransportError::Permanent(err.to_string())
    } else {
        TransportError::Transient(err.to_string())
    }
}

impl TransportFactory for SmtpTransportFactory {
    #[tracing::instrument(
        name = "Build SMTP transport",
        skip(self, settings),
        fields(
            smtp_host = %settings.smtp_host,
            smtp_port = settings.smtp_port,
            use_tls = settings.use_tls
        )
    )]
    fn connect(&self, settings: &EmailSettings) -> Result<Arc<dyn MailTransport>, TransportError> {
        let from_address: Address = settings.from_email.trim().parse().map_err(|err| {
            TransportError::Permanent(format!(
                "{} is not a valid sender address: {}",
                settings.from_email, err
            ))
        })?;
        let from = Mailbox::new(settings.from_name.clone(), from_address);

        let mut builder = if !settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.smtp_host.as_str())
        } else if settings.smtp_port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host).map_err(classify)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)
                .map_err(classify)?
        };

        builder = builder
            .port(settings.smtp_port)
            .timeout(Some(self.timeout));

        if !settings.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.smtp_user.clone(),
                settings.smtp_password.expose_secret().clone(),
            ));
        }

        Ok(Arc::new(SmtpMailer {
            transport: builder.build(),
            from,
        }))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        let to: Address = email.to.parse().map_err(|err| {
            TransportError::Permanent(format!("{} is not a valid recipient: {}", email.to, err))
        })?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, to))
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.body.clone())
            .map_err(|err| TransportError::Permanent(err.to_string()))?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
