//! Outgoing mail. The dispatch pipeline only sees [`MailTransport`]; which SMTP host it
//! talks to is decided per owner by a [`TransportFactory`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::delivery::Delivery;
use crate::domain::email_settings::EmailSettings;

pub mod smtp;

pub use smtp::SmtpTransportFactory;

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl From<&Delivery> for OutgoingEmail {
    fn from(delivery: &Delivery) -> Self {
        Self {
            to: delivery.to.to_string(),
            subject: delivery.subject.clone(),
            body: delivery.body.clone(),
        }
    }
}

/// Transient failures may succeed on a later attempt, permanent ones never will.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError>;
}

/// Builds the transport a dispatch run shares between its workers.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, settings: &EmailSettings) -> Result<Arc<dyn MailTransport>, TransportError>;
}
