use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::subscriber_email::SubscriberEmail;

/// Storage-level state of a delivery, without the failure payload. Used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

impl DeliveryState {
    pub fn parse(state: String) -> Result<DeliveryState, String> {
        match state.to_uppercase().as_str() {
            "PENDING" => Ok(DeliveryState::Pending),
            "SENT" => Ok(DeliveryState::Sent),
            "FAILED" => Ok(DeliveryState::Failed),
            _ => Err(format!("{} is not a valid delivery status", state)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "PENDING",
            DeliveryState::Sent => "SENT",
            DeliveryState::Failed => "FAILED",
        }
    }
}

impl AsRef<str> for DeliveryState {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// A sent delivery never carries an error and a failed one always does.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed { error: String },
}

impl DeliveryStatus {
    /// Rebuilds a status from its `status`/`error` storage columns.
    pub fn from_parts(status: &str, error: Option<String>) -> Result<DeliveryStatus, String> {
        match (DeliveryState::parse(status.to_string())?, error) {
            (DeliveryState::Pending, None) => Ok(DeliveryStatus::Pending),
            (DeliveryState::Sent, None) => Ok(DeliveryStatus::Sent),
            (DeliveryState::Failed, Some(error)) => Ok(DeliveryStatus::Failed { error }),
            (DeliveryState::Failed, None) => Err(String::from("failed delivery without error")),
            (state, Some(_)) => Err(format!("{} delivery carries an error", state.as_ref())),
        }
    }

    pub fn state(&self) -> DeliveryState {
        match self {
            DeliveryStatus::Pending => DeliveryState::Pending,
            DeliveryStatus::Sent => DeliveryState::Sent,
            DeliveryStatus::Failed { .. } => DeliveryState::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DeliveryStatus::Failed { error } => Some(error.as_str()),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }

    /// The only legal moves are PENDING -> SENT and PENDING -> FAILED.
    pub fn can_transition_to(&self, next: &DeliveryStatus) -> bool {
        matches!(self, DeliveryStatus::Pending) && next.is_terminal()
    }
}

/// One recipient's tracked send for a dispatch run.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: Uuid,
    pub run_id: Uuid,
    pub to: SubscriberEmail,
    pub subject: String,
    pub body: String,
    #[serde(flatten)]
    pub status: DeliveryStatus,
    pub is_seen: bool,
    pub newsletter_type_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// A PENDING row untouched since `stale_before` belongs to an abandoned run attempt.
    pub fn is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.updated_at < stale_before
    }
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub run_id: Uuid,
    pub to: SubscriberEmail,
    pub subject: String,
    pub body: String,
    pub newsletter_type_id: Option<Uuid>,
    pub owner_id: Uuid,
}

impl NewDelivery {
    pub fn into_pending(self, id: Uuid, now: DateTime<Utc>) -> Delivery {
        Delivery {
            id,
            run_id: self.run_id,
            to: self.to,
            subject: self.subject,
            body: self.body,
            status: DeliveryStatus::Pending,
            is_seen: false,
            newsletter_type_id: self.newsletter_type_id,
            owner_id: self.owner_id,
            created_at: now,
            updated_at: now,
        }
    }
}
