//! Repository interfaces the engine is written against, plus the Postgres and
//! in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::delivery::{Delivery, DeliveryState, DeliveryStatus, NewDelivery};
use crate::domain::email_settings::EmailSettings;
use crate::domain::newsletter_type::NewsletterType;
use crate::domain::soft_delete::SoftDelete;
use crate::domain::subscriber::{Subscriber, SubscriberUpsert};
use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_status::SubscriberStatus;
use crate::pagination::PageSource;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("Record {0} was not found.")]
    NotFound(Uuid),
    #[error("Delivery {id} already reached the terminal state {state}.")]
    TerminalState { id: Uuid, state: &'static str },
    #[error("Stored row is malformed: {0}")]
    Malformed(String),
    #[error("Subscriber batch rolled back at row {row} ({email}).")]
    BatchRolledBack {
        row: usize,
        email: String,
        #[source]
        source: Box<RepositoryError>,
    },
    #[error("Storage is unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Outcome of claiming the delivery slot for one `(run, recipient)` pair.
#[derive(Debug, Clone)]
pub enum DeliveryClaim {
    /// A fresh PENDING row was created for this caller.
    Created(Delivery),
    /// A stale PENDING row was taken over by this caller.
    Reclaimed(Delivery),
    /// Another worker holds a fresh PENDING row.
    InFlight(Delivery),
    /// The row already reached SENT or FAILED.
    Settled(Delivery),
}

impl DeliveryClaim {
    pub fn delivery(&self) -> &Delivery {
        match self {
            DeliveryClaim::Created(delivery)
            | DeliveryClaim::Reclaimed(delivery)
            | DeliveryClaim::InFlight(delivery)
            | DeliveryClaim::Settled(delivery) => delivery,
        }
    }

    /// The caller owns the row and must drive it to a terminal state.
    pub fn is_owned(&self) -> bool {
        matches!(self, DeliveryClaim::Created(_) | DeliveryClaim::Reclaimed(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberFilter {
    pub owner_id: Option<Uuid>,
    pub newsletter_type_id: Option<Uuid>,
    pub status: Option<SubscriberStatus>,
}

impl SubscriberFilter {
    pub fn matches(&self, subscriber: &Subscriber) -> bool {
        subscriber.is_live()
            && self
                .owner_id
                .map_or(true, |owner| subscriber.owner_id == Some(owner))
            && self
                .newsletter_type_id
                .map_or(true, |id| subscriber.newsletter_type_id == Some(id))
            && self.status.map_or(true, |status| subscriber.status == status)
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFilter {
    pub owner_id: Option<Uuid>,
    pub newsletter_type_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub status: Option<DeliveryState>,
}

impl DeliveryFilter {
    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.owner_id.map_or(true, |owner| delivery.owner_id == owner)
            && self
                .newsletter_type_id
                .map_or(true, |id| delivery.newsletter_type_id == Some(id))
            && self.run_id.map_or(true, |run| delivery.run_id == run)
            && self.status.map_or(true, |state| delivery.status.state() == state)
    }
}

#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// Live subscribers of `owner_id` whose email is one of `emails`.
    async fn find_live_by_emails(
        &self,
        owner_id: Uuid,
        emails: &[SubscriberEmail],
    ) -> Result<Vec<Subscriber>, RepositoryError>;

    /// Applies every upsert or none of them.
    async fn apply_upserts(
        &self,
        upserts: &[SubscriberUpsert],
    ) -> Result<UpsertCounts, RepositoryError>;

    async fn list_active_recipients(
        &self,
        newsletter_type_id: Uuid,
    ) -> Result<Vec<Subscriber>, RepositoryError>;

    async fn set_status(
        &self,
        owner_id: Uuid,
        subscriber_id: Uuid,
        status: SubscriberStatus,
    ) -> Result<Subscriber, RepositoryError>;

    async fn soft_delete(&self, owner_id: Uuid, subscriber_id: Uuid)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NewsletterTypeRepository: Send + Sync {
    async fn find_live(&self, id: Uuid) -> Result<Option<NewsletterType>, RepositoryError>;
}

#[async_trait]
pub trait EmailSettingsRepository: Send + Sync {
    async fn find_for_owner(&self, owner_id: Uuid)
        -> Result<Option<EmailSettings>, RepositoryError>;
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Atomically creates the PENDING row for `(run_id, to)` unless one exists. A PENDING row
    /// last touched before `stale_before` is handed over to the caller.
    async fn claim(
        &self,
        delivery: &NewDelivery,
        stale_before: DateTime<Utc>,
    ) -> Result<DeliveryClaim, RepositoryError>;

    /// Touches a PENDING row the caller still holds, i.e. whose `updated_at` is still
    /// `held_since`. Returns the refreshed row, or `None` once another claim took it over or
    /// it was settled.
    async fn renew(
        &self,
        delivery_id: Uuid,
        held_since: DateTime<Utc>,
    ) -> Result<Option<Delivery>, RepositoryError>;

    /// Moves a PENDING row to `status`. Fails with [`RepositoryError::TerminalState`] when the
    /// row is no longer PENDING.
    async fn update_status(
        &self,
        delivery_id: Uuid,
        status: &DeliveryStatus,
    ) -> Result<(), RepositoryError>;

    async fn mark_seen(&self, owner_id: Uuid, delivery_id: Uuid) -> Result<(), RepositoryError>;
}

/// Everything the engine needs from one storage backend.
pub trait Store:
    SubscriberRepository
    + NewsletterTypeRepository
    + EmailSettingsRepository
    + DeliveryRepository
    + PageSource<SubscriberFilter, Item = Subscriber>
    + PageSource<DeliveryFilter, Item = Delivery>
{
}

impl<T> Store for T where
    T: SubscriberRepository
        + NewsletterTypeRepository
        + EmailSettingsRepository
        + DeliveryRepository
        + PageSource<SubscriberFilter, Item = Subscriber>
        + PageSource<DeliveryFilter, Item = Delivery>
{
}
