use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::delivery::{Delivery, DeliveryStatus, NewDelivery};
use crate::domain::email_settings::EmailSettings;
use crate::domain::newsletter_type::NewsletterType;
use crate::domain::soft_delete::SoftDelete;
use crate::domain::subscriber::{Subscriber, SubscriberUpsert};
use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_status::SubscriberStatus;
use crate::pagination::PageSource;
use crate::storage::{
    DeliveryClaim, DeliveryFilter, DeliveryRepository, EmailSettingsRepository,
    NewsletterTypeRepository, RepositoryError, SubscriberFilter, SubscriberRepository,
    UpsertCounts,
};

/// In-process store with the same guarantees as [`crate::storage::PgStore`]: batch upserts are
/// all-or-nothing, delivery claims are atomic and terminal statuses are immutable.
///
/// Also exposes seeding helpers and fault switches so failure paths can be driven.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    fail_status_updates: AtomicBool,
}

#[derive(Default)]
struct State {
    newsletter_types: HashMap<Uuid, NewsletterType>,
    email_settings: HashMap<Uuid, EmailSettings>,
    subscribers: Vec<Subscriber>,
    deliveries: Vec<Delivery>,
    rejected_emails: HashSet<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_newsletter_type(&self, newsletter_type: NewsletterType) {
        self.state
            .lock()
            .await
            .newsletter_types
            .insert(newsletter_type.id, newsletter_type);
    }

    pub async fn insert_email_settings(&self, settings: EmailSettings) {
        self.state
            .lock()
            .await
            .email_settings
            .insert(settings.owner_id, settings);
    }

    pub async fn insert_subscriber(&self, subscriber: Subscriber) {
        self.state.lock().await.subscribers.push(subscriber);
    }

    pub async fn insert_delivery(&self, delivery: Delivery) {
        self.state.lock().await.deliveries.push(delivery);
    }

    pub async fn subscribers(&self) -> Vec<Subscriber> {
        self.state.lock().await.subscribers.clone()
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().await.deliveries.clone()
    }

    /// Makes every following delivery status write fail.
    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    /// Makes any batch containing `email` fail and roll back.
    pub async fn reject_upserts_for(&self, email: &SubscriberEmail) {
        self.state
            .lock()
            .await
            .rejected_emails
            .insert(email.as_ref().to_string());
    }
}

fn apply_upsert(
    subscribers: &mut Vec<Subscriber>,
    upsert: &SubscriberUpsert,
    now: DateTime<Utc>,
) -> bool {
    let position = subscribers.iter().position(|subscriber| {
        subscriber.is_live()
            && subscriber.owner_id == Some(upsert.owner_id)
            && subscriber.email == upsert.email
    });

    match position {
        Some(index) => {
            let merged = upsert.merge_into(&subscribers[index]);
            subscribers[index] = Subscriber {
                updated_at: now,
                ..merged
            };
            false
        }
        None => {
            subscribers.push(Subscriber {
                id: Uuid::new_v4(),
                email: upsert.email.clone(),
                name: upsert.name.clone(),
                phone: upsert.phone.clone(),
                status: SubscriberStatus::Active,
                owner_id: Some(upsert.owner_id),
                newsletter_type_id: Some(upsert.newsletter_type_id),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
            true
        }
    }
}

#[async_trait]
impl SubscriberRepository for InMemoryStore {
    async fn find_live_by_emails(
        &self,
        owner_id: Uuid,
        emails: &[SubscriberEmail],
    ) -> Result<Vec<Subscriber>, RepositoryError> {
        let state = self.state.lock().await;

        Ok(state
            .subscribers
            .iter()
            .filter(|subscriber| {
                subscriber.is_live()
                    && subscriber.owner_id == Some(owner_id)
                    && emails.contains(&subscriber.email)
            })
            .cloned()
            .collect())
    }

    async fn apply_upserts(
        &self,
        upserts: &[SubscriberUpsert],
    ) -> Result<UpsertCounts, RepositoryError> {
        let mut state = self.state.lock().await;
        let mut staged = state.subscribers.clone();
        let mut counts = UpsertCounts::default();
        let now = Utc::now();

        for (row, upsert) in upserts.iter().enumerate() {
            if state.rejected_emails.contains(upsert.email.as_ref()) {
                return Err(RepositoryError::BatchRolledBack {
                    row,
                    email: upsert.email.to_string(),
                    source: Box::new(RepositoryError::Unavailable(String::from(
                        "subscriber write rejected",
                    ))),
                });
            }

            if apply_upsert(&mut staged, upsert, now) {
                counts.inserted += 1;
            } else {
                counts.updated += 1;
            }
        }

        state.subscribers = staged;

        Ok(counts)
    }

    async fn list_active_recipients(
        &self,
        newsletter_type_id: Uuid,
    ) -> Result<Vec<Subscriber>, RepositoryError> {
        let state = self.state.lock().await;

        Ok(state
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.is_recipient_of(newsletter_type_id))
            .cloned()
            .collect())
    }

    async fn set_status(
        &self,
        owner_id: Uuid,
        subscriber_id: Uuid,
        status: SubscriberStatus,
    ) -> Result<Subscriber, RepositoryError> {
        let mut state = self.state.lock().await;
        let subscriber = state
            .subscribers
            .iter_mut()
            .find(|subscriber| {
                subscriber.id == subscriber_id
                    && subscriber.owner_id == Some(owner_id)
                    && subscriber.is_live()
            })
            .ok_or(RepositoryError::NotFound(subscriber_id))?;

        subscriber.status = status;
        subscriber.updated_at = Utc::now();

        Ok(subscriber.clone())
    }

    async fn soft_delete(
        &self,
        owner_id: Uuid,
        subscriber_id: Uuid,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let subscriber = state
            .subscribers
            .iter_mut()
            .find(|subscriber| {
                subscriber.id == subscriber_id
                    && subscriber.owner_id == Some(owner_id)
                    && subscriber.is_live()
            })
            .ok_or(RepositoryError::NotFound(subscriber_id))?;
        let now = Utc::now();

        subscriber.deleted_at = Some(now);
        subscriber.updated_at = now;

        Ok(())
    }
}

#[async_trait]
impl NewsletterTypeRepository for InMemoryStore {
    async fn find_live(&self, id: Uuid) -> Result<Option<NewsletterType>, RepositoryError> {
        let state = self.state.lock().await;

        Ok(state
            .newsletter_types
            .get(&id)
            .filter(|newsletter_type| newsletter_type.is_live())
            .cloned())
    }
}

#[async_trait]
impl EmailSettingsRepository for InMemoryStore {
    async fn find_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<EmailSettings>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .email_settings
            .get(&owner_id)
            .cloned())
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryStore {
    async fn claim(
        &self,
        delivery: &NewDelivery,
        stale_before: DateTime<Utc>,
    ) -> Result<DeliveryClaim, RepositoryError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let position = state
            .deliveries
            .iter()
            .position(|row| row.run_id == delivery.run_id && row.to == delivery.to);

        let claim = match position {
            Some(index) => {
                let row = &mut state.deliveries[index];

                if row.status.is_terminal() {
                    DeliveryClaim::Settled(row.clone())
                } else if row.is_stale(stale_before) {
                    row.updated_at = now;
                    DeliveryClaim::Reclaimed(row.clone())
                } else {
                    DeliveryClaim::InFlight(row.clone())
                }
            }
            None => {
                let row = delivery.clone().into_pending(Uuid::new_v4(), now);
                state.deliveries.push(row.clone());
                DeliveryClaim::Created(row)
            }
        };

        Ok(claim)
    }

    async fn renew(
        &self,
        delivery_id: Uuid,
        held_since: DateTime<Utc>,
    ) -> Result<Option<Delivery>, RepositoryError> {
        let mut state = self.state.lock().await;
        let renewed = state
            .deliveries
            .iter_mut()
            .find(|row| {
                row.id == delivery_id
                    && row.status == DeliveryStatus::Pending
                    && row.updated_at == held_since
            })
            .map(|row| {
                row.updated_at = Utc::now();
                row.clone()
            });

        Ok(renewed)
    }

    async fn update_status(
        &self,
        delivery_id: Uuid,
        status: &DeliveryStatus,
    ) -> Result<(), RepositoryError> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(String::from(
                "delivery status write rejected",
            )));
        }

        let mut state = self.state.lock().await;
        let row = state
            .deliveries
            .iter_mut()
            .find(|row| row.id == delivery_id)
            .ok_or(RepositoryError::NotFound(delivery_id))?;

        if !row.status.can_transition_to(status) {
            return Err(RepositoryError::TerminalState {
                id: delivery_id,
                state: row.status.state().as_str(),
            });
        }

        row.status = status.clone();
        row.updated_at = Utc::now();

        Ok(())
    }

    async fn mark_seen(&self, owner_id: Uuid, delivery_id: Uuid) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let row = state
            .deliveries
            .iter_mut()
            .find(|row| row.id == delivery_id && row.owner_id == owner_id)
            .ok_or(RepositoryError::NotFound(delivery_id))?;

        row.is_seen = true;
        row.updated_at = Utc::now();

        Ok(())
    }
}

#[async_trait]
impl PageSource<SubscriberFilter> for InMemoryStore {
    type Item = Subscriber;

    async fn count(&self, filter: &SubscriberFilter) -> Result<u64, RepositoryError> {
        let state = self.state.lock().await;

        Ok(state.subscribers.iter().filter(|s| filter.matches(s)).count() as u64)
    }

    async fn fetch(
        &self,
        filter: &SubscriberFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Subscriber>, RepositoryError> {
        let state = self.state.lock().await;

        Ok(state
            .subscribers
            .iter()
            .filter(|s| filter.matches(s))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PageSource<DeliveryFilter> for InMemoryStore {
    type Item = Delivery;

    async fn count(&self, filter: &DeliveryFilter) -> Result<u64, RepositoryError> {
        let state = self.state.lock().await;

        Ok(state.deliveries.iter().filter(|d| filter.matches(d)).count() as u64)
    }

    async fn fetch(
        &self,
        filter: &DeliveryFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Delivery>, RepositoryError> {
        let state = self.state.lock().await;

        Ok(state
            .deliveries
            .iter()
            .filter(|d| filter.matches(d))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
