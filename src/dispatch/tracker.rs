use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::delivery::{Delivery, DeliveryStatus, NewDelivery};
use crate::storage::{DeliveryClaim, DeliveryRepository, RepositoryError};

/// Drives deliveries through PENDING -> SENT | FAILED. Retries never pass through here.
#[derive(Clone)]
pub struct DeliveryTracker {
    deliveries: Arc<dyn DeliveryRepository>,
    stale_after: chrono::Duration,
}

impl DeliveryTracker {
    pub fn new(deliveries: Arc<dyn DeliveryRepository>, stale_after: chrono::Duration) -> Self {
        Self {
            deliveries,
            stale_after,
        }
    }

    /// Claims the PENDING row for one recipient of a run.
    pub async fn enqueue(&self, delivery: &NewDelivery) -> Result<DeliveryClaim, RepositoryError> {
        let stale_before = Utc::now() - self.stale_after;

        self.deliveries.claim(delivery, stale_before).await
    }

    /// Re-asserts ownership of a claimed row right before a send attempt. `None` means the
    /// row was reclaimed by another run or settled and must not be sent from here.
    pub async fn renew(&self, delivery: &Delivery) -> Result<Option<Delivery>, RepositoryError> {
        self.deliveries
            .renew(delivery.id, delivery.updated_at)
            .await
    }

    #[tracing::instrument(name = "Record delivery sent", skip(self))]
    pub async fn record_sent(&self, delivery_id: Uuid) -> Result<(), RepositoryError> {
        self.deliveries
            .update_status(delivery_id, &DeliveryStatus::Sent)
            .await
    }

    #[tracing::instrument(name = "Record delivery failed", skip(self))]
    pub async fn record_failed(
        &self,
        delivery_id: Uuid,
        error: String,
    ) -> Result<(), RepositoryError> {
        self.deliveries
            .update_status(delivery_id, &DeliveryStatus::Failed { error })
            .await
    }

    /// Flags a delivery as seen by the recipient. The status is left alone.
    #[tracing::instrument(name = "Mark delivery seen", skip(self))]
    pub async fn mark_seen(&self, owner_id: Uuid, delivery_id: Uuid) -> Result<(), RepositoryError> {
        self.deliveries.mark_seen(owner_id, delivery_id).await
    }
}
