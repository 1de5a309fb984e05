use std::sync::Arc;

use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::dispatch::{
    CancelToken, DeliveryTracker, DispatchError, DispatchRequest, DispatchScheduler,
    DispatchSummary,
};
use crate::domain::delivery::Delivery;
use crate::domain::subscriber::Subscriber;
use crate::domain::subscriber_status::SubscriberStatus;
use crate::import::{ImportError, ImportOutcome, RawSubscriberRecord, SubscriberImporter};
use crate::mail::TransportFactory;
use crate::pagination::{paginate, Page, PageRequest, PageSource};
use crate::storage::{
    DeliveryFilter, RepositoryError, Store, SubscriberFilter, SubscriberRepository,
};

/// Wires the import and dispatch components to one storage backend and one transport factory.
pub struct Engine {
    importer: SubscriberImporter,
    scheduler: DispatchScheduler,
    tracker: DeliveryTracker,
    subscribers: Arc<dyn SubscriberRepository>,
    subscriber_pages: Arc<dyn PageSource<SubscriberFilter, Item = Subscriber>>,
    delivery_pages: Arc<dyn PageSource<DeliveryFilter, Item = Delivery>>,
}

impl Engine {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        transports: Arc<dyn TransportFactory>,
        settings: &DispatchSettings,
    ) -> Self {
        let tracker = DeliveryTracker::new(store.clone(), settings.stale_pending_after());

        Self {
            importer: SubscriberImporter::new(store.clone(), store.clone()),
            scheduler: DispatchScheduler::new(
                store.clone(),
                store.clone(),
                store.clone(),
                tracker.clone(),
                transports,
                settings,
            ),
            tracker,
            subscribers: store.clone(),
            subscriber_pages: store.clone(),
            delivery_pages: store,
        }
    }

    pub async fn import_subscribers(
        &self,
        owner_id: Uuid,
        newsletter_type_id: Uuid,
        records: &[RawSubscriberRecord],
    ) -> Result<ImportOutcome, ImportError> {
        self.importer
            .import(owner_id, newsletter_type_id, records)
            .await
    }

    pub async fn dispatch(
        &self,
        owner_id: Uuid,
        newsletter_type_id: Uuid,
        request: DispatchRequest,
        cancel: CancelToken,
    ) -> Result<DispatchSummary, DispatchError> {
        self.scheduler
            .dispatch(owner_id, newsletter_type_id, request, cancel)
            .await
    }

    pub async fn list_subscribers(
        &self,
        filter: &SubscriberFilter,
        request: PageRequest,
    ) -> Result<Page<Subscriber>, RepositoryError> {
        paginate(self.subscriber_pages.as_ref(), filter, request).await
    }

    pub async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
        request: PageRequest,
    ) -> Result<Page<Delivery>, RepositoryError> {
        paginate(self.delivery_pages.as_ref(), filter, request).await
    }

    pub async fn set_subscriber_status(
        &self,
        owner_id: Uuid,
        subscriber_id: Uuid,
        status: SubscriberStatus,
    ) -> Result<Subscriber, RepositoryError> {
        self.subscribers
            .set_status(owner_id, subscriber_id, status)
            .await
    }

    pub async fn delete_subscriber(
        &self,
        owner_id: Uuid,
        subscriber_id: Uuid,
    ) -> Result<(), RepositoryError> {
        self.subscribers.soft_delete(owner_id, subscriber_id).await
    }

    pub async fn mark_delivery_seen(
        &self,
        owner_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<(), RepositoryError> {
        self.tracker.mark_seen(owner_id, delivery_id).await
    }
}
