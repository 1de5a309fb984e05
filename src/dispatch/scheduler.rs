use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::dispatch::cancel::CancelToken;
use crate::dispatch::retry::{RetryDecision, RetryPolicy};
use crate::dispatch::tracker::DeliveryTracker;
use crate::dispatch::{DispatchError, DispatchRequest, DispatchSummary};
use crate::domain::delivery::{Delivery, NewDelivery};
use crate::mail::{MailTransport, OutgoingEmail, TransportFactory};
use crate::storage::{
    EmailSettingsRepository, NewsletterTypeRepository, SubscriberRepository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecipientOutcome {
    Sent,
    Failed,
    /// Stopped by cancellation or the deadline; the row stays PENDING.
    Abandoned,
    /// The send finished but its status write did not.
    Unrecorded,
    /// Another run reclaimed the row while it waited in this run's queue.
    TakenOver,
}

pub struct DispatchScheduler {
    newsletter_types: Arc<dyn NewsletterTypeRepository>,
    email_settings: Arc<dyn EmailSettingsRepository>,
    subscribers: Arc<dyn SubscriberRepository>,
    tracker: DeliveryTracker,
    transports: Arc<dyn TransportFactory>,
    retry: RetryPolicy,
    default_concurrency: usize,
    run_deadline: Duration,
}

impl DispatchScheduler {
    pub fn new(
        newsletter_types: Arc<dyn NewsletterTypeRepository>,
        email_settings: Arc<dyn EmailSettingsRepository>,
        subscribers: Arc<dyn SubscriberRepository>,
        tracker: DeliveryTracker,
        transports: Arc<dyn TransportFactory>,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            newsletter_types,
            email_settings,
            subscribers,
            tracker,
            transports,
            retry: RetryPolicy::new(settings.max_attempts, settings.retry_base_delay()),
            default_concurrency: settings.default_concurrency,
            run_deadline: settings.run_deadline(),
        }
    }

    /// Sends `request` to every active subscriber of the newsletter type.
    ///
    /// Only the checks made before the first delivery row is claimed can fail the run.
    /// From then on every recipient is settled on its own and counted in the summary.
    /// Once `cancel` fires or the run deadline passes, sends already on the wire finish,
    /// nothing new starts, and rows that were never sent stay PENDING. The deadline counts
    /// from the moment the run starts claiming rows.
    #[tracing::instrument(
        name = "Dispatch newsletter",
        skip(self, request, cancel),
        fields(run_id = tracing::field::Empty)
    )]
    pub async fn dispatch(
        &self,
        owner_id: Uuid,
        newsletter_type_id: Uuid,
        request: DispatchRequest,
        mut cancel: CancelToken,
    ) -> Result<DispatchSummary, DispatchError> {
        if request.subject.trim().is_empty() {
            return Err(DispatchError::InvalidMessage(String::from(
                "subject must not be empty",
            )));
        }
        if request.body.trim().is_empty() {
            return Err(DispatchError::InvalidMessage(String::from(
                "body must not be empty",
            )));
        }

        match self
            .newsletter_types
            .find_live(newsletter_type_id)
            .await
            .map_err(DispatchError::Selection)?
        {
            Some(newsletter_type) if newsletter_type.accepts_dispatch() => {}
            _ => return Err(DispatchError::NewsletterTypeUnavailable(newsletter_type_id)),
        }

        let settings = self
            .email_settings
            .find_for_owner(owner_id)
            .await
            .map_err(DispatchError::Selection)?
            .ok_or(DispatchError::MissingEmailSettings(owner_id))?;
        let transport = self
            .transports
            .connect(&settings)
            .map_err(DispatchError::InvalidEmailSettings)?;
        let recipients = self
            .subscribers
            .list_active_recipients(newsletter_type_id)
            .await
            .map_err(DispatchError::Selection)?;

        let deadline = Instant::now() + self.run_deadline;
        let run_id = request.run_id.unwrap_or_else(Uuid::new_v4);
        tracing::Span::current().record("run_id", &tracing::field::display(run_id));

        let mut summary = DispatchSummary {
            run_id,
            recipients: recipients.len(),
            ..DispatchSummary::default()
        };

        let mut claimed: Vec<Delivery> = Vec::with_capacity(recipients.len());
        for subscriber in recipients {
            let delivery = NewDelivery {
                run_id,
                to: subscriber.email,
                subject: request.subject.clone(),
                body: request.body.clone(),
                newsletter_type_id: Some(newsletter_type_id),
                owner_id,
            };

            match self.tracker.enqueue(&delivery).await {
                Ok(claim) if claim.is_owned() => claimed.push(claim.delivery().clone()),
                Ok(claim) => {
                    tracing::debug!(
                        to = %delivery.to,
                        status = claim.delivery().status.state().as_str(),
                        "Delivery is owned elsewhere or settled; skipping"
                    );
                    summary.skipped += 1;
                }
                Err(err) => {
                    tracing::error!(to = %delivery.to, error.cause_chain = ?err, "Failed to enqueue delivery");
                    summary.enqueue_failed += 1;
                }
            }
        }

        let concurrency = settings.concurrency_cap(self.default_concurrency);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let run_timeout = tokio::time::sleep_until(deadline);
        tokio::pin!(run_timeout);

        let mut tasks = JoinSet::new();
        let mut queue = claimed.into_iter();

        tracing::info!(
            recipients = summary.recipients,
            queued = queue.len(),
            concurrency,
            "Starting send pipeline"
        );

        while queue.len() > 0 {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("Dispatch cancelled; no new sends will start");
                    break;
                }
                _ = &mut run_timeout => {
                    tracing::warn!("Dispatch deadline reached; no new sends will start");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Some(delivery) = queue.next() {
                tasks.spawn(deliver(
                    delivery,
                    transport.clone(),
                    self.tracker.clone(),
                    self.retry.clone(),
                    cancel.clone(),
                    deadline,
                    permit,
                ));
            }
        }

        summary.pending_abandoned += queue.len();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(RecipientOutcome::Sent) => summary.sent += 1,
                Ok(RecipientOutcome::Failed) => summary.failed += 1,
                Ok(RecipientOutcome::Abandoned) => summary.pending_abandoned += 1,
                Ok(RecipientOutcome::Unrecorded) => summary.unrecorded += 1,
                Ok(RecipientOutcome::TakenOver) => summary.skipped += 1,
                Err(err) => {
                    tracing::error!(error.cause_chain = ?err, "Send task did not complete");
                    summary.pending_abandoned += 1;
                }
            }
        }

        tracing::info!(
            sent = summary.sent,
            failed = summary.failed,
            pending_abandoned = summary.pending_abandoned,
            skipped = summary.skipped,
            enqueue_failed = summary.enqueue_failed,
            unrecorded = summary.unrecorded,
            "Dispatch finished"
        );

        Ok(summary)
    }
}

/// Sends one delivery, retrying transient failures, and records the terminal status once.
/// Every attempt first renews the claim, so a row reclaimed by another run is never sent here.
#[tracing::instrument(
    name = "Deliver newsletter",
    skip_all,
    fields(delivery_id = %delivery.id, to = %delivery.to)
)]
async fn deliver(
    delivery: Delivery,
    transport: Arc<dyn MailTransport>,
    tracker: DeliveryTracker,
    retry: RetryPolicy,
    mut cancel: CancelToken,
    deadline: Instant,
    _permit: OwnedSemaphorePermit,
) -> RecipientOutcome {
    let email = OutgoingEmail::from(&delivery);
    let mut lease = delivery;
    let mut attempt = 1;

    let result = loop {
        lease = match tracker.renew(&lease).await {
            Ok(Some(renewed)) => renewed,
            Ok(None) => {
                tracing::warn!("Delivery was reclaimed by another run; not sending");
                return RecipientOutcome::TakenOver;
            }
            Err(err) => {
                tracing::error!(error.cause_chain = ?err, "Failed to renew the delivery claim");
                return RecipientOutcome::Abandoned;
            }
        };

        let err = match transport.send(&email).await {
            Ok(()) => break Ok(()),
            Err(err) => err,
        };

        match retry.decide(attempt, &err) {
            RetryDecision::GiveUp => break Err(err),
            RetryDecision::Retry(delay) => {
                tracing::warn!(attempt, ?delay, error = %err, "Transient send failure; retrying");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return RecipientOutcome::Abandoned,
                    _ = tokio::time::sleep_until(deadline) => return RecipientOutcome::Abandoned,
                }

                attempt += 1;
            }
        }
    };

    match result {
        Ok(()) => match tracker.record_sent(lease.id).await {
            Ok(()) => RecipientOutcome::Sent,
            Err(err) => {
                tracing::error!(
                    error.cause_chain = ?err,
                    "Email was sent but the delivery could not be marked SENT"
                );
                RecipientOutcome::Unrecorded
            }
        },
        Err(send_error) => {
            tracing::warn!(attempts = attempt, error = %send_error, "Delivery failed");

            match tracker.record_failed(lease.id, send_error.to_string()).await {
                Ok(()) => RecipientOutcome::Failed,
                Err(err) => {
                    tracing::error!(
                        error.cause_chain = ?err,
                        "Delivery failed and could not be marked FAILED"
                    );
                    RecipientOutcome::Unrecorded
                }
            }
        }
    }
}
