//! Newsletter dispatch: recipient selection, delivery claims and the bounded send pipeline.

use uuid::Uuid;

use crate::mail::TransportError;
use crate::storage::RepositoryError;

pub mod cancel;
pub mod retry;
pub mod runs;
pub mod scheduler;
pub mod tracker;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use retry::RetryPolicy;
pub use runs::{run_launcher, RunDrain, RunLauncher, ShuttingDown};
pub use scheduler::DispatchScheduler;
pub use tracker::DeliveryTracker;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    /// Reusing the id of an earlier run resumes it without sending twice. Without one every
    /// request starts a new run, so a client that retries a request it believes failed must
    /// pass the `runId` of the first attempt or every recipient gets the newsletter again.
    pub run_id: Option<Uuid>,
    pub subject: String,
    pub body: String,
}

/// Tally of one run. Every recipient lands in exactly one bucket besides `recipients`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub run_id: Uuid,
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
    pub pending_abandoned: usize,
    /// Rows this run did not own when it came to send them.
    pub skipped: usize,
    pub enqueue_failed: usize,
    pub unrecorded: usize,
}

impl DispatchSummary {
    pub fn accounted(&self) -> usize {
        self.sent
            + self.failed
            + self.pending_abandoned
            + self.skipped
            + self.enqueue_failed
            + self.unrecorded
    }
}

/// Failures that stop a run before any delivery row is created.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidMessage(String),
    #[error("Newsletter type {0} is missing, deleted or inactive.")]
    NewsletterTypeUnavailable(Uuid),
    #[error("Owner {0} has no email settings.")]
    MissingEmailSettings(Uuid),
    #[error("Email settings cannot be used to build a transport.")]
    InvalidEmailSettings(#[source] TransportError),
    #[error("Failed to select the recipients of the run.")]
    Selection(#[source] RepositoryError),
}
