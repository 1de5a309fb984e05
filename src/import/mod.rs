//! Bulk subscriber import: validate and dedupe a batch, then persist it atomically.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::subscriber::SubscriberUpsert;
use crate::storage::{NewsletterTypeRepository, RepositoryError, SubscriberRepository};

pub mod normalizer;
pub mod store;

pub use normalizer::SubscriberNormalizer;
pub use store::SubscriberStore;

/// One row as received from the caller. Every field is optional at this point.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RawSubscriberRecord {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AcceptedRow {
    pub row: usize,
    #[serde(flatten)]
    pub upsert: SubscriberUpsert,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RejectedRow {
    pub row: usize,
    pub email: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub accepted: Vec<AcceptedRow>,
    pub rejected: Vec<RejectedRow>,
    pub duplicates_dropped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

#[derive(Debug, serde::Serialize)]
pub struct ImportOutcome {
    #[serde(flatten)]
    pub report: ImportReport,
    pub counts: ImportCounts,
}

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("Newsletter type {0} does not exist.")]
    UnknownNewsletterType(Uuid),
    #[error("Import rolled back at row {row} ({email}); {failed} subscriber writes were discarded.")]
    BatchRolledBack {
        row: usize,
        email: String,
        failed: usize,
        source: Box<RepositoryError>,
    },
    #[error("Failed to read or write subscribers.")]
    Repository(#[from] RepositoryError),
}

/// Runs an import end to end for one owner and newsletter type.
pub struct SubscriberImporter {
    newsletter_types: Arc<dyn NewsletterTypeRepository>,
    normalizer: SubscriberNormalizer,
    store: SubscriberStore,
}

impl SubscriberImporter {
    pub fn new(
        subscribers: Arc<dyn SubscriberRepository>,
        newsletter_types: Arc<dyn NewsletterTypeRepository>,
    ) -> Self {
        Self {
            newsletter_types,
            normalizer: SubscriberNormalizer::new(subscribers.clone()),
            store: SubscriberStore::new(subscribers),
        }
    }

    #[tracing::instrument(
        name = "Import subscribers",
        skip(self, records),
        fields(rows = records.len())
    )]
    pub async fn import(
        &self,
        owner_id: Uuid,
        newsletter_type_id: Uuid,
        records: &[RawSubscriberRecord],
    ) -> Result<ImportOutcome, ImportError> {
        self.newsletter_types
            .find_live(newsletter_type_id)
            .await?
            .ok_or(ImportError::UnknownNewsletterType(newsletter_type_id))?;

        let report = self
            .normalizer
            .plan(owner_id, newsletter_type_id, records)
            .await?;
        let counts = self.store.apply(&report).await?;

        tracing::info!(
            inserted = counts.inserted,
            updated = counts.updated,
            unchanged = counts.unchanged,
            failed = counts.failed,
            "Subscriber import finished"
        );

        Ok(ImportOutcome { report, counts })
    }
}
