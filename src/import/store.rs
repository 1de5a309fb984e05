use std::sync::Arc;

use crate::domain::subscriber::SubscriberUpsert;
use crate::import::{ImportCounts, ImportError, ImportReport};
use crate::storage::{RepositoryError, SubscriberRepository, UpsertCounts};

/// Writes an import plan as a single unit.
pub struct SubscriberStore {
    subscribers: Arc<dyn SubscriberRepository>,
}

impl SubscriberStore {
    pub fn new(subscribers: Arc<dyn SubscriberRepository>) -> Self {
        Self { subscribers }
    }

    #[tracing::instrument(
        name = "Persist subscriber import",
        skip(self, report),
        fields(accepted = report.accepted.len())
    )]
    pub async fn apply(&self, report: &ImportReport) -> Result<ImportCounts, ImportError> {
        let (writes, rows): (Vec<SubscriberUpsert>, Vec<usize>) = report
            .accepted
            .iter()
            .filter(|accepted| !accepted.upsert.is_unchanged())
            .map(|accepted| (accepted.upsert.clone(), accepted.row))
            .unzip();
        let unchanged = report.accepted.len() - writes.len();

        let written = if writes.is_empty() {
            UpsertCounts::default()
        } else {
            self.subscribers
                .apply_upserts(&writes)
                .await
                .map_err(|err| match err {
                    RepositoryError::BatchRolledBack { row, email, source } => {
                        tracing::error!(
                            row = rows.get(row).copied().unwrap_or(row),
                            email = %email,
                            error.cause_chain = ?source,
                            "Subscriber batch rolled back"
                        );
                        ImportError::BatchRolledBack {
                            row: rows.get(row).copied().unwrap_or(row),
                            email,
                            failed: writes.len(),
                            source,
                        }
                    }
                    other => ImportError::Repository(other),
                })?
        };

        Ok(ImportCounts {
            inserted: written.inserted,
            updated: written.updated,
            unchanged,
            failed: report.rejected.len(),
        })
    }
}
