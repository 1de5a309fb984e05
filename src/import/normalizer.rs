use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::domain::soft_delete::SoftDelete;
use crate::domain::subscriber::{Subscriber, SubscriberUpsert, UpsertKind};
use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_name::SubscriberName;
use crate::domain::subscriber_phone::SubscriberPhone;
use crate::import::{AcceptedRow, ImportReport, RawSubscriberRecord, RejectedRow};
use crate::storage::{RepositoryError, SubscriberRepository};

/// A row that passed validation, merged with every earlier row sharing its email.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub row: usize,
    pub email: SubscriberEmail,
    pub name: Option<SubscriberName>,
    pub phone: Option<SubscriberPhone>,
}

/// Result of validating and deduplicating a batch, before storage is consulted.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub candidates: Vec<Candidate>,
    pub rejected: Vec<RejectedRow>,
    pub duplicates_dropped: usize,
}

/// Turns raw import rows into upsert plans. Reads storage, never writes it.
pub struct SubscriberNormalizer {
    subscribers: Arc<dyn SubscriberRepository>,
}

impl SubscriberNormalizer {
    pub fn new(subscribers: Arc<dyn SubscriberRepository>) -> Self {
        Self { subscribers }
    }

    #[tracing::instrument(
        name = "Plan subscriber import",
        skip(self, records),
        fields(rows = records.len())
    )]
    pub async fn plan(
        &self,
        owner_id: Uuid,
        newsletter_type_id: Uuid,
        records: &[RawSubscriberRecord],
    ) -> Result<ImportReport, RepositoryError> {
        let batch = normalize_batch(records);
        let emails: Vec<SubscriberEmail> = batch
            .candidates
            .iter()
            .map(|candidate| candidate.email.clone())
            .collect();

        let existing = if emails.is_empty() {
            Vec::new()
        } else {
            self.subscribers
                .find_live_by_emails(owner_id, &emails)
                .await?
        };

        let report = reconcile(owner_id, newsletter_type_id, batch, &existing);

        tracing::info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            duplicates_dropped = report.duplicates_dropped,
            "Subscriber import planned"
        );

        Ok(report)
    }
}

/// Blank optional fields count as absent.
fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn validate(row: usize, record: &RawSubscriberRecord) -> Result<Candidate, RejectedRow> {
    let raw_email = non_blank(&record.email);
    let reject = |reason: String| RejectedRow {
        row,
        email: raw_email.clone(),
        reason,
    };

    let email = match &raw_email {
        Some(email) => SubscriberEmail::parse(email.clone()).map_err(reject)?,
        None => return Err(reject(String::from("email is missing"))),
    };
    let name = non_blank(&record.name)
        .map(SubscriberName::parse)
        .transpose()
        .map_err(reject)?;
    let phone = non_blank(&record.phone)
        .map(SubscriberPhone::parse)
        .transpose()
        .map_err(reject)?;

    Ok(Candidate {
        row,
        email,
        name,
        phone,
    })
}

/// Validates every row and collapses rows sharing a normalized email. Rows are numbered
/// from 1. A later duplicate overwrites the fields it provides and keeps the rest.
pub fn normalize_batch(records: &[RawSubscriberRecord]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let mut seen: HashMap<SubscriberEmail, usize> = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        let candidate = match validate(index + 1, record) {
            Ok(candidate) => candidate,
            Err(rejected) => {
                tracing::debug!(row = rejected.row, reason = %rejected.reason, "Row rejected");
                batch.rejected.push(rejected);
                continue;
            }
        };

        match seen.get(&candidate.email) {
            Some(&position) => {
                let earlier = &mut batch.candidates[position];
                earlier.row = candidate.row;
                if candidate.name.is_some() {
                    earlier.name = candidate.name;
                }
                if candidate.phone.is_some() {
                    earlier.phone = candidate.phone;
                }
                batch.duplicates_dropped += 1;
            }
            None => {
                seen.insert(candidate.email.clone(), batch.candidates.len());
                batch.candidates.push(candidate);
            }
        }
    }

    batch
}

/// Decides insert, update or unchanged for every candidate. Only live subscribers of
/// `owner_id` are matched.
pub fn reconcile(
    owner_id: Uuid,
    newsletter_type_id: Uuid,
    batch: NormalizedBatch,
    existing: &[Subscriber],
) -> ImportReport {
    let by_email: HashMap<&SubscriberEmail, &Subscriber> = existing
        .iter()
        .filter(|subscriber| subscriber.is_live() && subscriber.owner_id == Some(owner_id))
        .map(|subscriber| (&subscriber.email, subscriber))
        .collect();

    let accepted = batch
        .candidates
        .into_iter()
        .map(|candidate| {
            let mut upsert = SubscriberUpsert {
                owner_id,
                newsletter_type_id,
                email: candidate.email,
                name: candidate.name,
                phone: candidate.phone,
                kind: UpsertKind::Insert,
            };

            if let Some(current) = by_email.get(&upsert.email) {
                upsert.kind = if upsert.changes_nothing(current) {
                    UpsertKind::Unchanged(current.id)
                } else {
                    UpsertKind::Update(current.id)
                };
            }

            AcceptedRow {
                row: candidate.row,
                upsert,
            }
        })
        .collect();

    ImportReport {
        accepted,
        rejected: batch.rejected,
        duplicates_dropped: batch.duplicates_dropped,
    }
}
