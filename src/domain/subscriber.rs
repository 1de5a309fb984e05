use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::soft_delete::SoftDelete;
use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_name::SubscriberName;
use crate::domain::subscriber_phone::SubscriberPhone;
use crate::domain::subscriber_status::SubscriberStatus;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: Uuid,
    pub email: SubscriberEmail,
    pub name: Option<SubscriberName>,
    pub phone: Option<SubscriberPhone>,
    pub status: SubscriberStatus,
    pub owner_id: Option<Uuid>,
    pub newsletter_type_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subscriber {
    /// Whether a dispatch run for `newsletter_type_id` must include this subscriber.
    pub fn is_recipient_of(&self, newsletter_type_id: Uuid) -> bool {
        self.is_live()
            && self.status.is_active()
            && self.newsletter_type_id == Some(newsletter_type_id)
    }
}

impl SoftDelete for Subscriber {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "subscriberId")]
pub enum UpsertKind {
    Insert,
    Update(Uuid),
    Unchanged(Uuid),
}

/// A validated subscriber write keyed by `(owner_id, email)`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberUpsert {
    pub owner_id: Uuid,
    pub newsletter_type_id: Uuid,
    pub email: SubscriberEmail,
    pub name: Option<SubscriberName>,
    pub phone: Option<SubscriberPhone>,
    pub kind: UpsertKind,
}

impl SubscriberUpsert {
    pub fn is_unchanged(&self) -> bool {
        matches!(self.kind, UpsertKind::Unchanged(_))
    }

    /// Fills the fields this upsert leaves empty from a previous version of the row.
    pub fn merge_into(&self, existing: &Subscriber) -> Subscriber {
        Subscriber {
            name: self.name.clone().or_else(|| existing.name.clone()),
            phone: self.phone.clone().or_else(|| existing.phone.clone()),
            newsletter_type_id: Some(self.newsletter_type_id),
            ..existing.clone()
        }
    }

    /// True when applying this upsert would leave `existing` untouched.
    pub fn changes_nothing(&self, existing: &Subscriber) -> bool {
        let merged = self.merge_into(existing);

        merged.name == existing.name
            && merged.phone == existing.phone
            && merged.newsletter_type_id == existing.newsletter_type_id
    }
}
