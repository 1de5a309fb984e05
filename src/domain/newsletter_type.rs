use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::soft_delete::SoftDelete;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NewsletterTypeStatus {
    Active,
    Inactive,
}

impl NewsletterTypeStatus {
    pub fn parse(status: String) -> Result<NewsletterTypeStatus, String> {
        match status.to_uppercase().as_str() {
            "ACTIVE" => Ok(NewsletterTypeStatus::Active),
            "INACTIVE" => Ok(NewsletterTypeStatus::Inactive),
            _ => Err(format!("{} is not a valid newsletter type status", status)),
        }
    }
}

impl AsRef<str> for NewsletterTypeStatus {
    fn as_ref(&self) -> &str {
        match self {
            NewsletterTypeStatus::Active => "ACTIVE",
            NewsletterTypeStatus::Inactive => "INACTIVE",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterType {
    pub id: Uuid,
    pub title: String,
    pub key: String,
    pub status: NewsletterTypeStatus,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl NewsletterType {
    /// Dispatch runs only target live, active types.
    pub fn accepts_dispatch(&self) -> bool {
        self.is_live() && self.status == NewsletterTypeStatus::Active
    }
}

impl SoftDelete for NewsletterType {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}
