#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriberStatus {
    Active,
    Inactive,
    Unsubscribed,
    Blocked,
}

impl SubscriberStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriberStatus::Active)
    }

    pub fn parse(status: String) -> Result<SubscriberStatus, String> {
        match status.to_uppercase().as_str() {
            "ACTIVE" => Ok(SubscriberStatus::Active),
            "INACTIVE" => Ok(SubscriberStatus::Inactive),
            "UNSUBSCRIBED" => Ok(SubscriberStatus::Unsubscribed),
            "BLOCKED" => Ok(SubscriberStatus::Blocked),
            _ => Err(format!("{} is not a valid subscriber status", status)),
        }
    }
}

impl AsRef<str> for SubscriberStatus {
    fn as_ref(&self) -> &str {
        match self {
            SubscriberStatus::Active => "ACTIVE",
            SubscriberStatus::Inactive => "INACTIVE",
            SubscriberStatus::Unsubscribed => "UNSUBSCRIBED",
            SubscriberStatus::Blocked => "BLOCKED",
        }
    }
}
