use chrono::{DateTime, Utc};

/// Rows that are never hard-deleted. Every "live set" check goes through
/// [`SoftDelete::is_live`].
pub trait SoftDelete {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn is_live(&self) -> bool {
        self.deleted_at().is_none()
    }
}
