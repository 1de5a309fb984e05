use secrecy::Secret;
use uuid::Uuid;

/// Hard ceiling for concurrent sends in a single run, whatever the owner configures.
pub const MAX_CONCURRENT_SENDS: usize = 10;

/// Per-owner SMTP configuration. The password stays wrapped so it never reaches a log line.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: Secret<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub use_tls: bool,
    pub max_connections: Option<u16>,
}

impl EmailSettings {
    /// Number of workers a dispatch run may use against this SMTP host.
    pub fn concurrency_cap(&self, default_cap: usize) -> usize {
        self.max_connections
            .map(usize::from)
            .unwrap_or(default_cap)
            .clamp(1, MAX_CONCURRENT_SENDS)
    }
}
