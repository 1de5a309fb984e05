pub mod delivery;
pub mod email_settings;
pub mod newsletter_type;
pub mod soft_delete;
pub mod subscriber;
pub mod subscriber_email;
pub mod subscriber_name;
pub mod subscriber_phone;
pub mod subscriber_status;
