use async_trait::async_trait;
use chrono::Utc;
use reqwest::Response;
use secrecy::Secret;
use sqlx::{migrate, Connection, Executor, PgConnection, PgPool};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use newsletter_dispatch::{
    config::{get_configuration, DatabaseSettings},
    domain::{
        email_settings::EmailSettings,
        newsletter_type::{NewsletterType, NewsletterTypeStatus},
        subscriber::Subscriber,
        subscriber_email::SubscriberEmail,
        subscriber_status::SubscriberStatus,
    },
    mail::{MailTransport, OutgoingEmail, TransportError, TransportFactory},
    routes::OWNER_HEADER,
    startup::{get_connection_db_pool, Application},
    storage::{InMemoryStore, PgStore},
};

/// Accepts every email except the ones addressed to a rejected recipient.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn reject(&self, email: &str) {
        self.rejected.lock().unwrap().insert(email.to_string());
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        if self.rejected.lock().unwrap().contains(&email.to) {
            return Err(TransportError::Permanent(format!(
                "550 5.1.1 <{}>: Recipient address rejected",
                email.to
            )));
        }

        self.sent.lock().unwrap().push(email.clone());

        Ok(())
    }
}

struct RecordingTransportFactory(Arc<RecordingTransport>);

impl TransportFactory for RecordingTransportFactory {
    fn connect(&self, _: &EmailSettings) -> Result<Arc<dyn MailTransport>, TransportError> {
        Ok(self.0.clone())
    }
}

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryStore>,
    pub transport: Arc<RecordingTransport>,
    pub owner_id: Uuid,
    pub api_client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn_app() -> TestApp {
        let mut config = get_configuration().expect("Missing configuration file.");
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(RecordingTransport::default());

        // We are using port 0 as way to define a different port per each test. Port 0 is a special case that operating systems
        // take into account: when port is 0, the OS will search for the first available port
        config.set_app_port(0);
        config.dispatch.retry_base_delay_milliseconds = 1;

        let application = Application::build_with(
            config,
            store.clone(),
            Arc::new(RecordingTransportFactory(transport.clone())),
        )
        .expect("Failed to build application.");

        let address = format!("http://127.0.0.1:{}", application.get_port());

        tokio::spawn(application.run_until_stop());

        TestApp {
            address,
            store,
            transport,
            owner_id: Uuid::new_v4(),
            api_client: reqwest::Client::new(),
        }
    }

    pub async fn seed_newsletter_type(&self, status: NewsletterTypeStatus) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();

        self.store
            .insert_newsletter_type(NewsletterType {
                id,
                title: String::from("Monthly digest"),
                key: format!("monthly-digest-{}", id),
                status,
                owner_id: Some(self.owner_id),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .await;

        id
    }

    pub async fn seed_email_settings(&self) {
        self.store
            .insert_email_settings(EmailSettings {
                id: Uuid::new_v4(),
                owner_id: self.owner_id,
                smtp_host: String::from("smtp.example.com"),
                smtp_port: 587,
                smtp_user: String::from("mailer"),
                smtp_password: Secret::new(String::from("smtp-password")),
                from_email: String::from("news@example.com"),
                from_name: Some(String::from("Example News")),
                use_tls: true,
                max_connections: Some(3),
            })
            .await;
    }

    pub async fn seed_subscriber(
        &self,
        newsletter_type_id: Uuid,
        email: &str,
        status: SubscriberStatus,
    ) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();

        self.store
            .insert_subscriber(Subscriber {
                id,
                email: SubscriberEmail::parse(email.to_string()).expect("Invalid test email."),
                name: None,
                phone: None,
                status,
                owner_id: Some(self.owner_id),
                newsletter_type_id: Some(newsletter_type_id),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .await;

        id
    }

    pub async fn post_import(&self, newsletter_type_id: Uuid, body: serde_json::Value) -> Response {
        self.api_client
            .post(format!(
                "{}/newsletter-types/{}/subscribers/import",
                self.address, newsletter_type_id
            ))
            .header(OWNER_HEADER, self.owner_id.to_string())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_dispatch(&self, newsletter_type_id: Uuid, body: serde_json::Value) -> Response {
        self.api_client
            .post(format!(
                "{}/newsletter-types/{}/dispatch",
                self.address, newsletter_type_id
            ))
            .header(OWNER_HEADER, self.owner_id.to_string())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_subscribers(&self, query: &[(&str, String)]) -> Response {
        self.api_client
            .get(format!("{}/subscribers", self.address))
            .header(OWNER_HEADER, self.owner_id.to_string())
            .query(query)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn put_subscriber_status(&self, subscriber_id: Uuid, status: &str) -> Response {
        self.api_client
            .put(format!("{}/subscribers/{}/status", self.address, subscriber_id))
            .header(OWNER_HEADER, self.owner_id.to_string())
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn delete_subscriber(&self, subscriber_id: Uuid) -> Response {
        self.api_client
            .delete(format!("{}/subscribers/{}", self.address, subscriber_id))
            .header(OWNER_HEADER, self.owner_id.to_string())
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_deliveries(&self, query: &[(&str, String)]) -> Response {
        self.api_client
            .get(format!("{}/deliveries", self.address))
            .header(OWNER_HEADER, self.owner_id.to_string())
            .query(query)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_delivery_seen(&self, delivery_id: Uuid) -> Response {
        self.api_client
            .post(format!("{}/deliveries/{}/seen", self.address, delivery_id))
            .header(OWNER_HEADER, self.owner_id.to_string())
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

pub fn dispatch_body(subject: &str) -> serde_json::Value {
    serde_json::json!({
        "subject": subject,
        "body": "<p>This month in the newsletter</p>"
    })
}

/// A `PgStore` over a freshly migrated database of its own.
pub struct TestDatabase {
    pub store: PgStore,
    pub db_pool: PgPool,
}

impl TestDatabase {
    pub async fn spawn() -> TestDatabase {
        let mut config = get_configuration().expect("Missing configuration file.");
        let db_test_name = format!("db_{}", Uuid::new_v4().to_string().replace('-', "_"));
        let db_pool = configure_db(&mut config.database, db_test_name).await;

        TestDatabase {
            store: PgStore::new(db_pool.clone()),
            db_pool,
        }
    }

    pub async fn insert_newsletter_type(&self, owner_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO newsletter_types (id, title, key, status, user_id) VALUES ($1, $2, $3, 'ACTIVE', $4)",
        )
        .bind(id)
        .bind("Monthly digest")
        .bind(format!("monthly-digest-{}", id))
        .bind(owner_id)
        .execute(&self.db_pool)
        .await
        .expect("Failed to insert newsletter type.");

        id
    }
}

async fn configure_db(db_config: &mut DatabaseSettings, db_test_name: String) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect_with(&db_config.get_db_options())
        .await
        .expect("Failed to connect to Postgres.");

    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, db_test_name))
        .await
        .expect("Failed to create database.");

    connection
        .close()
        .await
        .expect("Failed to close connection.");

    // Execute migrations
    db_config.set_name(db_test_name);

    let db_pool = get_connection_db_pool(db_config);

    migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run migrations.");

    db_pool
}
