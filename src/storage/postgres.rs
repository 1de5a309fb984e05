use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::Secret;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::domain::delivery::{Delivery, DeliveryState, DeliveryStatus, NewDelivery};
use crate::domain::email_settings::EmailSettings;
use crate::domain::newsletter_type::{NewsletterType, NewsletterTypeStatus};
use crate::domain::subscriber::{Subscriber, SubscriberUpsert};
use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_name::SubscriberName;
use crate::domain::subscriber_phone::SubscriberPhone;
use crate::domain::subscriber_status::SubscriberStatus;
use crate::pagination::PageSource;
use crate::storage::{
    DeliveryClaim, DeliveryFilter, DeliveryRepository, EmailSettingsRepository,
    NewsletterTypeRepository, RepositoryError, SubscriberFilter, SubscriberRepository,
    UpsertCounts,
};

/// Shared soft-delete predicate for every query over a soft-deletable table.
const LIVE_ROWS: &str = "deleted_at IS NULL";

const SUBSCRIBER_COLUMNS: &str =
    "id, email, name, phone, status, user_id, newsletter_type_id, created_at, updated_at, deleted_at";

const DELIVERY_COLUMNS: &str = r#"id, run_id, "to", subject, body, status, error, is_seen, newsletter_type_id, user_id, created_at, updated_at"#;

const UPSERT_SUBSCRIBER: &str = r#"
    INSERT INTO subscribers (id, email, name, phone, status, user_id, newsletter_type_id, created_at, updated_at)
    VALUES ($1, $2, $3, $4, 'ACTIVE', $5, $6, $7, $7)
    ON CONFLICT (user_id, email) WHERE deleted_at IS NULL
    DO UPDATE SET
        name = COALESCE(EXCLUDED.name, subscribers.name),
        phone = COALESCE(EXCLUDED.phone, subscribers.phone),
        newsletter_type_id = EXCLUDED.newsletter_type_id,
        updated_at = EXCLUDED.updated_at
    RETURNING (xmax = 0) AS inserted
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn subscriber_from_row(row: &PgRow) -> Result<Subscriber, RepositoryError> {
    let email: String = row.try_get("email")?;
    let name: Option<String> = row.try_get("name")?;
    let phone: Option<String> = row.try_get("phone")?;
    let status: String = row.try_get("status")?;

    Ok(Subscriber {
        id: row.try_get("id")?,
        email: SubscriberEmail::parse(email).map_err(RepositoryError::Malformed)?,
        name: name
            .map(SubscriberName::parse)
            .transpose()
            .map_err(RepositoryError::Malformed)?,
        phone: phone
            .map(SubscriberPhone::parse)
            .transpose()
            .map_err(RepositoryError::Malformed)?,
        status: SubscriberStatus::parse(status).map_err(RepositoryError::Malformed)?,
        owner_id: row.try_get("user_id")?,
        newsletter_type_id: row.try_get("newsletter_type_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, RepositoryError> {
    let to: String = row.try_get("to")?;
    let status: String = row.try_get("status")?;
    let error: Option<String> = row.try_get("error")?;

    Ok(Delivery {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        to: SubscriberEmail::parse(to).map_err(RepositoryError::Malformed)?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        status: DeliveryStatus::from_parts(&status, error).map_err(RepositoryError::Malformed)?,
        is_seen: row.try_get("is_seen")?,
        newsletter_type_id: row.try_get("newsletter_type_id")?,
        owner_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_subscriber_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &SubscriberFilter) {
    builder.push(" WHERE ").push(LIVE_ROWS);

    if let Some(owner_id) = filter.owner_id {
        builder.push(" AND user_id = ").push_bind(owner_id);
    }

    if let Some(newsletter_type_id) = filter.newsletter_type_id {
        builder
            .push(" AND newsletter_type_id = ")
            .push_bind(newsletter_type_id);
    }

    if let Some(status) = filter.status {
        builder
            .push(" AND status = ")
            .push_bind(status.as_ref().to_string());
    }
}

fn push_delivery_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &DeliveryFilter) {
    builder.push(" WHERE TRUE");

    if let Some(owner_id) = filter.owner_id {
        builder.push(" AND user_id = ").push_bind(owner_id);
    }

    if let Some(newsletter_type_id) = filter.newsletter_type_id {
        builder
            .push(" AND newsletter_type_id = ")
            .push_bind(newsletter_type_id);
    }

    if let Some(run_id) = filter.run_id {
        builder.push(" AND run_id = ").push_bind(run_id);
    }

    if let Some(state) = filter.status {
        builder
            .push(" AND status = ")
            .push_bind(state.as_str().to_string());
    }
}

fn count_from_row(row: &PgRow) -> Result<u64, RepositoryError> {
    let total: i64 = row.try_get("total")?;

    Ok(total.max(0) as u64)
}

#[async_trait]
impl SubscriberRepository for PgStore {
    #[tracing::instrument(name = "Find live subscribers by email", skip(self, emails))]
    async fn find_live_by_emails(
        &self,
        owner_id: Uuid,
        emails: &[SubscriberEmail],
    ) -> Result<Vec<Subscriber>, RepositoryError> {
        let emails: Vec<String> = emails.iter().map(|email| email.to_string()).collect();
        let sql = format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE user_id = $1 AND email = ANY($2) AND {LIVE_ROWS}"
        );

        sqlx::query(&sql)
            .bind(owner_id)
            .bind(emails)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(subscriber_from_row)
            .collect()
    }

    #[tracing::instrument(
        name = "Upsert a subscriber batch",
        skip(self, upserts),
        fields(batch_size = upserts.len())
    )]
    async fn apply_upserts(
        &self,
        upserts: &[SubscriberUpsert],
    ) -> Result<UpsertCounts, RepositoryError> {
        let mut transaction = self.pool.begin().await?;
        let mut counts = UpsertCounts::default();
        let now = Utc::now();

        for (row, upsert) in upserts.iter().enumerate() {
            // Dropping the transaction on the error path rolls back every earlier row.
            let inserted: bool = sqlx::query(UPSERT_SUBSCRIBER)
                .bind(Uuid::new_v4())
                .bind(upsert.email.as_ref())
                .bind(upsert.name.as_ref().map(AsRef::<str>::as_ref))
                .bind(upsert.phone.as_ref().map(AsRef::<str>::as_ref))
                .bind(upsert.owner_id)
                .bind(upsert.newsletter_type_id)
                .bind(now)
                .fetch_one(&mut transaction)
                .await
                .and_then(|result| result.try_get("inserted"))
                .map_err(|err| RepositoryError::BatchRolledBack {
                    row,
                    email: upsert.email.to_string(),
                    source: Box::new(RepositoryError::from(err)),
                })?;

            if inserted {
                counts.inserted += 1;
            } else {
                counts.updated += 1;
            }
        }

        transaction.commit().await?;

        Ok(counts)
    }

    async fn list_active_recipients(
        &self,
        newsletter_type_id: Uuid,
    ) -> Result<Vec<Subscriber>, RepositoryError> {
        let sql = format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE newsletter_type_id = $1 AND status = $2 AND {LIVE_ROWS} ORDER BY created_at, id"
        );

        sqlx::query(&sql)
            .bind(newsletter_type_id)
            .bind(SubscriberStatus::Active.as_ref().to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(subscriber_from_row)
            .collect()
    }

    async fn set_status(
        &self,
        owner_id: Uuid,
        subscriber_id: Uuid,
        status: SubscriberStatus,
    ) -> Result<Subscriber, RepositoryError> {
        let sql = format!(
            "UPDATE subscribers SET status = $3, updated_at = $4 WHERE id = $1 AND user_id = $2 AND {LIVE_ROWS} RETURNING {SUBSCRIBER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(subscriber_id)
            .bind(owner_id)
            .bind(status.as_ref())
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound(subscriber_id))?;

        subscriber_from_row(&row)
    }

    async fn soft_delete(
        &self,
        owner_id: Uuid,
        subscriber_id: Uuid,
    ) -> Result<(), RepositoryError> {
        let sql = format!(
            "UPDATE subscribers SET deleted_at = $3, updated_at = $3 WHERE id = $1 AND user_id = $2 AND {LIVE_ROWS}"
        );
        let result = sqlx::query(&sql)
            .bind(subscriber_id)
            .bind(owner_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(subscriber_id));
        }

        Ok(())
    }
}

#[async_trait]
impl NewsletterTypeRepository for PgStore {
    async fn find_live(&self, id: Uuid) -> Result<Option<NewsletterType>, RepositoryError> {
        let sql = format!(
            "SELECT id, title, key, status, user_id, created_at, updated_at, deleted_at FROM newsletter_types WHERE id = $1 AND {LIVE_ROWS}"
        );
        let row = match sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        {
            Some(row) => row,
            None => return Ok(None),
        };
        let status: String = row.try_get("status")?;

        Ok(Some(NewsletterType {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            key: row.try_get("key")?,
            status: NewsletterTypeStatus::parse(status).map_err(RepositoryError::Malformed)?,
            owner_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        }))
    }
}

#[async_trait]
impl EmailSettingsRepository for PgStore {
    #[tracing::instrument(name = "Load owner email settings", skip(self))]
    async fn find_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<EmailSettings>, RepositoryError> {
        let row = match sqlx::query(
            r#"
            SELECT id, smtp_host, smtp_port, smtp_user, smtp_password, from_email, from_name,
                   use_tls, max_connections, user_id
            FROM email_settings
            WHERE user_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        {
            Some(row) => row,
            None => return Ok(None),
        };
        let smtp_port: i32 = row.try_get("smtp_port")?;
        let max_connections: Option<i32> = row.try_get("max_connections")?;
        let smtp_password: String = row.try_get("smtp_password")?;

        Ok(Some(EmailSettings {
            id: row.try_get("id")?,
            owner_id: row.try_get("user_id")?,
            smtp_host: row.try_get("smtp_host")?,
            smtp_port: u16::try_from(smtp_port)
                .map_err(|_| RepositoryError::Malformed(format!("smtp port {}", smtp_port)))?,
            smtp_user: row.try_get("smtp_user")?,
            smtp_password: Secret::new(smtp_password),
            from_email: row.try_get("from_email")?,
            from_name: row.try_get("from_name")?,
            use_tls: row.try_get("use_tls")?,
            max_connections: max_connections.map(|max| max.clamp(0, i32::from(u16::MAX)) as u16),
        }))
    }
}

#[async_trait]
impl DeliveryRepository for PgStore {
    async fn claim(
        &self,
        delivery: &NewDelivery,
        stale_before: DateTime<Utc>,
    ) -> Result<DeliveryClaim, RepositoryError> {
        let now = Utc::now();
        let insert = format!(
            r#"
            INSERT INTO invitation_emails
                (id, run_id, "to", subject, body, status, is_seen, newsletter_type_id, user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', FALSE, $6, $7, $8, $8)
            ON CONFLICT (run_id, "to") DO NOTHING
            RETURNING {DELIVERY_COLUMNS}
            "#
        );
        let created = sqlx::query(&insert)
            .bind(Uuid::new_v4())
            .bind(delivery.run_id)
            .bind(delivery.to.as_ref())
            .bind(delivery.subject.as_str())
            .bind(delivery.body.as_str())
            .bind(delivery.newsletter_type_id)
            .bind(delivery.owner_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = created {
            return Ok(DeliveryClaim::Created(delivery_from_row(&row)?));
        }

        let reclaim = format!(
            r#"
            UPDATE invitation_emails SET updated_at = $3
            WHERE run_id = $1 AND "to" = $2 AND status = 'PENDING' AND updated_at < $4
            RETURNING {DELIVERY_COLUMNS}
            "#
        );
        let reclaimed = sqlx::query(&reclaim)
            .bind(delivery.run_id)
            .bind(delivery.to.as_ref())
            .bind(now)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = reclaimed {
            return Ok(DeliveryClaim::Reclaimed(delivery_from_row(&row)?));
        }

        let select =
            format!(r#"SELECT {DELIVERY_COLUMNS} FROM invitation_emails WHERE run_id = $1 AND "to" = $2"#);
        let existing = sqlx::query(&select)
            .bind(delivery.run_id)
            .bind(delivery.to.as_ref())
            .fetch_one(&self.pool)
            .await?;
        let existing = delivery_from_row(&existing)?;

        if existing.status.is_terminal() {
            Ok(DeliveryClaim::Settled(existing))
        } else {
            Ok(DeliveryClaim::InFlight(existing))
        }
    }

    async fn renew(
        &self,
        delivery_id: Uuid,
        held_since: DateTime<Utc>,
    ) -> Result<Option<Delivery>, RepositoryError> {
        let sql = format!(
            r#"
            UPDATE invitation_emails SET updated_at = $3
            WHERE id = $1 AND status = 'PENDING' AND updated_at = $2
            RETURNING {DELIVERY_COLUMNS}
            "#
        );

        sqlx::query(&sql)
            .bind(delivery_id)
            .bind(held_since)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(delivery_from_row)
            .transpose()
    }

    async fn update_status(
        &self,
        delivery_id: Uuid,
        status: &DeliveryStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE invitation_emails SET status = $2, error = $3, updated_at = $4
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(delivery_id)
        .bind(status.state().as_str())
        .bind(status.error())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<String> =
            sqlx::query("SELECT status FROM invitation_emails WHERE id = $1")
                .bind(delivery_id)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.try_get("status"))
                .transpose()?;

        match current {
            Some(state) => Err(RepositoryError::TerminalState {
                id: delivery_id,
                state: DeliveryState::parse(state)
                    .map_err(RepositoryError::Malformed)?
                    .as_str(),
            }),
            None => Err(RepositoryError::NotFound(delivery_id)),
        }
    }

    async fn mark_seen(&self, owner_id: Uuid, delivery_id: Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE invitation_emails SET is_seen = TRUE, updated_at = $3 WHERE id = $1 AND user_id = $2",
        )
        .bind(delivery_id)
        .bind(owner_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(delivery_id));
        }

        Ok(())
    }
}

#[async_trait]
impl PageSource<SubscriberFilter> for PgStore {
    type Item = Subscriber;

    async fn count(&self, filter: &SubscriberFilter) -> Result<u64, RepositoryError> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) AS total FROM subscribers");
        push_subscriber_filter(&mut builder, filter);

        let row = builder.build().fetch_one(&self.pool).await?;

        count_from_row(&row)
    }

    async fn fetch(
        &self,
        filter: &SubscriberFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Subscriber>, RepositoryError> {
        let mut builder = QueryBuilder::new(format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers"));
        push_subscriber_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        builder
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(subscriber_from_row)
            .collect()
    }
}

#[async_trait]
impl PageSource<DeliveryFilter> for PgStore {
    type Item = Delivery;

    async fn count(&self, filter: &DeliveryFilter) -> Result<u64, RepositoryError> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) AS total FROM invitation_emails");
        push_delivery_filter(&mut builder, filter);

        let row = builder.build().fetch_one(&self.pool).await?;

        count_from_row(&row)
    }

    async fn fetch(
        &self,
        filter: &DeliveryFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Delivery>, RepositoryError> {
        let mut builder =
            QueryBuilder::new(format!("SELECT {DELIVERY_COLUMNS} FROM invitation_emails"));
        push_delivery_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        builder
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(delivery_from_row)
            .collect()
    }
}
