use chrono::{Duration, Utc};
use claim::{assert_err, assert_ok};
use uuid::Uuid;

use newsletter_dispatch::domain::delivery::{DeliveryState, DeliveryStatus, NewDelivery};
use newsletter_dispatch::domain::subscriber::{SubscriberUpsert, UpsertKind};
use newsletter_dispatch::domain::subscriber_email::SubscriberEmail;
use newsletter_dispatch::domain::subscriber_name::SubscriberName;
use newsletter_dispatch::domain::subscriber_status::SubscriberStatus;
use newsletter_dispatch::pagination::PageSource;
use newsletter_dispatch::storage::{
    DeliveryClaim, DeliveryFilter, DeliveryRepository, RepositoryError, SubscriberFilter,
    SubscriberRepository,
};

use crate::helpers::TestDatabase;

fn email(raw: &str) -> SubscriberEmail {
    SubscriberEmail::parse(raw.to_string()).expect("Invalid test email.")
}

fn upsert(owner_id: Uuid, newsletter_type_id: Uuid, raw_email: &str, name: Option<&str>) -> SubscriberUpsert {
    SubscriberUpsert {
        owner_id,
        newsletter_type_id,
        email: email(raw_email),
        name: name.map(|name| SubscriberName::parse(name.to_string()).expect("Invalid test name.")),
        phone: None,
        kind: UpsertKind::Insert,
    }
}

fn new_delivery(run_id: Uuid, owner_id: Uuid, to: &str) -> NewDelivery {
    NewDelivery {
        run_id,
        to: email(to),
        subject: String::from("Our April issue"),
        body: String::from("<p>Content</p>"),
        newsletter_type_id: None,
        owner_id,
    }
}

fn stale_before() -> chrono::DateTime<Utc> {
    Utc::now() - Duration::minutes(15)
}

#[tokio::test]
async fn upserts_insert_then_update_the_live_row() {
    let db = TestDatabase::spawn().await;
    let owner_id = Uuid::new_v4();
    let type_id = db.insert_newsletter_type(owner_id).await;

    let first = assert_ok!(
        db.store
            .apply_upserts(&[
                upsert(owner_id, type_id, "ada@example.com", Some("Ada")),
                upsert(owner_id, type_id, "grace@example.com", None),
            ])
            .await
    );
    let second = assert_ok!(
        db.store
            .apply_upserts(&[upsert(owner_id, type_id, "ada@example.com", None)])
            .await
    );

    assert_eq!((first.inserted, first.updated), (2, 0));
    assert_eq!((second.inserted, second.updated), (0, 1));
    let live = assert_ok!(
        db.store
            .find_live_by_emails(owner_id, &[email("ada@example.com")])
            .await
    );
    assert_eq!(live.len(), 1);
    // A missing name never erases the stored one.
    assert_eq!(live[0].name.as_ref().map(|name| name.as_ref()), Some("Ada"));
}

#[tokio::test]
async fn failing_row_rolls_back_the_whole_batch() {
    let db = TestDatabase::spawn().await;
    let owner_id = Uuid::new_v4();
    let type_id = db.insert_newsletter_type(owner_id).await;

    let err = assert_err!(
        db.store
            .apply_upserts(&[
                upsert(owner_id, type_id, "ada@example.com", None),
                // Unknown newsletter type violates the foreign key.
                upsert(owner_id, Uuid::new_v4(), "grace@example.com", None),
            ])
            .await
    );

    match err {
        RepositoryError::BatchRolledBack { row, email, .. } => {
            assert_eq!(row, 1);
            assert_eq!(email, "grace@example.com");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let total = assert_ok!(
        PageSource::<SubscriberFilter>::count(&db.store, &SubscriberFilter::default()).await
    );
    assert_eq!(total, 0);
}

#[tokio::test]
async fn soft_deleted_subscriber_does_not_block_a_new_insert() {
    let db = TestDatabase::spawn().await;
    let owner_id = Uuid::new_v4();
    let type_id = db.insert_newsletter_type(owner_id).await;
    assert_ok!(
        db.store
            .apply_upserts(&[upsert(owner_id, type_id, "ada@example.com", None)])
            .await
    );
    let existing = assert_ok!(
        db.store
            .find_live_by_emails(owner_id, &[email("ada@example.com")])
            .await
    );

    assert_ok!(db.store.soft_delete(owner_id, existing[0].id).await);
    let again = assert_ok!(
        db.store
            .apply_upserts(&[upsert(owner_id, type_id, "ada@example.com", None)])
            .await
    );

    assert_eq!(again.inserted, 1);
    assert_err!(db.store.soft_delete(owner_id, existing[0].id).await);
}

#[tokio::test]
async fn claims_are_created_in_flight_reclaimed_and_settled() {
    let db = TestDatabase::spawn().await;
    let owner_id = Uuid::new_v4();
    let delivery = new_delivery(Uuid::new_v4(), owner_id, "ada@example.com");

    let created = assert_ok!(db.store.claim(&delivery, stale_before()).await);
    let in_flight = assert_ok!(db.store.claim(&delivery, stale_before()).await);
    assert!(matches!(created, DeliveryClaim::Created(_)));
    assert!(matches!(in_flight, DeliveryClaim::InFlight(_)));

    sqlx::query("UPDATE invitation_emails SET updated_at = $2 WHERE id = $1")
        .bind(created.delivery().id)
        .bind(Utc::now() - Duration::hours(1))
        .execute(&db.db_pool)
        .await
        .expect("Failed to age the delivery.");
    let reclaimed = assert_ok!(db.store.claim(&delivery, stale_before()).await);
    assert!(matches!(reclaimed, DeliveryClaim::Reclaimed(_)));
    assert_eq!(reclaimed.delivery().id, created.delivery().id);

    assert_ok!(
        db.store
            .update_status(created.delivery().id, &DeliveryStatus::Sent)
            .await
    );
    let settled = assert_ok!(db.store.claim(&delivery, stale_before()).await);
    assert!(matches!(settled, DeliveryClaim::Settled(_)));
}

#[tokio::test]
async fn renewal_fails_after_a_takeover() {
    let db = TestDatabase::spawn().await;
    let delivery = new_delivery(Uuid::new_v4(), Uuid::new_v4(), "ada@example.com");
    let first = assert_ok!(db.store.claim(&delivery, stale_before()).await);

    let renewed = assert_ok!(
        db.store
            .renew(first.delivery().id, first.delivery().updated_at)
            .await
    )
    .expect("The holder could not renew its own claim.");
    sqlx::query("UPDATE invitation_emails SET updated_at = $2 WHERE id = $1")
        .bind(renewed.id)
        .bind(Utc::now() - Duration::hours(1))
        .execute(&db.db_pool)
        .await
        .expect("Failed to age the delivery.");
    let takeover = assert_ok!(db.store.claim(&delivery, stale_before()).await);

    assert!(matches!(takeover, DeliveryClaim::Reclaimed(_)));
    assert!(assert_ok!(db.store.renew(renewed.id, renewed.updated_at).await).is_none());
    assert!(assert_ok!(
        db.store
            .renew(takeover.delivery().id, takeover.delivery().updated_at)
            .await
    )
    .is_some());
}

#[tokio::test]
async fn terminal_status_is_never_overwritten() {
    let db = TestDatabase::spawn().await;
    let delivery = new_delivery(Uuid::new_v4(), Uuid::new_v4(), "ada@example.com");
    let claim = assert_ok!(db.store.claim(&delivery, stale_before()).await);
    let id = claim.delivery().id;

    assert_ok!(
        db.store
            .update_status(
                id,
                &DeliveryStatus::Failed {
                    error: String::from("550 mailbox unavailable")
                }
            )
            .await
    );
    let err = assert_err!(db.store.update_status(id, &DeliveryStatus::Sent).await);

    assert!(matches!(
        err,
        RepositoryError::TerminalState { state: "FAILED", .. }
    ));
    assert!(matches!(
        assert_err!(db.store.update_status(Uuid::new_v4(), &DeliveryStatus::Sent).await),
        RepositoryError::NotFound(_)
    ));
}

#[tokio::test]
async fn filtered_counts_and_pages_only_see_matching_rows() {
    let db = TestDatabase::spawn().await;
    let owner_id = Uuid::new_v4();
    let type_id = db.insert_newsletter_type(owner_id).await;
    let upserts: Vec<_> = (0..25)
        .map(|index| upsert(owner_id, type_id, &format!("reader{}@example.com", index), None))
        .collect();
    assert_ok!(db.store.apply_upserts(&upserts).await);
    let blocked = assert_ok!(
        db.store
            .find_live_by_emails(owner_id, &[email("reader0@example.com")])
            .await
    );
    assert_ok!(
        db.store
            .set_status(owner_id, blocked[0].id, SubscriberStatus::Blocked)
            .await
    );

    let active = SubscriberFilter {
        owner_id: Some(owner_id),
        newsletter_type_id: Some(type_id),
        status: Some(SubscriberStatus::Active),
    };
    let other_owner = SubscriberFilter {
        owner_id: Some(Uuid::new_v4()),
        ..SubscriberFilter::default()
    };

    assert_eq!(
        assert_ok!(PageSource::<SubscriberFilter>::count(&db.store, &active).await),
        24
    );
    assert_eq!(
        assert_ok!(PageSource::<SubscriberFilter>::count(&db.store, &other_owner).await),
        0
    );
    let last_page = assert_ok!(PageSource::<SubscriberFilter>::fetch(&db.store, &active, 20, 10).await);
    assert_eq!(last_page.len(), 4);
    assert_eq!(
        assert_ok!(db.store.list_active_recipients(type_id).await).len(),
        24
    );

    let run_id = Uuid::new_v4();
    for index in 0..3 {
        let claim = assert_ok!(
            db.store
                .claim(
                    &new_delivery(run_id, owner_id, &format!("reader{}@example.com", index)),
                    stale_before()
                )
                .await
        );
        if index == 0 {
            assert_ok!(
                db.store
                    .update_status(claim.delivery().id, &DeliveryStatus::Sent)
                    .await
            );
        }
    }
    let pending = DeliveryFilter {
        owner_id: Some(owner_id),
        run_id: Some(run_id),
        status: Some(DeliveryState::Pending),
        ..DeliveryFilter::default()
    };

    assert_eq!(
        assert_ok!(PageSource::<DeliveryFilter>::count(&db.store, &pending).await),
        2
    );
    let rows = assert_ok!(PageSource::<DeliveryFilter>::fetch(&db.store, &pending, 0, 10).await);
    assert!(rows.iter().all(|row| row.status == DeliveryStatus::Pending));
}
