use newsletter_dispatch::domain::delivery::DeliveryStatus;
use newsletter_dispatch::domain::newsletter_type::NewsletterTypeStatus;
use newsletter_dispatch::domain::subscriber_status::SubscriberStatus;

use crate::helpers::{dispatch_body, TestApp};

#[tokio::test]
async fn newsletters_are_delivered_to_active_subscribers_only() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;
    test_app.seed_email_settings().await;
    for index in 0..3 {
        test_app
            .seed_subscriber(
                type_id,
                &format!("reader{}@example.com", index),
                SubscriberStatus::Active,
            )
            .await;
    }
    test_app
        .seed_subscriber(type_id, "left@example.com", SubscriberStatus::Unsubscribed)
        .await;

    let response = test_app
        .post_dispatch(type_id, dispatch_body("Our April issue"))
        .await;

    assert_eq!(200, response.status().as_u16());
    let summary: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert_eq!(summary["recipients"], 3);
    assert_eq!(summary["sent"], 3);
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["pendingAbandoned"], 0);

    let sent = test_app.transport.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|email| email.subject == "Our April issue"));
    assert!(sent.iter().all(|email| email.to != "left@example.com"));
    assert_eq!(test_app.store.deliveries().await.len(), 3);
}

#[tokio::test]
async fn rejected_recipient_is_failed_and_the_rest_are_sent() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;
    test_app.seed_email_settings().await;
    for index in 0..4 {
        test_app
            .seed_subscriber(
                type_id,
                &format!("reader{}@example.com", index),
                SubscriberStatus::Active,
            )
            .await;
    }
    test_app.transport.reject("reader2@example.com");

    let response = test_app
        .post_dispatch(type_id, dispatch_body("Our April issue"))
        .await;

    let summary: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert_eq!(summary["sent"], 3);
    assert_eq!(summary["failed"], 1);

    let failed: Vec<_> = test_app
        .store
        .deliveries()
        .await
        .into_iter()
        .filter(|delivery| delivery.to.as_ref() == "reader2@example.com")
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(failed[0].status, DeliveryStatus::Failed { .. }));
    assert!(failed[0]
        .status
        .error()
        .unwrap()
        .contains("Recipient address rejected"));
}

#[tokio::test]
async fn dispatch_without_email_settings_returns_422() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;
    test_app
        .seed_subscriber(type_id, "reader@example.com", SubscriberStatus::Active)
        .await;

    let response = test_app
        .post_dispatch(type_id, dispatch_body("Our April issue"))
        .await;

    assert_eq!(422, response.status().as_u16());
    assert!(test_app.store.deliveries().await.is_empty());
    assert!(test_app.transport.sent().is_empty());
}

#[tokio::test]
async fn dispatch_to_an_inactive_newsletter_type_returns_404() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app
        .seed_newsletter_type(NewsletterTypeStatus::Inactive)
        .await;
    test_app.seed_email_settings().await;

    let response = test_app
        .post_dispatch(type_id, dispatch_body("Our April issue"))
        .await;

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn dispatch_returns_400_when_body_is_invalid() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;
    test_app.seed_email_settings().await;
    let test_cases = vec![
        (serde_json::json!({ "body": "<p>Content</p>" }), "missing subject"),
        (serde_json::json!({ "subject": "Title" }), "missing body"),
        (
            serde_json::json!({ "subject": "   ", "body": "<p>Content</p>" }),
            "blank subject",
        ),
    ];

    for (body, description) in test_cases {
        let response = test_app.post_dispatch(type_id, body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload was {}.",
            description
        );
    }
}

#[tokio::test]
async fn repeating_a_run_id_does_not_send_twice() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;
    test_app.seed_email_settings().await;
    test_app
        .seed_subscriber(type_id, "reader@example.com", SubscriberStatus::Active)
        .await;
    let body = serde_json::json!({
        "runId": uuid::Uuid::new_v4(),
        "subject": "Our April issue",
        "body": "<p>Content</p>"
    });

    test_app.post_dispatch(type_id, body.clone()).await;
    let response = test_app.post_dispatch(type_id, body).await;

    let summary: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["sent"], 0);
    assert_eq!(test_app.transport.sent().len(), 1);
}
