use newsletter_dispatch::domain::newsletter_type::NewsletterTypeStatus;
use newsletter_dispatch::domain::subscriber_status::SubscriberStatus;

use crate::helpers::TestApp;

async fn seed_mixed_subscribers(test_app: &TestApp) -> uuid::Uuid {
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;

    for index in 0..50 {
        let status = if index % 2 == 0 {
            SubscriberStatus::Active
        } else {
            SubscriberStatus::Inactive
        };
        test_app
            .seed_subscriber(type_id, &format!("reader{}@example.com", index), status)
            .await;
    }

    type_id
}

#[tokio::test]
async fn pages_are_computed_over_the_filtered_rows() {
    let test_app = TestApp::spawn_app().await;
    seed_mixed_subscribers(&test_app).await;

    let response = test_app
        .get_subscribers(&[
            ("status", String::from("ACTIVE")),
            ("pageNo", String::from("3")),
            ("pageSize", String::from("10")),
        ])
        .await;

    assert_eq!(200, response.status().as_u16());
    let page: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert_eq!(page["data"].as_array().unwrap().len(), 5);
    assert_eq!(page["totalData"], 25);
    assert_eq!(page["totalPage"], 3);
    assert_eq!(page["pageNo"], 3);
    assert!(page["data"]
        .as_array()
        .unwrap()
        .iter()
        .all(|subscriber| subscriber["status"] == "ACTIVE"));
}

#[tokio::test]
async fn page_past_the_end_is_empty() {
    let test_app = TestApp::spawn_app().await;
    seed_mixed_subscribers(&test_app).await;

    let response = test_app
        .get_subscribers(&[
            ("status", String::from("active")),
            ("pageNo", String::from("10")),
            ("pageSize", String::from("10")),
        ])
        .await;

    assert_eq!(200, response.status().as_u16());
    let page: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert!(page["data"].as_array().unwrap().is_empty());
    assert_eq!(page["totalPage"], 3);
}

#[tokio::test]
async fn oversized_pages_are_capped() {
    let test_app = TestApp::spawn_app().await;
    seed_mixed_subscribers(&test_app).await;

    let response = test_app
        .get_subscribers(&[("pageSize", String::from("500"))])
        .await;

    let page: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert_eq!(page["pageSize"], 100);
    assert_eq!(page["data"].as_array().unwrap().len(), 50);
}

#[tokio::test]
async fn invalid_list_parameters_return_400() {
    let test_app = TestApp::spawn_app().await;
    let test_cases = vec![
        (vec![("pageNo", String::from("0"))], "page number 0"),
        (vec![("pageSize", String::from("0"))], "page size 0"),
        (vec![("status", String::from("SLEEPING"))], "unknown status"),
    ];

    for (query, description) in test_cases {
        let response = test_app.get_subscribers(&query).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request for {}.",
            description
        );
    }
}

#[tokio::test]
async fn subscribers_of_other_owners_are_not_listed() {
    let test_app = TestApp::spawn_app().await;
    seed_mixed_subscribers(&test_app).await;

    let response = test_app
        .api_client
        .get(format!("{}/subscribers", test_app.address))
        .header("X-Owner-Id", uuid::Uuid::new_v4().to_string())
        .send()
        .await
        .expect("Failed to execute request.");

    let page: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert_eq!(page["totalData"], 0);
}

#[tokio::test]
async fn status_change_is_persisted() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;
    let subscriber_id = test_app
        .seed_subscriber(type_id, "reader@example.com", SubscriberStatus::Active)
        .await;

    let response = test_app
        .put_subscriber_status(subscriber_id, "blocked")
        .await;

    assert_eq!(200, response.status().as_u16());
    let subscriber: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert_eq!(subscriber["status"], "BLOCKED");
    assert_eq!(
        test_app.store.subscribers().await[0].status,
        SubscriberStatus::Blocked
    );
}

#[tokio::test]
async fn invalid_status_change_returns_400_and_unknown_subscriber_404() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;
    let subscriber_id = test_app
        .seed_subscriber(type_id, "reader@example.com", SubscriberStatus::Active)
        .await;

    let invalid = test_app
        .put_subscriber_status(subscriber_id, "SLEEPING")
        .await;
    let unknown = test_app
        .put_subscriber_status(uuid::Uuid::new_v4(), "BLOCKED")
        .await;

    assert_eq!(400, invalid.status().as_u16());
    assert_eq!(404, unknown.status().as_u16());
}

#[tokio::test]
async fn deleted_subscriber_disappears_from_lists() {
    let test_app = TestApp::spawn_app().await;
    let type_id = test_app.seed_newsletter_type(NewsletterTypeStatus::Active).await;
    let subscriber_id = test_app
        .seed_subscriber(type_id, "reader@example.com", SubscriberStatus::Active)
        .await;

    let deleted = test_app.delete_subscriber(subscriber_id).await;
    let deleted_again = test_app.delete_subscriber(subscriber_id).await;
    let response = test_app.get_subscribers(&[]).await;

    assert_eq!(204, deleted.status().as_u16());
    assert_eq!(404, deleted_again.status().as_u16());
    let page: serde_json::Value = response.json().await.expect("Invalid JSON body.");
    assert_eq!(page["totalData"], 0);
    assert!(test_app.store.subscribers().await[0].deleted_at.is_some());
}
