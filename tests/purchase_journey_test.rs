//! The whole purchase path in one scenario: cart to hosted session to
//! webhook fulfillment.

mod common;

use academy_api::entities::{profile, purchase};
use academy_api::services::checkout::CreateSessionInput;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{build_app, seed_course, sign_webhook, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use tower::util::ServiceExt;

#[tokio::test]
async fn guest_buys_two_courses_and_ends_up_enrolled() {
    let app = build_app().await;
    seed_course(&app.db, "c1", dec!(30.00), None).await;
    seed_course(&app.db, "c2", dec!(45.00), None).await;

    // Checkout: guest cart with both courses
    let checkout = app
        .state
        .services
        .checkout
        .create_session(CreateSessionInput {
            course_ids: vec!["c1".into(), "c2".into()],
            user_id: None,
            email: None,
        })
        .await
        .unwrap();
    assert_eq!(checkout.session_id, "cs_test_123");

    let (success_url, metadata_course_ids) = {
        let requests = app.payment.requests.lock().unwrap();
        (
            requests[0].success_url.clone(),
            requests[0].metadata_course_ids.clone(),
        )
    };
    assert!(success_url.ends_with("total=75.00"));

    // Payment completes; the processor notifies us with the metadata we
    // attached at session creation
    let body = serde_json::to_vec(&json!({
        "id": "evt_journey_1",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": checkout.session_id,
                "customer_details": { "email": "buyer@example.com", "name": "Ada Lovelace" },
                "metadata": { "course_ids": metadata_course_ids, "type": "multi_course_purchase" },
                "amount_total": 7500,
                "payment_status": "paid"
            }
        }
    }))
    .unwrap();

    let response = academy_api::app(app.state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/payments/webhook")
                .header("content-type", "application/json")
                .header("Stripe-Signature", sign_webhook(&body, WEBHOOK_SECRET))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // One account, one profile, one credentials email, two entitlements
    assert_eq!(app.identity.created.lock().unwrap().len(), 1);
    assert_eq!(app.mail.sent.lock().unwrap().len(), 1);

    let profiles = profile::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].email, "buyer@example.com");

    let purchases = purchase::Entity::find().all(&*app.db).await.unwrap();
    let mut courses: Vec<&str> = purchases.iter().map(|p| p.course_id.as_str()).collect();
    courses.sort();
    assert_eq!(courses, vec!["c1", "c2"]);
    assert!(purchases.iter().all(|p| p.payment_reference == "cs_test_123"));
}
