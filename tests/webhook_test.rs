//! Signed webhook deliveries through `/paymongo/webhook`.

mod common;

use axum::http::{Method, StatusCode};
use common::{
    assert_status, intent_json, location, response_json, signature_header, webhook_event,
    TestApp, HOME_URL, LIVE_WEBHOOK_SECRET, TEST_WEBHOOK_SECRET,
};
use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

#[tokio::test]
async fn unsigned_delivery_is_rejected() {
    let app = TestApp::new().await;
    let payload = webhook_event("evt_1", "payment.paid", false, "pay_1", "pi_1");

    let response = app.post_webhook(&payload, None).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_secret_is_rejected() {
    let app = TestApp::new().await;
    let order_id = app.seed_order_with(dec!(99.00), Some("pi_1")).await;
    let payload = webhook_event("evt_1", "payment.paid", false, "pay_1", "pi_1");

    let response = app
        .post_webhook(&payload, Some(signature_header("not-the-secret", &payload, false)))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    assert_eq!(app.order(order_id).await.payment_status, "pending");
}

#[tokio::test]
async fn live_signature_does_not_authenticate_test_mode() {
    let app = TestApp::new().await;
    let payload = webhook_event("evt_1", "payment.paid", false, "pay_1", "pi_1");

    let response = app
        .post_webhook(&payload, Some(signature_header(LIVE_WEBHOOK_SECRET, &payload, true)))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_signing_secret_rejects_everything() {
    let app = TestApp::with_gateway(|g| g.test_webhook_secret_key = None).await;
    let payload = webhook_event("evt_1", "payment.paid", false, "pay_1", "pi_1");

    let response = app
        .post_webhook(&payload, Some(signature_header(TEST_WEBHOOK_SECRET, &payload, false)))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn payment_paid_finalizes_once_and_dedupes_replays() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("MUG-1", Some(5)).await;
    let order_id = app.seed_order_with(dec!(99.00), Some("pi_1")).await;
    app.add_line_item(order_id, product_id, 1).await;
    let payload = webhook_event("evt_1", "payment.paid", false, "pay_wh", "pi_1");

    let response = app
        .post_webhook(&payload, Some(signature_header(TEST_WEBHOOK_SECRET, &payload, false)))
        .await;
    assert_status(&response, StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body, json!({"received": true, "outcome": "finalized"}));

    let order = app.order(order_id).await;
    assert_eq!(order.payment_status, "paid");
    assert_eq!(order.transaction_id.as_deref(), Some("pay_wh"));
    assert_eq!(app.product(product_id).await.stock_quantity, Some(4));

    let replay = app
        .post_webhook(&payload, Some(signature_header(TEST_WEBHOOK_SECRET, &payload, false)))
        .await;
    assert_eq!(response_json(replay).await["outcome"], "duplicate");

    // A different event for the same payment is applied but changes nothing.
    let other = webhook_event("evt_2", "payment.paid", false, "pay_wh", "pi_1");
    let response = app
        .post_webhook(&other, Some(signature_header(TEST_WEBHOOK_SECRET, &other, false)))
        .await;
    assert_eq!(response_json(response).await["outcome"], "finalized");
    assert_eq!(app.product(product_id).await.stock_quantity, Some(4));
    assert_eq!(app.notifier.sent().len(), 1);
}

#[tokio::test]
async fn live_events_are_ignored_in_test_mode() {
    let app = TestApp::new().await;
    let order_id = app.seed_order_with(dec!(99.00), Some("pi_1")).await;
    let payload = webhook_event("evt_live", "payment.paid", true, "pay_1", "pi_1");

    let response = app
        .post_webhook(&payload, Some(signature_header(TEST_WEBHOOK_SECRET, &payload, false)))
        .await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(response_json(response).await["outcome"], "ignored");
    assert_eq!(app.order(order_id).await.payment_status, "pending");
}

#[tokio::test]
async fn payment_failed_marks_the_order_failed() {
    let app = TestApp::new().await;
    let order_id = app.seed_order_with(dec!(99.00), Some("pi_1")).await;
    let payload = webhook_event("evt_f", "payment.failed", false, "pay_1", "pi_1");

    let response = app
        .post_webhook(&payload, Some(signature_header(TEST_WEBHOOK_SECRET, &payload, false)))
        .await;
    assert_eq!(response_json(response).await["outcome"], "marked_failed");

    let order = app.order(order_id).await;
    assert_eq!(order.payment_status, "failed");
    assert_eq!(order.status, "pending");
}

#[tokio::test]
async fn events_for_unknown_intents_are_acknowledged() {
    let app = TestApp::new().await;
    let payload = webhook_event("evt_x", "payment.paid", false, "pay_1", "pi_nobody");

    let response = app
        .post_webhook(&payload, Some(signature_header(TEST_WEBHOOK_SECRET, &payload, false)))
        .await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(response_json(response).await["outcome"], "ignored");
}

#[tokio::test]
async fn signed_but_malformed_body_is_a_bad_request() {
    let app = TestApp::new().await;
    let payload = json!({"data": {"id": "evt_bad"}});

    let response = app
        .post_webhook(&payload, Some(signature_header(TEST_WEBHOOK_SECRET, &payload, false)))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redirect_racing_webhooks_finalizes_once() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("MUG-1", Some(5)).await;
    let order_id = app.seed_order_with(dec!(99.00), Some("pi_1")).await;
    app.add_line_item(order_id, product_id, 2).await;

    // Queried only if the redirect gets in before either webhook.
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(intent_json("pi_1", "succeeded", &["pay_1"], None)),
        )
        .mount(&app.processor)
        .await;

    let first = webhook_event("evt_a", "payment.paid", false, "pay_1", "pi_1");
    let second = webhook_event("evt_b", "payment.paid", false, "pay_1", "pi_1");
    let redirect_uri = format!("/paymongo/redirect?order={}&intent=pi_1", order_id);

    let (redirect, hook_a, hook_b) = tokio::join!(
        app.request(Method::GET, &redirect_uri, None),
        app.post_webhook(&first, Some(signature_header(TEST_WEBHOOK_SECRET, &first, false))),
        app.post_webhook(&second, Some(signature_header(TEST_WEBHOOK_SECRET, &second, false))),
    );

    assert_status(&redirect, StatusCode::SEE_OTHER);
    assert!(location(&redirect)
        .starts_with(&format!("{}/checkout/order-received/{}", HOME_URL, order_id)));
    assert_status(&hook_a, StatusCode::OK);
    assert_status(&hook_b, StatusCode::OK);

    let order = app.order(order_id).await;
    assert_eq!(order.payment_status, "paid");
    assert_eq!(order.transaction_id.as_deref(), Some("pay_1"));
    assert_eq!(app.product(product_id).await.stock_quantity, Some(3));
    assert_eq!(app.notifier.sent().len(), 1);
}
