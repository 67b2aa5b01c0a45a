//! PayMongo REST client against a mock processor.

mod common;

use assert_matches::assert_matches;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{intent_json, processor_error};
use paymongo_checkout::{
    config::GatewayConfig,
    paymongo::{
        AttachParams, CreateIntentParams, IntentStatus, PaymentProcessor, PaymongoClient,
        ProcessorError,
    },
};
use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client(server: &MockServer) -> PaymongoClient {
    PaymongoClient::new(&GatewayConfig {
        api_base_url: server.uri(),
        fetch_retry_delay_ms: 5,
        ..GatewayConfig::default()
    })
    .expect("client")
}

#[tokio::test]
async fn create_intent_uses_basic_auth_and_the_data_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(header(
            "authorization",
            format!("Basic {}", STANDARD.encode("sk_test_abc")).as_str(),
        ))
        .and(body_json(json!({
            "data": {"attributes": {
                "amount": 150_050,
                "payment_method_allowed": ["card"],
                "currency": "PHP",
                "description": "Sari-Sari - 42"
            }}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(intent_json(
                "pi_1",
                "awaiting_payment_method",
                &[],
                None,
            )),
        )
        .expect(1)
        .mount(&server)
        .await;

    let intent = client(&server)
        .create_intent(
            &CreateIntentParams::card(150_050, "PHP", "Sari-Sari - 42"),
            "sk_test_abc",
        )
        .await
        .unwrap();

    assert_eq!(intent.id, "pi_1");
    assert_eq!(intent.status, IntentStatus::AwaitingPaymentMethod);
    assert_eq!(intent.client_key.as_deref(), Some("pi_1_client_secret"));
}

#[tokio::test]
async fn fetch_intent_is_retried_once_after_a_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(intent_json(
                "pi_1",
                "succeeded",
                &["pay_1"],
                None,
            )),
        )
        .expect(1)
        .mount(&server)
        .await;

    let intent = client(&server)
        .fetch_intent("pi_1", "sk_test_abc")
        .await
        .unwrap();

    assert_eq!(intent.status, IntentStatus::Succeeded);
    assert_eq!(intent.first_payment_id(), Some("pay_1"));
}

#[tokio::test]
async fn fetch_intent_gives_up_after_the_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_1"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let result = client(&server).fetch_intent("pi_1", "sk_test_abc").await;

    assert_matches!(
        result,
        Err(ProcessorError::UnexpectedResponse { status: 502, .. })
    );
}

#[tokio::test]
async fn attach_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents/pi_1/attach"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let params = AttachParams {
        payment_method: "pm_1".into(),
        return_url: "https://shop.example/paymongo/redirect".into(),
    };
    let result = client(&server)
        .attach_method("pi_1", &params, "sk_test_abc")
        .await;

    assert_matches!(
        result,
        Err(ProcessorError::UnexpectedResponse { status: 503, .. })
    );
}

#[tokio::test]
async fn structured_errors_become_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents/pi_1/attach"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(processor_error("card_declined", "Your card was declined.")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let params = AttachParams {
        payment_method: "pm_1".into(),
        return_url: "https://shop.example/paymongo/redirect".into(),
    };
    let err = client(&server)
        .attach_method("pi_1", &params, "sk_test_abc")
        .await
        .unwrap_err();

    assert_matches!(err, ProcessorError::Rejected(details) => {
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].code.as_deref(), Some("card_declined"));
        assert_eq!(details[0].detail, "Your card was declined.");
    });
}

#[tokio::test]
async fn unreachable_processor_is_a_transport_error() {
    let client = PaymongoClient::new(&GatewayConfig {
        api_base_url: "http://127.0.0.1:1".into(),
        fetch_retry_delay_ms: 1,
        connect_timeout_secs: 1,
        request_timeout_secs: 2,
        ..GatewayConfig::default()
    })
    .unwrap();

    let result = client
        .create_intent(&CreateIntentParams::card(100, "PHP", "x"), "sk_test_abc")
        .await;
    assert_matches!(result, Err(ProcessorError::Transport(_)));
}
