#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use paymongo_checkout::{
    app_router,
    config::{AppConfig, GatewayConfig, StoreConfig},
    entities::{
        cart, cart_item,
        order::{self, OrderStatus, PaymentStatus},
        order_item, product,
    },
    events::{self, EventSender, InvoiceRequest},
    migrator::Migrator,
    notifications::{InvoiceNotifier, NotificationError},
    paymongo::{PaymongoClient, GATEWAY_ID},
    webhooks::compute_signature,
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

pub const TEST_SECRET_KEY: &str = "sk_test_checkout";
pub const TEST_PUBLIC_KEY: &str = "pk_test_checkout";
pub const LIVE_SECRET_KEY: &str = "sk_live_checkout";
pub const LIVE_PUBLIC_KEY: &str = "pk_live_checkout";
pub const TEST_WEBHOOK_SECRET: &str = "whsk_test_checkout";
pub const LIVE_WEBHOOK_SECRET: &str = "whsk_live_checkout";
pub const HOME_URL: &str = "https://shop.example";

/// Invoice notifier that records deliveries; can be switched to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<InvoiceRequest>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<InvoiceRequest> {
        self.sent.lock().expect("notifier lock").clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("notifier lock") = failing;
    }
}

#[async_trait]
impl InvoiceNotifier for RecordingNotifier {
    async fn send_invoice(&self, invoice: &InvoiceRequest) -> Result<(), NotificationError> {
        if *self.failing.lock().expect("notifier lock") {
            return Err(NotificationError::Unavailable("mailer down".into()));
        }
        self.sent.lock().expect("notifier lock").push(invoice.clone());
        Ok(())
    }
}

/// Application wired to an in-memory SQLite database and a mock PayMongo API.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub processor: MockServer,
    pub notifier: Arc<RecordingNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Gateway enabled in test mode with both credential sets configured.
    pub async fn new() -> Self {
        Self::with_gateway(|_| {}).await
    }

    pub async fn with_gateway(configure: impl FnOnce(&mut GatewayConfig)) -> Self {
        let processor = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.store = StoreConfig {
            name: "Sari-Sari".to_string(),
            home_url: HOME_URL.to_string(),
        };
        cfg.paymongo = GatewayConfig {
            enabled: true,
            test_mode: true,
            test_public_key: TEST_PUBLIC_KEY.to_string(),
            test_secret_key: TEST_SECRET_KEY.to_string(),
            live_public_key: LIVE_PUBLIC_KEY.to_string(),
            live_secret_key: LIVE_SECRET_KEY.to_string(),
            test_webhook_secret_key: Some(TEST_WEBHOOK_SECRET.to_string()),
            webhook_secret_key: Some(LIVE_WEBHOOK_SECRET.to_string()),
            api_base_url: processor.uri(),
            fetch_retry_delay_ms: 10,
            ..GatewayConfig::default()
        };
        configure(&mut cfg.paymongo);

        let mut opt = ConnectOptions::new(cfg.database_url.clone());
        opt.max_connections(1).sqlx_logging(false);
        let db = Database::connect(opt)
            .await
            .expect("failed to open in-memory database");
        Migrator::up(&db, None)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(db);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let client = PaymongoClient::new(&cfg.paymongo).expect("processor client");
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState::new(
            db.clone(),
            cfg,
            Arc::new(client),
            notifier.clone(),
            event_sender,
        );
        let router = app_router(state.clone());

        Self {
            router,
            state,
            db,
            processor,
            notifier,
            _event_task: event_task,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };
        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// POSTs a webhook body signed for the given mode's secret.
    pub async fn post_webhook(&self, payload: &Value, signature_header: Option<String>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/paymongo/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(sig) = signature_header {
            builder = builder.header("Paymongo-Signature", sig);
        }
        let body = serde_json::to_vec(payload).expect("webhook json");
        self.send(builder.body(Body::from(body)).expect("webhook request"))
            .await
    }

    pub async fn seed_order(&self, total: Decimal) -> Uuid {
        self.seed_order_with(total, None).await
    }

    /// Inserts a pending order paid through this gateway, optionally already
    /// linked to an intent.
    pub async fn seed_order_with(&self, total: Decimal, intent_id: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(id),
            order_number: Set("1001".into()),
            order_key: Set("wc_order_k3y".into()),
            customer_email: Set(Some("buyer@example.com".into())),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            payment_method: Set(Some(GATEWAY_ID.into())),
            total_amount: Set(total),
            currency: Set("PHP".into()),
            transaction_id: Set(None),
            paymongo_payment_intent_id: Set(intent_id.map(str::to_string)),
            paymongo_client_key: Set(intent_id.map(|id| format!("{}_client_secret", id))),
            stock_reduced: Set(false),
            invoice_sent_at: Set(None),
            billing_first_name: Set(Some("Juan".into())),
            billing_last_name: Set(Some("Dela Cruz".into())),
            billing_email: Set(Some("buyer@example.com".into())),
            billing_phone: Set(None),
            billing_line1: Set(Some("1 Ayala Ave".into())),
            billing_line2: Set(None),
            billing_city: Set(Some("Makati".into())),
            billing_state: Set(Some("Metro Manila".into())),
            billing_postal_code: Set(Some("1226".into())),
            billing_country: Set(Some("PH".into())),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed order");
        id
    }

    pub async fn seed_product(&self, sku: &str, stock: Option<i32>) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            sku: Set(sku.into()),
            name: Set(format!("Product {}", sku)),
            stock_quantity: Set(stock),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        id
    }

    pub async fn add_line_item(&self, order_id: Uuid, product_id: Uuid, quantity: i32) {
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(Some(product_id)),
            sku: Set("SKU".into()),
            name: Set("Line".into()),
            quantity: Set(quantity),
            unit_price: Set(Decimal::new(10_000, 2)),
        }
        .insert(&*self.db)
        .await
        .expect("seed line item");
    }

    /// Active cart holding one line of the product.
    pub async fn seed_cart(&self, product_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        cart::ActiveModel {
            id: Set(id),
            session_id: Set("sess_1".into()),
            status: Set(cart::STATUS_ACTIVE.into()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed cart");
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(id),
            product_id: Set(product_id),
            quantity: Set(1),
        }
        .insert(&*self.db)
        .await
        .expect("seed cart item");
        id
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn cart(&self, id: Uuid) -> cart::Model {
        cart::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load cart")
            .expect("cart exists")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

pub fn assert_status(response: &Response, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status");
}

/// Processor JSON for a payment intent.
pub fn intent_json(id: &str, status: &str, payments: &[&str], redirect: Option<&str>) -> Value {
    let payments: Vec<Value> = payments
        .iter()
        .map(|p| json!({"id": p, "type": "payment", "attributes": {"status": "paid"}}))
        .collect();
    let next_action = redirect.map(|url| {
        json!({"type": "redirect", "redirect": {"url": url, "return_url": format!("{}/paymongo/redirect", HOME_URL)}})
    });
    json!({
        "data": {
            "id": id,
            "type": "payment_intent",
            "attributes": {
                "amount": 10_000,
                "currency": "PHP",
                "status": status,
                "client_key": format!("{}_client_secret", id),
                "payments": payments,
                "next_action": next_action
            }
        }
    })
}

pub fn processor_error(code: &str, detail: &str) -> Value {
    json!({"errors": [{"code": code, "detail": detail}]})
}

/// Webhook body in the processor's event envelope.
pub fn webhook_event(
    event_id: &str,
    event_type: &str,
    livemode: bool,
    payment_id: &str,
    intent_id: &str,
) -> Value {
    json!({
        "data": {
            "id": event_id,
            "type": "event",
            "attributes": {
                "type": event_type,
                "livemode": livemode,
                "data": {
                    "id": payment_id,
                    "type": "payment",
                    "attributes": {
                        "payment_intent_id": intent_id,
                        "failed_message": "Card was declined"
                    }
                }
            }
        }
    })
}

pub fn signature_header(secret: &str, payload: &Value, live: bool) -> String {
    let ts = Utc::now().timestamp();
    let body = serde_json::to_vec(payload).expect("webhook json");
    let sig = compute_signature(secret, ts, &body).expect("signature");
    if live {
        format!("t={},te=,li={}", ts, sig)
    } else {
        format!("t={},te={},li=", ts, sig)
    }
}
