use crate::handlers::{callbacks, checkout, health};
use axum::{response::Json, routing::get, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PayMongo Checkout",
        version = "1.0.0",
        description = r#"
Card payments for storefront checkout through PayMongo payment intents.

The storefront creates an intent when an order is submitted, tokenizes the
card in the browser with the public key and posts only the method token back.
Processor redirects and webhooks land under `/paymongo`.

Checkout failures are reported as customer notices, not as HTTP errors:

```json
{
  "result": "failure",
  "notices": [{ "level": "error", "message": "The card was declined." }]
}
```
"#
    ),
    tags(
        (name = "Checkout", description = "Intent creation, card submission and checkout form"),
        (name = "Callbacks", description = "Customer redirects and processor webhooks"),
        (name = "Health", description = "Liveness and database checks")
    ),
    paths(
        checkout::create_payment_intent,
        checkout::process_payment,
        checkout::checkout_form,
        checkout::order_received_text,
        callbacks::payment_redirect,
        callbacks::source_redirect,
        callbacks::paymongo_webhook,
        health::health_check,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::errors::Notice,
        crate::errors::NoticeLevel,
        crate::services::payments::PaymentResult,
        crate::services::payments::PaymentResultKind,
        crate::services::payments::IntentCreationResult,
        crate::services::payments::IntentLink,
        crate::services::payments::SourceRedirectStatus,
        crate::services::payments::WebhookOutcome,
        crate::services::checkout_form::CheckoutForm,
        crate::services::checkout_form::CheckoutFormParams,
        crate::services::checkout_form::BillingDetails,
        crate::services::checkout_form::FormPage,
        checkout::ProcessPaymentRequest,
        checkout::ReceivedTextResponse,
        callbacks::WebhookAck,
    ))
)]
pub struct ApiDoc;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
