use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::{
        checkout_form::{CheckoutForm, FormPage, ORDER_RECEIVED_TEXT},
        payments::{IntentCreationResult, PaymentResult},
    },
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Card submission posted by the storefront after tokenizing the card.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "methodToken": "pm_abc123",
    "cart_id": "550e8400-e29b-41d4-a716-446655440000"
}))]
pub struct ProcessPaymentRequest {
    /// Payment method token created in the browser with the public key
    #[serde(rename = "methodToken", alias = "cynder_paymongo_method_id", default)]
    pub method_token: Option<String>,
    /// Cart to clear once the order is paid
    #[serde(default)]
    pub cart_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckoutFormQuery {
    /// `checkout` (default) or `order_pay`
    #[serde(default)]
    pub page: FormPage,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReceivedTextQuery {
    /// Text used when the order was not paid through this gateway
    pub default: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReceivedTextResponse {
    pub text: String,
}

/// Create (or return) the payment intent for a submitted order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/payment-intent",
    params(("order_id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Intent linked, skipped or failed with notices", body = IntentCreationResult),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state.payments.on_order_submitted(order_id).await?;
    Ok(Json(result))
}

/// Attach the tokenized card to the order's intent
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/payment",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = ProcessPaymentRequest,
    responses(
        (status = 200, description = "Success with redirect, or failure with notices", body = PaymentResult),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn process_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ProcessPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state
        .payments
        .process_payment(order_id, request.method_token.as_deref(), request.cart_id)
        .await?;
    Ok(Json(result))
}

/// Everything the browser needs to render the card form
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}/checkout-form",
    params(("order_id" = Uuid, Path, description = "Order id"), CheckoutFormQuery),
    responses(
        (status = 200, description = "Card form parameters", body = CheckoutForm),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 503, description = "Card form not offered", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout_form(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Query(query): Query<CheckoutFormQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state.payments.orders();
    let order = orders.get_order(order_id).await?;
    let order_pay_url = orders.payment_url(&order);

    let form = state
        .checkout_form
        .form_for(&order, query.page, Some(order_pay_url))
        .map_err(|reason| {
            warn!(%order_id, %reason, "Card form not offered");
            ServiceError::ServiceUnavailable(reason.to_string())
        })?;
    Ok(Json(form))
}

/// Thank-you page heading for the order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}/received-text",
    params(("order_id" = Uuid, Path, description = "Order id"), ReceivedTextQuery),
    responses(
        (status = 200, description = "Heading text", body = ReceivedTextResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn order_received_text(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Query(query): Query<ReceivedTextQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.payments.orders().get_order(order_id).await?;
    let default_text = query.default.as_deref().unwrap_or(ORDER_RECEIVED_TEXT);
    Ok(Json(ReceivedTextResponse {
        text: state.checkout_form.order_received_text(&order, default_text),
    }))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/:order_id/payment-intent", post(create_payment_intent))
        .route("/:order_id/payment", post(process_payment))
        .route("/:order_id/checkout-form", get(checkout_form))
        .route("/:order_id/received-text", get(order_received_text))
}
