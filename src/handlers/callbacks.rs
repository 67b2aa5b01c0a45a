//! Browser and processor callbacks under `/paymongo`.

use crate::{
    errors::{Notice, ServiceError},
    handlers::AppState,
    services::payments::{RedirectOutcome, SourceRedirectStatus, WebhookOutcome},
    webhooks::{verify_signature, WebhookError, WebhookEvent, SIGNATURE_HEADER},
};
use axum::{
    extract::{Json, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RedirectQuery {
    /// Order the customer is returning for
    pub order: Uuid,
    /// Intent id echoed back by the processor
    pub intent: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SourceRedirectQuery {
    pub order: Uuid,
    pub status: SourceRedirectStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

/// Customer returns from a next-action step (3-D Secure)
#[utoipa::path(
    get,
    path = "/paymongo/redirect",
    params(RedirectQuery),
    responses(
        (status = 303, description = "Redirect to the thank-you or payment page"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Callbacks"
)]
pub async fn payment_redirect(
    State(state): State<AppState>,
    Query(query): Query<RedirectQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .payments
        .resume_after_redirect(query.order, query.intent.as_deref())
        .await?;
    Ok(see_other(outcome))
}

/// Customer returns from an alternate payment source
#[utoipa::path(
    get,
    path = "/paymongo/source-redirect",
    params(SourceRedirectQuery),
    responses(
        (status = 303, description = "Redirect to the thank-you or payment page"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Callbacks"
)]
pub async fn source_redirect(
    State(state): State<AppState>,
    Query(query): Query<SourceRedirectQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .payments
        .resume_after_source_redirect(query.order, query.status)
        .await?;
    Ok(see_other(outcome))
}

// POST /paymongo/webhook
#[utoipa::path(
    post,
    path = "/paymongo/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookAck),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Callbacks"
)]
pub async fn paymongo_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let credentials = state.gateway.credentials();
    let secret = credentials.webhook_secret.ok_or_else(|| {
        warn!(
            mode = credentials.mode.as_str(),
            "Webhook received but no signing secret is configured"
        );
        ServiceError::Unauthorized("webhook signing secret not configured".to_string())
    })?;

    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized(WebhookError::MissingHeader))?;

    verify_signature(
        header,
        &body,
        secret,
        credentials.mode,
        state.gateway.webhook_tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
    .map_err(unauthorized)?;

    let event = WebhookEvent::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    info!(event_id = %event.id, event_type = event.kind.as_str(), "Webhook verified");

    let outcome = state.payments.handle_webhook(&event).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

fn unauthorized(err: WebhookError) -> ServiceError {
    warn!(error = %err, "Webhook signature verification failed");
    ServiceError::Unauthorized(format!("invalid webhook signature: {}", err))
}

fn see_other(outcome: RedirectOutcome) -> Redirect {
    Redirect::to(&with_notices(&outcome.location, &outcome.notices))
}

/// Appends each notice as a repeated `notice` query parameter.
fn with_notices(location: &str, notices: &[Notice]) -> String {
    if notices.is_empty() {
        return location.to_string();
    }
    match Url::parse(location) {
        Ok(mut url) => {
            {
                let mut pairs = url.query_pairs_mut();
                for notice in notices {
                    pairs.append_pair("notice", &notice.message);
                }
            }
            url.to_string()
        }
        Err(e) => {
            warn!(location, error = %e, "Redirect location is not an absolute URL; dropping notices");
            location.to_string()
        }
    }
}

pub fn callback_routes() -> Router<AppState> {
    Router::new()
        .route("/redirect", get(payment_redirect))
        .route("/source-redirect", get(source_redirect))
        .route("/webhook", post(paymongo_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_become_repeated_query_params() {
        let location = with_notices(
            "https://shop.example/checkout/order-pay/1?pay_for_order=true",
            &[Notice::error("Card declined"), Notice::error("Try again")],
        );
        let url = Url::parse(&location).unwrap();
        let notices: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "notice")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(notices, vec!["Card declined", "Try again"]);
        assert!(location.contains("pay_for_order=true"));
    }

    #[test]
    fn location_without_notices_is_untouched() {
        assert_eq!(with_notices("/relative", &[]), "/relative");
        assert_eq!(
            with_notices("/relative", &[Notice::generic()]),
            "/relative"
        );
    }
}
