//! Payment intent lifecycle orchestration.
//!
//! Every entry point (order submission, card submission, attach redirect,
//! source redirect, webhook) funnels into the same transition tables and the
//! same idempotent finalizer. Checkout failures are turned into customer
//! notices here; only storage failures and unknown orders escape as errors.

use crate::{
    config::{GatewayConfig, GatewayMode, StoreConfig},
    db::DbPool,
    entities::{
        order::Model as OrderModel,
        processed_webhook_event::{self, Entity as ProcessedWebhookEventEntity},
    },
    errors::{CheckoutError, Notice, ServiceError},
    events::{Event, EventSender},
    notifications::InvoiceNotifier,
    paymongo::{AttachParams, CreateIntentParams, IntentStatus, PaymentProcessor, CURRENCY, GATEWAY_ID},
    services::{
        finalizer::{FinalizeContext, OrderFinalizer},
        intent_lifecycle::{after_attach, after_resume, Transition},
        orders::OrderService,
    },
    webhooks::{WebhookEvent, WebhookEventType},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{sea_query::OnConflict, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Converts an order total to the processor's minor units (centavos),
/// rounding half away from zero. Non-positive totals never reach the processor.
pub fn amount_in_minor_units(total: Decimal) -> Result<i64, CheckoutError> {
    if total <= Decimal::ZERO {
        return Err(CheckoutError::Validation(format!(
            "order total must be positive, got {}",
            total
        )));
    }

    (total * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .filter(|amount| *amount > 0)
        .ok_or_else(|| {
            CheckoutError::Validation(format!("order total {} cannot be charged", total))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentResultKind {
    Success,
    Failure,
}

/// Answer to a card submission, in the shape storefront checkout scripts expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentResult {
    pub result: PaymentResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    pub notices: Vec<Notice>,
}

impl PaymentResult {
    pub fn success(redirect: impl Into<String>) -> Self {
        Self {
            result: PaymentResultKind::Success,
            redirect: Some(redirect.into()),
            notices: Vec::new(),
        }
    }

    pub fn failure(notices: Vec<Notice>) -> Self {
        Self {
            result: PaymentResultKind::Failure,
            redirect: None,
            notices,
        }
    }
}

/// Where to send a returning customer, and what to tell them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectOutcome {
    pub location: String,
    pub notices: Vec<Notice>,
}

impl RedirectOutcome {
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            notices: Vec::new(),
        }
    }

    pub fn with_notices(location: impl Into<String>, notices: Vec<Notice>) -> Self {
        Self {
            location: location.into(),
            notices,
        }
    }
}

/// Intent linked to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IntentLink {
    pub order_id: Uuid,
    pub intent_id: String,
    pub client_key: String,
    /// False when the order already had an intent
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IntentCreationResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentLink>,
    pub notices: Vec<Notice>,
}

/// `status` reported by an alternate payment source redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceRedirectStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Finalized,
    MarkedFailed,
    Ignored,
    Duplicate,
}

enum Settlement {
    Paid,
    Redirect(String),
    Retry,
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    db_pool: Arc<DbPool>,
    gateway: Arc<GatewayConfig>,
    processor: Arc<dyn PaymentProcessor>,
    orders: OrderService,
    finalizer: OrderFinalizer,
    event_sender: EventSender,
}

impl PaymentOrchestrator {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<GatewayConfig>,
        store: StoreConfig,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn InvoiceNotifier>,
        event_sender: EventSender,
    ) -> Self {
        let orders = OrderService::new(db_pool.clone(), store);
        let finalizer = OrderFinalizer::new(
            db_pool.clone(),
            orders.clone(),
            notifier,
            event_sender.clone(),
        );
        Self {
            db_pool,
            gateway,
            processor,
            orders,
            finalizer,
            event_sender,
        }
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    pub fn gateway(&self) -> &GatewayConfig {
        &self.gateway
    }

    /// Order-submitted hook: creates the order's intent, converting checkout
    /// failures into notices.
    pub async fn on_order_submitted(
        &self,
        order_id: Uuid,
    ) -> Result<IntentCreationResult, ServiceError> {
        match self.create_intent_for_order(order_id).await {
            Ok(intent) => Ok(IntentCreationResult {
                intent,
                notices: Vec::new(),
            }),
            Err(ServiceError::Checkout(err)) => {
                log_checkout_failure(order_id, &err);
                Ok(IntentCreationResult {
                    intent: None,
                    notices: err.notices(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Creates a payment intent for the order and links it, at most once per
    /// order. Returns `None` when the order is not paid through this gateway.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn create_intent_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<IntentLink>, ServiceError> {
        if !self.gateway.enabled {
            info!("Gateway disabled; no intent created");
            return Ok(None);
        }

        let order = self.orders.get_order(order_id).await?;
        if !order.uses_gateway(GATEWAY_ID) {
            info!(payment_method = ?order.payment_method, "Order uses another payment method");
            return Ok(None);
        }
        if let Some(link) = existing_link(&order) {
            info!(intent_id = %link.intent_id, "Order already has a payment intent");
            return Ok(Some(link));
        }

        let amount = amount_in_minor_units(order.total_amount)?;
        let params = CreateIntentParams::card(
            amount,
            CURRENCY,
            format!("{} - {}", self.orders.store().name, order.id),
        );
        let credentials = self.gateway.credentials();
        let intent = self
            .processor
            .create_intent(&params, credentials.secret_key)
            .await
            .map_err(CheckoutError::from)?;

        if intent.status != IntentStatus::AwaitingPaymentMethod {
            warn!(intent_id = %intent.id, status = %intent.status, "New intent is not awaiting a payment method");
            return Err(CheckoutError::UnsupportedStatus(intent.status.to_string()).into());
        }
        let client_key = intent
            .client_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                CheckoutError::InvariantViolation("created intent has no client key".into())
            })?;
        if intent.id.is_empty() {
            return Err(CheckoutError::InvariantViolation("created intent has no id".into()).into());
        }

        if !self
            .orders
            .link_intent(order.id, &intent.id, &client_key)
            .await?
        {
            // A concurrent submission linked its intent first; that one wins.
            let current = self.orders.get_order(order.id).await?;
            warn!(discarded_intent = %intent.id, "Order was linked concurrently; keeping the stored intent");
            return existing_link(&current).map(Some).ok_or_else(|| {
                ServiceError::Conflict(format!("order {} intent link changed", order.id))
            });
        }

        counter!("paymongo.intents.created", 1);
        info!(intent_id = %intent.id, amount, "Payment intent created");
        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                order_id: order.id,
                intent_id: intent.id.clone(),
            })
            .await;

        Ok(Some(IntentLink {
            order_id: order.id,
            intent_id: intent.id,
            client_key,
            created: true,
        }))
    }

    /// Card submission: attaches the tokenized method to the order's intent
    /// and acts on the processor's answer.
    #[instrument(skip(self, method_token), fields(order_id = %order_id))]
    pub async fn process_payment(
        &self,
        order_id: Uuid,
        method_token: Option<&str>,
        cart_id: Option<Uuid>,
    ) -> Result<PaymentResult, ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        match self.attach_and_settle(&order, method_token, cart_id).await {
            Ok(result) => Ok(result),
            Err(ServiceError::Checkout(err)) => {
                log_checkout_failure(order.id, &err);
                if matches!(err, CheckoutError::ProcessorRejection(_)) {
                    self.record_failure(order.id, &err.to_string()).await?;
                }
                Ok(PaymentResult::failure(err.notices()))
            }
            Err(e) => Err(e),
        }
    }

    async fn attach_and_settle(
        &self,
        order: &OrderModel,
        method_token: Option<&str>,
        cart_id: Option<Uuid>,
    ) -> Result<PaymentResult, ServiceError> {
        let token = method_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(CheckoutError::MissingMethodToken)?;

        if order.is_paid() {
            info!("Order already paid; not attaching again");
            return Ok(PaymentResult::success(self.orders.thank_you_url(order)));
        }
        if !self.gateway.enabled {
            return Err(CheckoutError::Validation("gateway is disabled".into()).into());
        }

        let intent_id = match order.paymongo_payment_intent_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self
                .create_intent_for_order(order.id)
                .await?
                .map(|link| link.intent_id)
                .ok_or_else(|| {
                    CheckoutError::Validation("order is not payable through this gateway".into())
                })?,
        };

        let params = AttachParams {
            payment_method: token.to_string(),
            return_url: self.orders.return_url(order.id, &intent_id),
        };
        let credentials = self.gateway.credentials();
        let result = self
            .processor
            .attach_method(&intent_id, &params, credentials.secret_key)
            .await
            .map_err(CheckoutError::from)?;
        info!(%intent_id, status = %result.status, "Payment method attached");

        let transition = after_attach(&result)?;
        match self
            .settle(order, transition, FinalizeContext { cart_id })
            .await?
        {
            Settlement::Paid => Ok(PaymentResult::success(self.orders.thank_you_url(order))),
            Settlement::Redirect(url) => Ok(PaymentResult::success(url)),
            Settlement::Retry => Ok(PaymentResult {
                result: PaymentResultKind::Failure,
                redirect: Some(self.orders.payment_url(order)),
                notices: vec![Notice::generic()],
            }),
        }
    }

    /// Attach-redirect callback. The intent stored on the order is queried;
    /// the `intent` query value is only compared against it.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn resume_after_redirect(
        &self,
        order_id: Uuid,
        intent_id: Option<&str>,
    ) -> Result<RedirectOutcome, ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        self.resume_or_notify(&order, intent_id).await
    }

    /// Alternate-source redirect callback. A reported success is never taken
    /// at face value: the stored intent is re-queried, and without one the
    /// order waits for a verified webhook.
    #[instrument(skip(self), fields(order_id = %order_id, status = %status))]
    pub async fn resume_after_source_redirect(
        &self,
        order_id: Uuid,
        status: SourceRedirectStatus,
    ) -> Result<RedirectOutcome, ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        if order.is_paid() {
            return Ok(RedirectOutcome::to(self.orders.thank_you_url(&order)));
        }

        match status {
            SourceRedirectStatus::Failed => {
                self.record_failure(order.id, "payment source reported failure")
                    .await?;
                Ok(RedirectOutcome::with_notices(
                    self.orders.payment_url(&order),
                    vec![Notice::generic()],
                ))
            }
            SourceRedirectStatus::Success if order.paymongo_payment_intent_id.is_some() => {
                self.resume_or_notify(&order, None).await
            }
            SourceRedirectStatus::Success => {
                info!("Source reported success; order stays unpaid until the processor confirms");
                Ok(RedirectOutcome::to(self.orders.thank_you_url(&order)))
            }
        }
    }

    async fn resume_or_notify(
        &self,
        order: &OrderModel,
        claimed_intent: Option<&str>,
    ) -> Result<RedirectOutcome, ServiceError> {
        match self.resume(order, claimed_intent).await {
            Ok(outcome) => Ok(outcome),
            Err(ServiceError::Checkout(err)) => {
                log_checkout_failure(order.id, &err);
                Ok(RedirectOutcome::with_notices(
                    self.orders.payment_url(order),
                    err.notices(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    async fn resume(
        &self,
        order: &OrderModel,
        claimed_intent: Option<&str>,
    ) -> Result<RedirectOutcome, ServiceError> {
        if order.is_paid() {
            // Replays complete any follow-up step an earlier run could not.
            if let Some(payment_id) = order.transaction_id.as_deref() {
                self.finalizer
                    .finalize(order.id, payment_id, FinalizeContext::default())
                    .await?;
            }
            return Ok(RedirectOutcome::to(self.orders.thank_you_url(order)));
        }

        let stored = order
            .paymongo_payment_intent_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                CheckoutError::InvariantViolation("order has no payment intent".into())
            })?;
        if let Some(claimed) = claimed_intent.filter(|claimed| *claimed != stored) {
            warn!(%claimed, %stored, "Redirect names a different intent; using the stored one");
        }

        let credentials = self.gateway.credentials();
        let intent = self
            .processor
            .fetch_intent(stored, credentials.secret_key)
            .await
            .map_err(CheckoutError::from)?;
        info!(intent_id = %stored, status = %intent.status, "Intent status re-queried");

        let transition = after_resume(&intent)?;
        match self
            .settle(order, transition, FinalizeContext::default())
            .await?
        {
            Settlement::Paid => Ok(RedirectOutcome::to(self.orders.thank_you_url(order))),
            Settlement::Redirect(url) => Ok(RedirectOutcome::to(url)),
            Settlement::Retry => Ok(RedirectOutcome::with_notices(
                self.orders.payment_url(order),
                vec![Notice::generic()],
            )),
        }
    }

    async fn settle(
        &self,
        order: &OrderModel,
        transition: Transition,
        ctx: FinalizeContext,
    ) -> Result<Settlement, ServiceError> {
        match transition {
            Transition::Finalize { payment_id } => {
                self.finalizer.finalize(order.id, &payment_id, ctx).await?;
                Ok(Settlement::Paid)
            }
            Transition::Redirect { url } => {
                info!("Customer sent to complete authorization");
                Ok(Settlement::Redirect(url))
            }
            Transition::Retry => {
                self.record_failure(order.id, "payment method was not accepted")
                    .await?;
                Ok(Settlement::Retry)
            }
            Transition::Unsupported { status } => {
                Err(CheckoutError::UnsupportedStatus(status.to_string()).into())
            }
        }
    }

    /// Webhook receipt. The caller has already verified the signature.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.kind.as_str()))]
    pub async fn handle_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome, ServiceError> {
        counter!("paymongo.webhooks.received", 1, "type" => event.kind.as_str().to_string());

        let seen = ProcessedWebhookEventEntity::find_by_id(event.id.clone())
            .one(&*self.db_pool)
            .await?;
        if seen.is_some() {
            info!("Webhook event already processed");
            return Ok(WebhookOutcome::Duplicate);
        }

        let live = self.gateway.mode() == GatewayMode::Live;
        let outcome = if event.livemode != live {
            warn!(
                event_livemode = event.livemode,
                "Webhook mode does not match the gateway mode; ignoring"
            );
            WebhookOutcome::Ignored
        } else {
            self.apply_webhook(event).await?
        };

        ProcessedWebhookEventEntity::insert(processed_webhook_event::ActiveModel {
            event_id: Set(event.id.clone()),
            event_type: Set(event.kind.as_str().to_string()),
            processed_at: Set(Utc::now()),
        })
        .on_conflict(
            OnConflict::column(processed_webhook_event::Column::EventId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&*self.db_pool)
        .await?;

        self.event_sender
            .send_or_log(Event::WebhookProcessed {
                event_id: event.id.clone(),
                event_type: event.kind.as_str().to_string(),
            })
            .await;

        Ok(outcome)
    }

    async fn apply_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome, ServiceError> {
        match &event.kind {
            WebhookEventType::PaymentPaid | WebhookEventType::PaymentFailed => {}
            other => {
                info!(event_type = %other.as_str(), "Webhook acknowledged without action");
                return Ok(WebhookOutcome::Ignored);
            }
        }

        let Some(intent_id) = event.payment_intent_id.as_deref() else {
            warn!("Payment webhook carries no payment intent id");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(order) = self.orders.find_by_intent_id(intent_id).await? else {
            warn!(%intent_id, "No order is linked to the webhook's intent");
            return Ok(WebhookOutcome::Ignored);
        };

        if event.kind == WebhookEventType::PaymentFailed {
            let reason = event
                .failure_message
                .clone()
                .unwrap_or_else(|| "payment failed".to_string());
            return if self.record_failure(order.id, &reason).await? {
                Ok(WebhookOutcome::MarkedFailed)
            } else {
                Ok(WebhookOutcome::Ignored)
            };
        }

        if event.resource_id.trim().is_empty() {
            warn!(order_id = %order.id, "payment.paid webhook without a payment id");
            return Ok(WebhookOutcome::Ignored);
        }
        self.finalizer
            .finalize(order.id, &event.resource_id, FinalizeContext::default())
            .await?;
        Ok(WebhookOutcome::Finalized)
    }

    async fn record_failure(&self, order_id: Uuid, reason: &str) -> Result<bool, ServiceError> {
        let recorded = self.orders.mark_payment_failed(order_id).await?;
        if recorded {
            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    order_id,
                    reason: reason.to_string(),
                })
                .await;
        }
        Ok(recorded)
    }
}

fn existing_link(order: &OrderModel) -> Option<IntentLink> {
    match (
        order.paymongo_payment_intent_id.as_deref(),
        order.paymongo_client_key.as_deref(),
    ) {
        (Some(intent_id), Some(client_key)) if !intent_id.is_empty() => Some(IntentLink {
            order_id: order.id,
            intent_id: intent_id.to_string(),
            client_key: client_key.to_string(),
            created: false,
        }),
        _ => None,
    }
}

fn log_checkout_failure(order_id: Uuid, err: &CheckoutError) {
    counter!("paymongo.payments.failed", 1, "kind" => err.kind());
    match err {
        CheckoutError::MissingMethodToken => {
            error!(%order_id, "[Processing Payment] No payment method ID found.")
        }
        CheckoutError::Validation(reason) => warn!(%order_id, %reason, "Checkout validation failed"),
        CheckoutError::Transport(reason) => {
            error!(%order_id, %reason, "Could not reach the payment processor")
        }
        CheckoutError::ProcessorRejection(details) => {
            warn!(%order_id, ?details, "Payment processor rejected the request")
        }
        CheckoutError::UnsupportedStatus(status) => {
            warn!(%order_id, %status, "Unsupported payment intent status; order not finalized")
        }
        CheckoutError::InvariantViolation(reason) => {
            error!(%order_id, %reason, "Payment invariant violated; order not finalized")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::{self, OrderStatus, PaymentStatus};
    use crate::migrator::Migrator;
    use crate::notifications::MockInvoiceNotifier;
    use crate::paymongo::{
        AttachResult, ErrorDetail, MockPaymentProcessor, PaymentIntent, PaymentRecord,
        ProcessorError,
    };
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, ConnectOptions, Database};
    use sea_orm_migration::MigratorTrait;
    use tokio::sync::mpsc;

    proptest! {
        #[test]
        fn minor_units_are_hundredths_rounded(cents in 1i64..=10_000_000_000i64) {
            let total = Decimal::new(cents, 2);
            prop_assert_eq!(amount_in_minor_units(total).unwrap(), cents);
        }

        #[test]
        fn sub_centavo_totals_round_half_away_from_zero(mills in 5i64..=10_000_000i64) {
            let total = Decimal::new(mills, 3);
            let expected = (mills + 5) / 10;
            prop_assert_eq!(amount_in_minor_units(total).unwrap(), expected);
        }

        #[test]
        fn non_positive_totals_are_rejected(cents in -10_000_000i64..=0i64) {
            let total = Decimal::new(cents, 2);
            prop_assert!(matches!(
                amount_in_minor_units(total),
                Err(CheckoutError::Validation(_))
            ));
        }
    }

    #[test]
    fn totals_that_round_to_zero_are_rejected() {
        assert_matches!(
            amount_in_minor_units(dec!(0.004)),
            Err(CheckoutError::Validation(_))
        );
    }

    fn gateway(test_mode: bool) -> Arc<GatewayConfig> {
        Arc::new(GatewayConfig {
            enabled: true,
            test_mode,
            test_public_key: "pk_test_1".into(),
            test_secret_key: "sk_test_1".into(),
            live_public_key: "pk_live_1".into(),
            live_secret_key: "sk_live_1".into(),
            ..GatewayConfig::default()
        })
    }

    async fn setup(
        processor: MockPaymentProcessor,
        test_mode: bool,
        intent_id: Option<&str>,
    ) -> (PaymentOrchestrator, Uuid) {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
        opt.max_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            order_number: Set("1001".into()),
            order_key: Set("wc_order_abc".into()),
            customer_email: Set(Some("buyer@example.com".into())),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            payment_method: Set(Some(GATEWAY_ID.into())),
            total_amount: Set(dec!(1499.95)),
            currency: Set("PHP".into()),
            transaction_id: Set(None),
            paymongo_payment_intent_id: Set(intent_id.map(str::to_string)),
            paymongo_client_key: Set(intent_id.map(|id| format!("{}_client", id))),
            stock_reduced: Set(false),
            invoice_sent_at: Set(None),
            billing_first_name: Set(None),
            billing_last_name: Set(None),
            billing_email: Set(None),
            billing_phone: Set(None),
            billing_line1: Set(None),
            billing_line2: Set(None),
            billing_city: Set(None),
            billing_state: Set(None),
            billing_postal_code: Set(None),
            billing_country: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&db)
        .await
        .unwrap();

        let mut notifier = MockInvoiceNotifier::new();
        notifier.expect_send_invoice().returning(|_| Ok(()));
        let (tx, _rx) = mpsc::channel(64);

        let orchestrator = PaymentOrchestrator::new(
            Arc::new(db),
            gateway(test_mode),
            StoreConfig {
                name: "Sari-Sari".into(),
                home_url: "https://shop.example".into(),
            },
            Arc::new(processor),
            Arc::new(notifier),
            EventSender::new(tx),
        );
        (orchestrator, order_id)
    }

    fn awaiting_intent(id: &str) -> PaymentIntent {
        PaymentIntent {
            id: id.into(),
            status: IntentStatus::AwaitingPaymentMethod,
            client_key: Some(format!("{}_client", id)),
            payments: vec![],
            next_action: None,
        }
    }

    #[tokio::test]
    async fn creates_intent_with_test_key_and_minor_units() {
        let mut processor = MockPaymentProcessor::new();
        processor
            .expect_create_intent()
            .withf(|params, key| {
                params.amount == 149_995
                    && params.currency == "PHP"
                    && params.payment_method_allowed == vec!["card".to_string()]
                    && params.description.starts_with("Sari-Sari - ")
                    && key == "sk_test_1"
            })
            .times(1)
            .returning(|_, _| Ok(awaiting_intent("pi_new")));
        let (orchestrator, order_id) = setup(processor, true, None).await;

        let link = orchestrator
            .create_intent_for_order(order_id)
            .await
            .unwrap()
            .unwrap();
        assert!(link.created);
        assert_eq!(link.intent_id, "pi_new");

        // Second submission reuses the stored intent without a remote call.
        let again = orchestrator
            .create_intent_for_order(order_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.intent_id, "pi_new");
    }

    #[tokio::test]
    async fn live_mode_uses_live_secret_key() {
        let mut processor = MockPaymentProcessor::new();
        processor
            .expect_create_intent()
            .withf(|_, key| key == "sk_live_1")
            .times(1)
            .returning(|_, _| Ok(awaiting_intent("pi_live")));
        let (orchestrator, order_id) = setup(processor, false, None).await;

        orchestrator
            .create_intent_for_order(order_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn intent_in_unexpected_status_surfaces_generic_notice() {
        let mut processor = MockPaymentProcessor::new();
        processor.expect_create_intent().returning(|_, _| {
            let mut intent = awaiting_intent("pi_odd");
            intent.status = IntentStatus::Processing;
            Ok(intent)
        });
        let (orchestrator, order_id) = setup(processor, true, None).await;

        let result = orchestrator.on_order_submitted(order_id).await.unwrap();
        assert!(result.intent.is_none());
        assert_eq!(result.notices, vec![Notice::generic()]);
        let order = orchestrator.orders().get_order(order_id).await.unwrap();
        assert!(order.paymongo_payment_intent_id.is_none());
    }

    #[tokio::test]
    async fn missing_token_fails_without_remote_call() {
        let (orchestrator, order_id) = setup(MockPaymentProcessor::new(), true, Some("pi_1")).await;

        let result = orchestrator
            .process_payment(order_id, Some("   "), None)
            .await
            .unwrap();
        assert_eq!(result.result, PaymentResultKind::Failure);
        assert_eq!(
            result.notices,
            CheckoutError::MissingMethodToken.notices()
        );
    }

    #[tokio::test]
    async fn rejection_marks_attempt_failed_and_lists_details() {
        let mut processor = MockPaymentProcessor::new();
        processor.expect_attach_method().times(1).returning(|_, _, _| {
            Err(ProcessorError::Rejected(vec![ErrorDetail::new("card_declined")]))
        });
        let (orchestrator, order_id) = setup(processor, true, Some("pi_1")).await;

        let result = orchestrator
            .process_payment(order_id, Some("pm_1"), None)
            .await
            .unwrap();
        assert_eq!(result, PaymentResult::failure(vec![Notice::error("card_declined")]));

        let order = orchestrator.orders().get_order(order_id).await.unwrap();
        assert_eq!(order.payment_status, "failed");
        assert!(order.transaction_id.is_none());
    }

    #[tokio::test]
    async fn attach_sends_return_url_for_stored_intent() {
        let mut processor = MockPaymentProcessor::new();
        processor
            .expect_attach_method()
            .withf(|intent_id, params, key| {
                intent_id == "pi_1"
                    && params.payment_method == "pm_1"
                    && params.return_url.starts_with("https://shop.example/paymongo/redirect?order=")
                    && params.return_url.ends_with("&intent=pi_1")
                    && key == "sk_test_1"
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(AttachResult {
                    status: IntentStatus::Succeeded,
                    payments: vec![PaymentRecord { id: "pay_1".into() }],
                    redirect_url: None,
                })
            });
        let (orchestrator, order_id) = setup(processor, true, Some("pi_1")).await;

        let result = orchestrator
            .process_payment(order_id, Some("pm_1"), None)
            .await
            .unwrap();
        assert_eq!(result.result, PaymentResultKind::Success);
        let order = orchestrator.orders().get_order(order_id).await.unwrap();
        assert_eq!(order.transaction_id.as_deref(), Some("pay_1"));
    }

    #[tokio::test]
    async fn redirect_resume_regression_sends_customer_back_to_pay() {
        let mut processor = MockPaymentProcessor::new();
        processor
            .expect_fetch_intent()
            .withf(|intent_id, _| intent_id == "pi_1")
            .times(1)
            .returning(|_, _| Ok(awaiting_intent("pi_1")));
        let (orchestrator, order_id) = setup(processor, true, Some("pi_1")).await;

        let outcome = orchestrator
            .resume_after_redirect(order_id, Some("pi_forged"))
            .await
            .unwrap();
        assert!(outcome.location.contains("/checkout/order-pay/"));
        assert_eq!(outcome.notices, vec![Notice::generic()]);
    }

    #[tokio::test]
    async fn source_success_without_intent_waits_for_confirmation() {
        let (orchestrator, order_id) = setup(MockPaymentProcessor::new(), true, None).await;

        let outcome = orchestrator
            .resume_after_source_redirect(order_id, SourceRedirectStatus::Success)
            .await
            .unwrap();
        assert!(outcome.location.contains("/checkout/order-received/"));
        let order = orchestrator.orders().get_order(order_id).await.unwrap();
        assert!(!order.is_paid());
    }

    #[tokio::test]
    async fn source_failure_reports_generic_notice() {
        let (orchestrator, order_id) = setup(MockPaymentProcessor::new(), true, None).await;

        let outcome = orchestrator
            .resume_after_source_redirect(order_id, SourceRedirectStatus::Failed)
            .await
            .unwrap();
        assert!(outcome.location.contains("pay_for_order=true"));
        assert_eq!(outcome.notices, vec![Notice::generic()]);
    }

    #[test]
    fn source_status_parses_lowercase() {
        assert_eq!(
            "success".parse::<SourceRedirectStatus>().unwrap(),
            SourceRedirectStatus::Success
        );
        assert!("paid".parse::<SourceRedirectStatus>().is_err());
    }
}
