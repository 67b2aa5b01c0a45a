//! Order finalization.
//!
//! Runs once a payment is known to be captured. Step 1 (mark paid) is the
//! financial record and is never undone. Steps 2 to 4 each carry their own
//! once-only guard, so calling `finalize` again for an order whose earlier
//! run degraded completes the missing steps without repeating the others.

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel},
    errors::{CheckoutError, ServiceError},
    events::{Event, EventSender, InvoiceRequest},
    notifications::InvoiceNotifier,
    services::{carts::CartService, inventory::InventoryService, orders::OrderService},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Result of one post-payment side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum StepOutcome {
    Done,
    AlreadyDone,
    Skipped,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeReport {
    pub order_id: Uuid,
    /// False when the order was already paid before this call
    pub newly_paid: bool,
    pub stock: StepOutcome,
    pub invoice: StepOutcome,
    pub cart: StepOutcome,
}

impl FinalizeReport {
    pub fn degraded_steps(&self) -> Vec<&'static str> {
        [
            ("reduce_stock", &self.stock),
            ("send_invoice", &self.invoice),
            ("clear_cart", &self.cart),
        ]
        .into_iter()
        .filter(|(_, outcome)| outcome.is_failed())
        .map(|(step, _)| step)
        .collect()
    }
}

/// Session context of the request that triggered finalization. Only the
/// synchronous checkout path has a cart to clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeContext {
    pub cart_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct OrderFinalizer {
    db_pool: Arc<DbPool>,
    orders: OrderService,
    inventory: InventoryService,
    carts: CartService,
    notifier: Arc<dyn InvoiceNotifier>,
    event_sender: EventSender,
}

impl OrderFinalizer {
    pub fn new(
        db_pool: Arc<DbPool>,
        orders: OrderService,
        notifier: Arc<dyn InvoiceNotifier>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            inventory: InventoryService::new(db_pool.clone(), event_sender.clone()),
            carts: CartService::new(db_pool.clone(), event_sender.clone()),
            db_pool,
            orders,
            notifier,
            event_sender,
        }
    }

    #[instrument(skip(self, ctx), fields(order_id = %order_id, payment_id = %payment_id))]
    pub async fn finalize(
        &self,
        order_id: Uuid,
        payment_id: &str,
        ctx: FinalizeContext,
    ) -> Result<FinalizeReport, ServiceError> {
        if payment_id.trim().is_empty() {
            error!("Refusing to finalize without a payment id");
            return Err(CheckoutError::InvariantViolation(
                "finalize requires a payment id".to_string(),
            )
            .into());
        }

        // Existence check first so a missing order is not mistaken for "already paid".
        self.orders.get_order(order_id).await?;

        let newly_paid = self.orders.mark_paid(order_id, payment_id).await?;
        if newly_paid {
            counter!("paymongo.payments.finalized", 1);
            self.event_sender
                .send_or_log(Event::OrderPaid {
                    order_id,
                    transaction_id: payment_id.to_string(),
                    paid_at: Utc::now(),
                })
                .await;
        } else {
            info!("Order already paid; completing any outstanding steps");
        }

        let stock = match self.inventory.reduce_stock_for_order(order_id).await {
            Ok(true) => StepOutcome::Done,
            Ok(false) => StepOutcome::AlreadyDone,
            Err(e) => degraded("reduce_stock", e.to_string()),
        };

        let invoice = self.dispatch_invoice(order_id).await;

        let cart = match ctx.cart_id {
            None => StepOutcome::Skipped,
            Some(cart_id) => match self.carts.clear_cart(cart_id).await {
                Ok(true) => StepOutcome::Done,
                Ok(false) => StepOutcome::AlreadyDone,
                Err(e) => degraded("clear_cart", e.to_string()),
            },
        };

        let report = FinalizeReport {
            order_id,
            newly_paid,
            stock,
            invoice,
            cart,
        };

        let degraded_steps = report.degraded_steps();
        if degraded_steps.is_empty() {
            info!("Order finalized");
        } else {
            warn!(steps = ?degraded_steps, "Order paid with degraded follow-up steps");
        }

        Ok(report)
    }

    /// Claims the order's invoice slot and hands the receipt to the notifier.
    /// A failed hand-off releases the claim so a later run can try again.
    async fn dispatch_invoice(&self, order_id: Uuid) -> StepOutcome {
        let claimed_at = Utc::now();
        let claimed = match self.claim_invoice(order_id, claimed_at).await {
            Ok(claimed) => claimed,
            Err(e) => return degraded("send_invoice", e.to_string()),
        };
        if !claimed {
            return StepOutcome::AlreadyDone;
        }

        let order = match self.orders.get_order(order_id).await {
            Ok(order) => order,
            Err(e) => {
                self.release_invoice(order_id).await;
                return degraded("send_invoice", e.to_string());
            }
        };

        match self.notifier.send_invoice(&invoice_for(&order)).await {
            Ok(()) => StepOutcome::Done,
            Err(e) => {
                self.release_invoice(order_id).await;
                degraded("send_invoice", e.to_string())
            }
        }
    }

    async fn claim_invoice(
        &self,
        order_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::InvoiceSentAt, Expr::value(Some(claimed_at)))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::InvoiceSentAt.is_null())
            .exec(&*self.db_pool)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn release_invoice(&self, order_id: Uuid) {
        let released = OrderEntity::update_many()
            .col_expr(
                order::Column::InvoiceSentAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db_pool)
            .await;
        if let Err(e) = released {
            error!(error = %e, %order_id, "Failed to release invoice claim");
        }
    }
}

fn invoice_for(order: &OrderModel) -> InvoiceRequest {
    InvoiceRequest {
        order_id: order.id,
        order_number: order.order_number.clone(),
        recipient: order
            .billing_email
            .clone()
            .or_else(|| order.customer_email.clone())
            .filter(|email| !email.trim().is_empty()),
        total: order.total_amount,
        currency: order.currency.clone(),
        transaction_id: order.transaction_id.clone().unwrap_or_default(),
    }
}

fn degraded(step: &'static str, reason: String) -> StepOutcome {
    error!(step, %reason, "Finalization step failed; payment stays recorded");
    counter!("paymongo.finalize.degraded", 1, "step" => step);
    StepOutcome::Failed(reason)
}
