use crate::{
    config::StoreConfig,
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use url::form_urlencoded;
use uuid::Uuid;

/// Order reads and the handful of guarded writes checkout is allowed to make.
///
/// Every write is a conditional `UPDATE` so that concurrent redirects and
/// webhook deliveries for the same order cannot both win.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    store: StoreConfig,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, store: StoreConfig) -> Self {
        Self { db_pool, store }
    }

    /// Loads an order or fails with `NotFound`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch order");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn find_by_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::PaymongoPaymentIntentId.eq(intent_id))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to look up order by intent");
                ServiceError::DatabaseError(e)
            })
    }

    /// Stores the intent id and client key on the order. The write only lands
    /// when no intent is linked yet; returns false when another request got
    /// there first.
    #[instrument(skip(self, client_key), fields(order_id = %order_id, intent_id = %intent_id))]
    pub async fn link_intent(
        &self,
        order_id: Uuid,
        intent_id: &str,
        client_key: &str,
    ) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymongoPaymentIntentId,
                Expr::value(intent_id.to_string()),
            )
            .col_expr(
                order::Column::PaymongoClientKey,
                Expr::value(client_key.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymongoPaymentIntentId.is_null())
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to store payment intent on order");
                ServiceError::DatabaseError(e)
            })?;

        Ok(result.rows_affected == 1)
    }

    /// Moves the order to paid and records the processor payment id as its
    /// transaction reference. Returns false when the order was already paid.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_paid(&self, order_id: Uuid, transaction_id: &str) -> Result<bool, ServiceError> {
        mark_paid_on(&*self.db_pool, order_id, transaction_id).await
    }

    /// Records a failed attempt. Paid orders are left alone; the order stays
    /// payable so the customer can retry from the payment page.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_payment_failed(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed.to_string()),
            )
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Pending.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid.to_string()))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            warn!("Order already paid or missing; failure not recorded");
        }
        Ok(result.rows_affected == 1)
    }

    /// Where the processor sends the customer back after a next-action step.
    pub fn return_url(&self, order_id: Uuid, intent_id: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("order", &order_id.to_string())
            .append_pair("intent", intent_id)
            .finish();
        format!("{}?{}", self.store.url("paymongo/redirect"), query)
    }

    pub fn thank_you_url(&self, order: &OrderModel) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("key", &order.order_key)
            .finish();
        format!(
            "{}?{}",
            self.store.url(&format!("checkout/order-received/{}", order.id)),
            query
        )
    }

    pub fn payment_url(&self, order: &OrderModel) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("pay_for_order", "true")
            .append_pair("key", &order.order_key)
            .finish();
        format!(
            "{}?{}",
            self.store.url(&format!("checkout/order-pay/{}", order.id)),
            query
        )
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }
}

/// Conditional paid transition, usable on a pool or inside a transaction.
pub async fn mark_paid_on<C: ConnectionTrait>(
    db: &C,
    order_id: Uuid,
    transaction_id: &str,
) -> Result<bool, ServiceError> {
    let result = OrderEntity::update_many()
        .col_expr(
            order::Column::PaymentStatus,
            Expr::value(PaymentStatus::Paid.to_string()),
        )
        .col_expr(
            order::Column::Status,
            Expr::value(OrderStatus::Processing.to_string()),
        )
        .col_expr(
            order::Column::TransactionId,
            Expr::value(transaction_id.to_string()),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid.to_string()))
        .exec(db)
        .await
        .map_err(|e| {
            error!(error = %e, %order_id, "Failed to mark order paid");
            ServiceError::DatabaseError(e)
        })?;

    let newly_paid = result.rows_affected == 1;
    if newly_paid {
        info!(%order_id, %transaction_id, "Order marked paid");
    }
    Ok(newly_paid)
}
