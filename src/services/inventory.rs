use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Decrements catalog stock for paid orders.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Reduces stock for every line item of the order, once per order.
    ///
    /// The order's `stock_reduced` flag is claimed in the same transaction as
    /// the decrements, so either both land or neither does. Returns false when
    /// stock was already reduced by an earlier call.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reduce_stock_for_order(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start stock transaction");
            ServiceError::DatabaseError(e)
        })?;

        let claim = OrderEntity::update_many()
            .col_expr(order::Column::StockReduced, Expr::value(true))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::StockReduced.eq(false))
            .exec(&txn)
            .await?;

        if claim.rows_affected == 0 {
            txn.rollback().await?;
            debug!("Stock already reduced for order");
            return Ok(false);
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        let now = Utc::now();
        let mut adjusted = 0usize;
        for item in &items {
            let Some(product_id) = item.product_id else {
                continue;
            };
            // Products without managed stock have a NULL quantity and are skipped.
            let result = ProductEntity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).sub(item.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(Some(now)))
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::StockQuantity.is_not_null())
                .exec(&txn)
                .await?;
            adjusted += result.rows_affected as usize;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit stock reduction");
            ServiceError::DatabaseError(e)
        })?;

        info!(line_items = items.len(), adjusted, "Stock reduced for order");
        self.event_sender
            .send_or_log(Event::StockReduced {
                order_id,
                line_items: adjusted,
            })
            .await;

        Ok(true)
    }
}
