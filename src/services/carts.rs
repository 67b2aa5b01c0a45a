use crate::{
    db::DbPool,
    entities::{
        cart::{self, Entity as CartEntity, STATUS_ACTIVE, STATUS_CLEARED},
        cart_item::{self, Entity as CartItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Empties an active cart. Returns false when the cart was already
    /// cleared or does not exist.
    #[instrument(skip(self), fields(cart_id = %cart_id))]
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let result = CartEntity::update_many()
            .col_expr(cart::Column::Status, Expr::value(STATUS_CLEARED))
            .col_expr(cart::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::Status.eq(STATUS_ACTIVE))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        let removed = CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(items = removed.rows_affected, "Cart cleared");
        self.event_sender
            .send_or_log(Event::CartCleared { cart_id })
            .await;
        Ok(true)
    }
}
