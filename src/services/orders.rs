use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    entities::{self, order, order_item},
    errors::ServiceError,
};

/// An order together with its line items, in snapshot order.
#[derive(Debug, Clone)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Paginated order listing for one owner.
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Read side of the order store. Order creation lives with the finalizer,
/// which is the only writer.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        let Some(order) = entities::Order::find_by_id(order_id).one(&*self.db).await? else {
            return Ok(None);
        };
        let items = load_items(&*self.db, order.id).await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    /// Loads an order for the given caller; a foreign order reads as
    /// NotFound.
    pub async fn get_order_for_owner(
        &self,
        order_id: Uuid,
        owner_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let found = self
            .get_order(order_id)
            .await?
            .filter(|found| found.order.owner_id == owner_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(found)
    }

    /// The order settled from the given checkout session, if any.
    pub async fn find_by_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        let Some(order) = entities::Order::find()
            .filter(order::Column::CheckoutSessionId.eq(session_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };
        let items = load_items(&*self.db, order.id).await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    /// The caller's orders, newest first.
    pub async fn list_for_owner(
        &self,
        owner_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let paginator = entities::Order::find()
            .filter(order::Column::OwnerId.eq(owner_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    let items = entities::OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?;
    Ok(items)
}
