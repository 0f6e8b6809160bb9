use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{checkout_session::CheckoutStatus, order, order_item},
    errors::ServiceError,
    events::{Event, EventSender},
};

use super::{
    carts::{CartClearQueue, CartService},
    orders::{OrderService, OrderWithItems},
    sessions::{self, SessionWithItems},
};

/// Converts a Paid session into an Order exactly once.
///
/// The order insert and the Paid→Finalized transition commit in one
/// transaction; of N concurrent finalize calls, one caller creates the order
/// and every other caller returns that same order after losing the
/// compare-and-swap.
#[derive(Clone)]
pub struct OrderFinalizer {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    carts: Arc<CartService>,
    cart_clear: CartClearQueue,
    event_sender: EventSender,
}

impl OrderFinalizer {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        carts: Arc<CartService>,
        cart_clear: CartClearQueue,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            orders,
            carts,
            cart_clear,
            event_sender,
        }
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn finalize(&self, session_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let SessionWithItems { session, items } =
            sessions::load_session(&*self.db, session_id).await?;

        match session.status {
            CheckoutStatus::Finalized => {
                // Idempotent replay: hand back the order created earlier.
                return self
                    .orders
                    .find_by_session(session_id)
                    .await?
                    .ok_or(ServiceError::InternalServerError);
            }
            CheckoutStatus::Paid => {}
            other => {
                return Err(ServiceError::InvalidState(format!(
                    "cannot finalize a session in status {}",
                    other.as_str()
                )));
            }
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        match sessions::transition(
            &txn,
            &session,
            CheckoutStatus::Paid,
            CheckoutStatus::Finalized,
            |change| {
                change.finalized_at = Set(Some(now));
            },
        )
        .await
        {
            Ok(_) => {}
            Err(ServiceError::Conflict(msg)) => {
                txn.rollback().await?;
                // Lost the settlement race; adopt the winner's order.
                if let Some(existing) = self.orders.find_by_session(session_id).await? {
                    info!(
                        session_id = %session_id,
                        order_id = %existing.order.id,
                        "finalize lost the race; returning existing order"
                    );
                    return Ok(existing);
                }
                return Err(ServiceError::Conflict(msg));
            }
            Err(err) => {
                txn.rollback().await?;
                return Err(err);
            }
        }

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number(order_id)),
            checkout_session_id: Set(session.id),
            owner_id: Set(session.owner_id),
            shipping_address: Set(session.shipping_address.clone()),
            payment_method: Set(session.payment_method),
            total_price: Set(session.total_price),
            is_paid: Set(true),
            paid_at: Set(session.paid_at),
            is_delivered: Set(false),
            delivered_at: Set(None),
            payment_status: Set(session.payment_status.clone()),
            payment_correlation_id: Set(session.payment_correlation_id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut order_items = Vec::with_capacity(items.len());
        for item in &items {
            let model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                name: Set(item.name.clone()),
                variant: Set(item.variant.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                line_total: Set(item.line_total),
                position: Set(item.position),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            order_items.push(model);
        }

        txn.commit().await?;

        info!(
            session_id = %session_id,
            order_id = %order_id,
            "checkout finalized"
        );
        self.event_sender.send(Event::OrderCreated(order_id)).await;
        self.event_sender
            .send(Event::CheckoutFinalized {
                session_id,
                order_id,
            })
            .await;

        // Best-effort cart clearing. The order is already authoritative, so
        // a failure here is deferred to the retry worker instead of being
        // surfaced to the caller.
        match self.carts.clear_cart(session.owner_id).await {
            Ok(()) => {
                self.event_sender
                    .send(Event::CartCleared {
                        owner_id: session.owner_id,
                    })
                    .await;
            }
            Err(err) => {
                warn!(
                    owner_id = %session.owner_id,
                    order_id = %order_id,
                    error = %err,
                    "cart clear failed after finalize; queueing retry"
                );
                self.cart_clear.enqueue(session.owner_id, order_id).await;
            }
        }

        Ok(OrderWithItems {
            order,
            items: order_items,
        })
    }
}

fn order_number(order_id: Uuid) -> String {
    format!("ORD-{}", order_id.to_string()[..8].to_uppercase())
}
