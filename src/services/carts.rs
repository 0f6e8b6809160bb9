use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, TransactionTrait};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    entities::{self, cart, cart_item, CartStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Cart collaborator consumed by settlement. Cart CRUD lives elsewhere; this
/// service only knows how to clear a cart once its order exists.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Deletes the owner's active cart and its items. A missing cart counts
    /// as cleared.
    pub async fn clear_cart(&self, owner_id: Uuid) -> Result<(), ServiceError> {
        let Some(cart) = entities::Cart::find()
            .filter(cart::Column::OwnerId.eq(owner_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(&*self.db)
            .await?
        else {
            return Ok(());
        };

        let txn = self.db.begin().await?;
        entities::CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        cart.delete(&txn).await?;
        txn.commit().await?;

        info!(%owner_id, "cart cleared");
        Ok(())
    }
}

#[derive(Debug)]
struct CartClearJob {
    owner_id: Uuid,
    order_id: Uuid,
    attempts: u32,
}

/// Handle for deferring a failed cart clear to the retry worker. Cart
/// clearing after finalize is best-effort: the order is already
/// authoritative, so failures are retried out of band instead of rolling
/// anything back.
#[derive(Clone)]
pub struct CartClearQueue {
    tx: mpsc::Sender<CartClearJob>,
}

impl CartClearQueue {
    pub async fn enqueue(&self, owner_id: Uuid, order_id: Uuid) {
        let job = CartClearJob {
            owner_id,
            order_id,
            attempts: 0,
        };
        if self.tx.send(job).await.is_err() {
            error!(%owner_id, %order_id, "cart clear queue closed; clear will not be retried");
        }
    }
}

const MAX_CLEAR_ATTEMPTS: u32 = 8;
const BASE_BACKOFF_MS: u64 = 500;

/// Spawns the retry worker and returns its queue handle. Jobs retry with
/// exponential backoff; exhaustion is reported, never silently dropped.
pub fn start_cart_clear_worker(carts: Arc<CartService>, event_sender: EventSender) -> CartClearQueue {
    let (tx, mut rx) = mpsc::channel::<CartClearJob>(256);
    let queue = CartClearQueue { tx: tx.clone() };

    tokio::spawn(async move {
        while let Some(mut job) = rx.recv().await {
            match carts.clear_cart(job.owner_id).await {
                Ok(()) => {
                    event_sender
                        .send(Event::CartCleared {
                            owner_id: job.owner_id,
                        })
                        .await;
                }
                Err(err) => {
                    job.attempts += 1;
                    if job.attempts >= MAX_CLEAR_ATTEMPTS {
                        error!(
                            owner_id = %job.owner_id,
                            order_id = %job.order_id,
                            error = %err,
                            "cart clear abandoned after {} attempts",
                            job.attempts
                        );
                        event_sender
                            .send(Event::CartClearAbandoned {
                                owner_id: job.owner_id,
                                order_id: job.order_id,
                            })
                            .await;
                        continue;
                    }

                    let backoff = BASE_BACKOFF_MS * 2u64.pow(job.attempts - 1);
                    warn!(
                        owner_id = %job.owner_id,
                        attempt = job.attempts,
                        backoff_ms = backoff,
                        "cart clear failed; scheduling retry"
                    );
                    let requeue = tx.clone();
                    tokio::spawn(async move {
                        sleep(Duration::from_millis(backoff)).await;
                        let _ = requeue.send(job).await;
                    });
                }
            }
        }
    });

    queue
}
