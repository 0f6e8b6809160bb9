use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the settlement workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutSessionCreated(Uuid),
    PaymentInitiated {
        session_id: Uuid,
        correlation_id: String,
    },
    /// The gateway accepted the initiation but the local transition lost;
    /// the session needs operator reconciliation.
    PaymentInitiationOrphaned {
        session_id: Uuid,
        correlation_id: String,
    },
    PaymentVerified {
        session_id: Uuid,
    },
    PaymentFailed {
        session_id: Uuid,
        gateway_status: String,
    },
    OrderCreated(Uuid),
    CheckoutFinalized {
        session_id: Uuid,
        order_id: Uuid,
    },
    CartCleared {
        owner_id: Uuid,
    },
    /// Cart clearing exhausted its retries after the order committed.
    CartClearAbandoned {
        owner_id: Uuid,
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, logging instead of failing if the consumer is gone.
    /// Event delivery is never allowed to fail a settlement operation.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("failed to publish domain event: {}", e);
        }
    }
}

/// Consumer task draining the event channel. Downstream integrations
/// (webhooks, analytics) hang off this loop; for now events are logged.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::CartClearAbandoned { owner_id, order_id } => {
                warn!(%owner_id, %order_id, "cart clear abandoned after retries");
            }
            other => info!(event = ?other, "domain event"),
        }
    }
    info!("event channel closed; consumer exiting");
}
