pub mod checkout;
pub mod common;
pub mod orders;

use std::sync::Arc;

use crate::{
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        start_cart_clear_worker, CartService, CheckoutSessionService, OrderFinalizer, OrderService,
        PaymentVerifier,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutSessionService>,
    pub verifier: Arc<PaymentVerifier>,
    pub finalizer: Arc<OrderFinalizer>,
    pub orders: Arc<OrderService>,
    pub carts: Arc<CartService>,
}

impl AppServices {
    /// Builds the service container and spawns the cart-clear retry worker.
    /// Must run inside a tokio runtime.
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let carts = Arc::new(CartService::new(db.clone()));
        let cart_clear = start_cart_clear_worker(carts.clone(), event_sender.clone());
        let orders = Arc::new(OrderService::new(db.clone()));
        let checkout = Arc::new(CheckoutSessionService::new(
            db.clone(),
            gateway.clone(),
            event_sender.clone(),
        ));
        let verifier = Arc::new(PaymentVerifier::new(
            db.clone(),
            gateway,
            event_sender.clone(),
        ));
        let finalizer = Arc::new(OrderFinalizer::new(
            db,
            orders.clone(),
            carts.clone(),
            cart_clear,
            event_sender,
        ));

        Self {
            checkout,
            verifier,
            finalizer,
            orders,
            carts,
        }
    }
}
