pub mod carts;
pub mod finalization;
pub mod orders;
pub mod sessions;
pub mod verification;

// Re-export services for convenience
pub use carts::{start_cart_clear_worker, CartClearQueue, CartService};
pub use finalization::OrderFinalizer;
pub use orders::{OrderPage, OrderService, OrderWithItems};
pub use sessions::{
    Address, CheckoutItemInput, CheckoutSessionService, CreateCheckoutInput, SessionWithItems,
};
pub use verification::{PaymentVerifier, VerificationOutcome};
