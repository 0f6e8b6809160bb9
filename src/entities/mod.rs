pub mod cart;
pub mod cart_item;
pub mod checkout_item;
pub mod checkout_session;
pub mod order;
pub mod order_item;

// Re-export entities for convenience
pub use cart::{CartStatus, Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use checkout_item::{Entity as CheckoutItem, Model as CheckoutItemModel};
pub use checkout_session::{
    CheckoutStatus, Entity as CheckoutSession, Model as CheckoutSessionModel, PaymentMethod,
};
pub use order::{Entity as Order, Model as OrderModel};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
