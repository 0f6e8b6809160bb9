#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::{
    db,
    entities::{self, cart, cart_item, checkout_session::PaymentMethod, CartStatus},
    errors::ServiceError,
    events::EventSender,
    gateway::{GatewayInitiation, GatewayPaymentStatus, PaymentGateway},
    handlers::AppServices,
    services::{Address, CheckoutItemInput, CreateCheckoutInput},
};

/// Programmable in-process gateway double with call counting.
pub struct StubGateway {
    lookup_status: Mutex<GatewayPaymentStatus>,
    pub initiate_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            lookup_status: Mutex::new(GatewayPaymentStatus::Completed),
            initiate_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_lookup_status(&self, status: GatewayPaymentStatus) {
        *self.lookup_status.lock().unwrap() = status;
    }

    pub fn lookup_count(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initiate(
        &self,
        _session_id: Uuid,
        _amount: Decimal,
    ) -> Result<GatewayInitiation, ServiceError> {
        let n = self.initiate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayInitiation {
            correlation_id: format!("pidx_{}", n),
            redirect_url: format!("https://pay.test/redirect/{}", n),
        })
    }

    async fn lookup(&self, _correlation_id: &str) -> Result<GatewayPaymentStatus, ServiceError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.lookup_status.lock().unwrap())
    }
}

pub struct TestEnv {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub gateway: Arc<StubGateway>,
    pub event_sender: EventSender,
}

/// Fresh in-memory database with the full schema and the service container
/// wired to a stub gateway. A single pooled connection keeps every
/// connection on the same in-memory database.
pub async fn setup() -> TestEnv {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let database = Database::connect(options)
        .await
        .expect("sqlite in-memory connection");
    db::create_schema(&database).await.expect("schema bootstrap");
    let database = Arc::new(database);

    let (tx, mut rx) = mpsc::channel(256);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let event_sender = EventSender::new(tx);

    let gateway = Arc::new(StubGateway::new());
    let dyn_gateway: Arc<dyn PaymentGateway> = gateway.clone();
    let services = AppServices::new(database.clone(), event_sender.clone(), dyn_gateway);

    TestEnv {
        db: database,
        services,
        gateway,
        event_sender,
    }
}

pub fn shipping_address() -> Address {
    Address {
        line1: "123 Test Street".to_string(),
        line2: None,
        city: "Kathmandu".to_string(),
        state: Some("Bagmati".to_string()),
        postal_code: "44600".to_string(),
        country: "NP".to_string(),
        phone: None,
    }
}

pub fn checkout_item(name: &str, quantity: i32, unit_price: Decimal) -> CheckoutItemInput {
    CheckoutItemInput {
        product_id: Uuid::new_v4(),
        name: name.to_string(),
        variant: Some(serde_json::json!({"size": "M", "color": "black"})),
        quantity,
        unit_price,
    }
}

/// Two line items totaling 1500.
pub fn two_item_checkout() -> CreateCheckoutInput {
    CreateCheckoutInput {
        items: vec![
            checkout_item("Plain Tee", 2, dec!(500)),
            checkout_item("Canvas Cap", 1, dec!(500)),
        ],
        shipping_address: shipping_address(),
        payment_method: PaymentMethod::Khalti,
    }
}

/// Seeds an active cart with one item for the owner and returns the cart id.
pub async fn seed_cart(db: &DatabaseConnection, owner_id: Uuid) -> Uuid {
    let now = Utc::now();
    let cart_id = Uuid::new_v4();
    cart::ActiveModel {
        id: Set(cart_id),
        owner_id: Set(owner_id),
        status: Set(CartStatus::Active),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed cart");

    cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart_id),
        product_id: Set(Uuid::new_v4()),
        quantity: Set(2),
        unit_price: Set(dec!(500)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed cart item");

    cart_id
}

pub async fn active_cart_exists(db: &DatabaseConnection, owner_id: Uuid) -> bool {
    entities::Cart::find()
        .filter(cart::Column::OwnerId.eq(owner_id))
        .filter(cart::Column::Status.eq(CartStatus::Active))
        .one(db)
        .await
        .expect("cart query")
        .is_some()
}
