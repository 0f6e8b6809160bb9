use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedOwner,
    entities::{checkout_session::PaymentMethod, order, order_item},
    errors::ServiceError,
    handlers::common::{success_response, PaginationParams},
    services::OrderWithItems,
    AppState,
};

/// Creates the router for order endpoints
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_my_orders))
        .route("/{order_id}", get(get_order))
}

/// List the caller's orders, newest first
async fn list_my_orders(
    State(state): State<AppState>,
    AuthenticatedOwner(owner_id): AuthenticatedOwner,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .orders
        .list_for_owner(owner_id, pagination.page, pagination.per_page)
        .await?;

    Ok(success_response(OrderListResponse {
        orders: page.orders.into_iter().map(OrderSummary::from).collect(),
        total: page.total,
        page: page.page,
        per_page: page.per_page,
    }))
}

/// Get one of the caller's orders with its items
async fn get_order(
    State(state): State<AppState>,
    AuthenticatedOwner(owner_id): AuthenticatedOwner,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_for_owner(order_id, owner_id)
        .await?;

    Ok(success_response(OrderResponse::from(order)))
}

// Response DTOs

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderSummary>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub total_price: Decimal,
    pub is_paid: bool,
    pub is_delivered: bool,
    pub created_at: DateTime<Utc>,
}

impl From<order::Model> for OrderSummary {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            total_price: order.total_price,
            is_paid: order.is_paid,
            is_delivered: order.is_delivered,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub checkout_session_id: Uuid,
    pub shipping_address: serde_json::Value,
    pub payment_method: PaymentMethod,
    pub total_price: Decimal,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub payment_status: Option<String>,
    pub payment_correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub variant: Option<serde_json::Value>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<OrderWithItems> for OrderResponse {
    fn from(found: OrderWithItems) -> Self {
        let OrderWithItems { order, items } = found;
        Self {
            id: order.id,
            order_number: order.order_number,
            checkout_session_id: order.checkout_session_id,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            total_price: order.total_price,
            is_paid: order.is_paid,
            paid_at: order.paid_at,
            is_delivered: order.is_delivered,
            payment_status: order.payment_status,
            payment_correlation_id: order.payment_correlation_id,
            created_at: order.created_at,
            items: items.into_iter().map(OrderItemResponse::from).collect(),
        }
    }
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name,
            variant: item.variant,
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total,
        }
    }
}
