use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthenticatedOwner,
    entities::{checkout_item, checkout_session, checkout_session::PaymentMethod},
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::{CreateCheckoutInput, SessionWithItems, VerificationOutcome},
    AppState,
};

use super::orders::OrderResponse;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/{session_id}", get(get_session))
        .route("/{session_id}/pay", put(initiate_payment))
        .route("/{session_id}/pay/verify", put(verify_payment))
        .route("/{session_id}/finalize", post(finalize))
}

/// Create a new checkout session from the caller's cart snapshot
async fn create_session(
    State(state): State<AppState>,
    AuthenticatedOwner(owner_id): AuthenticatedOwner,
    Json(payload): Json<CreateCheckoutInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let session = state
        .services
        .checkout
        .create_session(owner_id, payload)
        .await?;

    Ok(created_response(CheckoutSessionResponse::from(session)))
}

/// Get a checkout session with its items
async fn get_session(
    State(state): State<AppState>,
    AuthenticatedOwner(owner_id): AuthenticatedOwner,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state
        .services
        .checkout
        .get_session_for_owner(session_id, owner_id)
        .await?;

    Ok(success_response(CheckoutSessionResponse::from(session)))
}

/// Initiate payment with the gateway for a pending session
async fn initiate_payment(
    State(state): State<AppState>,
    AuthenticatedOwner(owner_id): AuthenticatedOwner,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .checkout
        .get_session_for_owner(session_id, owner_id)
        .await?;

    let initiation = state.services.checkout.initiate_payment(session_id).await?;

    Ok(success_response(InitiatePaymentResponse {
        correlation_id: initiation.correlation_id,
        redirect_url: initiation.redirect_url,
    }))
}

/// Verify the payment outcome with the gateway.
///
/// The correlation id in the body comes from the gateway redirect; it only
/// triggers verification and is checked against the stored id.
async fn verify_payment(
    State(state): State<AppState>,
    AuthenticatedOwner(owner_id): AuthenticatedOwner,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    state
        .services
        .checkout
        .get_session_for_owner(session_id, owner_id)
        .await?;

    let outcome = state
        .services
        .verifier
        .verify_payment(session_id, &payload.correlation_id)
        .await?;

    Ok(success_response(VerifyPaymentResponse::from(outcome)))
}

/// Convert a paid session into an order
async fn finalize(
    State(state): State<AppState>,
    AuthenticatedOwner(owner_id): AuthenticatedOwner,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .checkout
        .get_session_for_owner(session_id, owner_id)
        .await?;

    let order = state.services.finalizer.finalize(session_id).await?;

    Ok(created_response(OrderResponse::from(order)))
}

// Request/Response DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1))]
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub id: Uuid,
    pub status: checkout_session::CheckoutStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: serde_json::Value,
    pub total_price: Decimal,
    pub payment_correlation_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<CheckoutItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub variant: Option<serde_json::Value>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<SessionWithItems> for CheckoutSessionResponse {
    fn from(found: SessionWithItems) -> Self {
        let SessionWithItems { session, items } = found;
        Self {
            id: session.id,
            status: session.status,
            payment_method: session.payment_method,
            shipping_address: session.shipping_address,
            total_price: session.total_price,
            payment_correlation_id: session.payment_correlation_id,
            paid_at: session.paid_at,
            finalized_at: session.finalized_at,
            created_at: session.created_at,
            items: items.into_iter().map(CheckoutItemResponse::from).collect(),
        }
    }
}

impl From<checkout_item::Model> for CheckoutItemResponse {
    fn from(item: checkout_item::Model) -> Self {
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

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub correlation_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub status: &'static str,
    pub paid_at: Option<DateTime<Utc>>,
    pub gateway_status: Option<String>,
}

impl From<VerificationOutcome> for VerifyPaymentResponse {
    fn from(outcome: VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Paid { paid_at } => Self {
                status: "paid",
                paid_at: Some(paid_at),
                gateway_status: None,
            },
            VerificationOutcome::Failed { gateway_status } => Self {
                status: "failed",
                paid_at: None,
                gateway_status: Some(gateway_status),
            },
        }
    }
}
