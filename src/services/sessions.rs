use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        self, checkout_item, checkout_session,
        checkout_session::{CheckoutStatus, PaymentMethod},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayInitiation, PaymentGateway},
};

/// Structured shipping address captured with the session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    pub state: Option<String>,
    #[validate(length(min = 1))]
    pub postal_code: String,
    #[validate(length(min = 2))]
    pub country: String,
    pub phone: Option<String>,
}

/// One line item of a checkout request. Price and name are the caller's
/// catalog snapshot; they are frozen here and never re-read.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutItemInput {
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub name: String,
    pub variant: Option<serde_json::Value>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCheckoutInput {
    #[validate]
    pub items: Vec<CheckoutItemInput>,
    #[validate]
    pub shipping_address: Address,
    pub payment_method: PaymentMethod,
}

/// A session together with its frozen line items, in snapshot order.
#[derive(Debug, Clone)]
pub struct SessionWithItems {
    pub session: checkout_session::Model,
    pub items: Vec<checkout_item::Model>,
}

/// Owns checkout session creation and the state machine. Every mutation of a
/// session's status in the whole crate funnels through [`transition`].
#[derive(Clone)]
pub struct CheckoutSessionService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl CheckoutSessionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Creates a Pending session from a cart snapshot. No external side
    /// effects; the gateway is not contacted until payment initiation.
    #[instrument(skip(self, input), fields(owner_id = %owner_id))]
    pub async fn create_session(
        &self,
        owner_id: Uuid,
        input: CreateCheckoutInput,
    ) -> Result<SessionWithItems, ServiceError> {
        validate_items(&input.items)?;
        let total_price = compute_total(&input.items);

        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let shipping_address = serde_json::to_value(&input.shipping_address)
            .map_err(|e| ServiceError::ValidationError(format!("invalid address: {}", e)))?;

        let txn = self.db.begin().await?;

        let session = checkout_session::ActiveModel {
            id: Set(session_id),
            owner_id: Set(owner_id),
            status: Set(CheckoutStatus::Pending),
            payment_method: Set(input.payment_method),
            shipping_address: Set(shipping_address),
            total_price: Set(total_price),
            payment_correlation_id: Set(None),
            payment_status: Set(None),
            paid_at: Set(None),
            finalized_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(input.items.len());
        for (position, item) in input.items.iter().enumerate() {
            let model = checkout_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                session_id: Set(session_id),
                product_id: Set(item.product_id),
                name: Set(item.name.clone()),
                variant: Set(item.variant.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                line_total: Set(item.unit_price * Decimal::from(item.quantity)),
                position: Set(position as i32),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(model);
        }

        txn.commit().await?;

        info!(session_id = %session_id, total = %total_price, "checkout session created");
        self.event_sender
            .send(Event::CheckoutSessionCreated(session_id))
            .await;

        Ok(SessionWithItems { session, items })
    }

    /// Loads a session with its items, without an ownership check. Intended
    /// for the settlement services themselves.
    pub async fn load_session(&self, session_id: Uuid) -> Result<SessionWithItems, ServiceError> {
        load_session(&*self.db, session_id).await
    }

    /// Loads a session for the given caller. An ownership mismatch reads as
    /// NotFound so session ids cannot be probed across accounts.
    pub async fn get_session_for_owner(
        &self,
        session_id: Uuid,
        owner_id: Uuid,
    ) -> Result<SessionWithItems, ServiceError> {
        let found = self.load_session(session_id).await?;
        if found.session.owner_id != owner_id {
            return Err(ServiceError::NotFound(format!(
                "Checkout session {} not found",
                session_id
            )));
        }
        Ok(found)
    }

    /// Registers a payment attempt with the gateway and moves the session
    /// from Pending to PaymentInitiated, storing the correlation id.
    ///
    /// If the gateway accepts the initiation but the local transition loses,
    /// the correlation id is logged and flagged for reconciliation rather
    /// than dropped; money may be in flight under that id.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn initiate_payment(
        &self,
        session_id: Uuid,
    ) -> Result<GatewayInitiation, ServiceError> {
        let SessionWithItems { session, .. } = self.load_session(session_id).await?;

        if session.status != CheckoutStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "payment cannot be initiated for a session in status {}",
                session.status.as_str()
            )));
        }

        let initiation = self.gateway.initiate(session.id, session.total_price).await?;

        let correlation_id = initiation.correlation_id.clone();
        match transition(
            &*self.db,
            &session,
            CheckoutStatus::Pending,
            CheckoutStatus::PaymentInitiated,
            |change| {
                change.payment_correlation_id = Set(Some(correlation_id));
            },
        )
        .await
        {
            Ok(_) => {
                info!(
                    session_id = %session_id,
                    correlation_id = %initiation.correlation_id,
                    "payment initiated"
                );
                self.event_sender
                    .send(Event::PaymentInitiated {
                        session_id,
                        correlation_id: initiation.correlation_id.clone(),
                    })
                    .await;
                Ok(initiation)
            }
            Err(err) => {
                error!(
                    session_id = %session_id,
                    correlation_id = %initiation.correlation_id,
                    error = %err,
                    "gateway accepted initiation but session transition failed; needs reconciliation"
                );
                self.event_sender
                    .send(Event::PaymentInitiationOrphaned {
                        session_id,
                        correlation_id: initiation.correlation_id.clone(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    /// Sessions stuck in PaymentInitiated since before the cutoff, for an
    /// operator reconciliation job to re-drive verification.
    pub async fn stale_payment_initiated(
        &self,
        older_than: Duration,
    ) -> Result<Vec<checkout_session::Model>, ServiceError> {
        let cutoff = Utc::now() - older_than;
        let sessions = entities::CheckoutSession::find()
            .filter(checkout_session::Column::Status.eq(CheckoutStatus::PaymentInitiated))
            .filter(checkout_session::Column::UpdatedAt.lt(cutoff))
            .order_by_asc(checkout_session::Column::UpdatedAt)
            .all(&*self.db)
            .await?;
        Ok(sessions)
    }
}

pub(crate) async fn load_session<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
) -> Result<SessionWithItems, ServiceError> {
    let session = entities::CheckoutSession::find_by_id(session_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Checkout session {} not found", session_id))
        })?;

    let items = entities::CheckoutItem::find()
        .filter(checkout_item::Column::SessionId.eq(session_id))
        .order_by_asc(checkout_item::Column::Position)
        .all(conn)
        .await?;

    Ok(SessionWithItems { session, items })
}

/// The single mutation primitive of the session state machine.
///
/// Performs a conditional update keyed on the session's current status (and
/// optimistic version), so concurrent callers race on the storage layer
/// rather than on in-process state. Exactly one caller observes success; the
/// rest get `Conflict` carrying the status found at commit time.
pub(crate) async fn transition<C, F>(
    conn: &C,
    current: &checkout_session::Model,
    from: CheckoutStatus,
    to: CheckoutStatus,
    apply: F,
) -> Result<checkout_session::Model, ServiceError>
where
    C: ConnectionTrait,
    F: FnOnce(&mut checkout_session::ActiveModel),
{
    let mut change = checkout_session::ActiveModel {
        status: Set(to),
        version: Set(current.version + 1),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    apply(&mut change);

    let result = entities::CheckoutSession::update_many()
        .set(change)
        .filter(checkout_session::Column::Id.eq(current.id))
        .filter(checkout_session::Column::Status.eq(from))
        .filter(checkout_session::Column::Version.eq(current.version))
        .exec(conn)
        .await?;

    let reloaded = entities::CheckoutSession::find_by_id(current.id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Checkout session {} not found", current.id))
        })?;

    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "session {} expected status {} but found {}",
            current.id,
            from.as_str(),
            reloaded.status.as_str()
        )));
    }

    Ok(reloaded)
}

fn validate_items(items: &[CheckoutItemInput]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "no items in checkout".to_string(),
        ));
    }
    for item in items {
        if item.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for {} must be positive",
                item.product_id
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "unit price for {} must not be negative",
                item.product_id
            )));
        }
    }
    Ok(())
}

fn compute_total(items: &[CheckoutItemInput]) -> Decimal {
    items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum()
}
