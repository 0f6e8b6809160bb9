use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checkout_session::PaymentMethod;

/// Finalized order. Created exactly once per checkout session that reaches
/// Finalized; outlives the session record for business and audit purposes.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub order_number: String,

    /// Originating session. The unique constraint is the storage-level
    /// guarantee that a session settles into at most one order.
    #[sea_orm(unique)]
    pub checkout_session_id: Uuid,

    pub owner_id: Uuid,

    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,

    pub payment_method: PaymentMethod,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: Decimal,

    /// Always true at creation; orders are only created from Paid sessions.
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,

    /// False at creation; flipped by out-of-scope fulfillment logic.
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,

    /// Gateway-reported status and correlation token, copied from the session.
    pub payment_status: Option<String>,
    pub payment_correlation_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    Items,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
