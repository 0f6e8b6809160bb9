use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a checkout session. Pending is the initial state; Finalized
/// and Failed are terminal. All transitions go through
/// `services::sessions::transition`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "payment_initiated")]
    PaymentInitiated,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "finalized")]
    Finalized,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Pending => "pending",
            CheckoutStatus::PaymentInitiated => "payment_initiated",
            CheckoutStatus::Paid => "paid",
            CheckoutStatus::Finalized => "finalized",
            CheckoutStatus::Failed => "failed",
        }
    }
}

/// Payment channel chosen at checkout time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "khalti")]
    Khalti,
    #[sea_orm(string_value = "cash_on_delivery")]
    CashOnDelivery,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Verified caller identity supplied by the upstream auth layer.
    pub owner_id: Uuid,

    pub status: CheckoutStatus,
    pub payment_method: PaymentMethod,

    /// Structured address snapshot, serialized as JSON.
    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: Decimal,

    /// Token issued by the payment gateway at initiation; unset until then.
    pub payment_correlation_id: Option<String>,

    /// Last gateway-reported payment status ("Completed", "Pending", ...).
    pub payment_status: Option<String>,

    pub paid_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optimistic-lock counter, bumped on every transition.
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::checkout_item::Entity")]
    Items,
}

impl Related<super::checkout_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
