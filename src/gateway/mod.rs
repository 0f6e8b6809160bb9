use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

pub mod khalti;

pub use khalti::KhaltiGateway;

/// Authoritative payment outcome as reported by the gateway's own lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayPaymentStatus {
    Completed,
    Pending,
    Failed,
    Unknown,
}

impl GatewayPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayPaymentStatus::Completed => "Completed",
            GatewayPaymentStatus::Pending => "Pending",
            GatewayPaymentStatus::Failed => "Failed",
            GatewayPaymentStatus::Unknown => "Unknown",
        }
    }
}

/// Result of a successful payment initiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInitiation {
    /// Opaque token identifying this payment attempt at the gateway.
    pub correlation_id: String,
    /// URL the customer is sent to to complete the payment.
    pub redirect_url: String,
}

/// Thin adapter over the payment gateway. Implementations hold no state
/// beyond the HTTP client; all durable state lives on the checkout session.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a payment attempt with the gateway.
    ///
    /// Fails with `GatewayUnavailable` on network/5xx errors and
    /// `GatewayRejected` when the gateway refuses the request.
    async fn initiate(
        &self,
        session_id: Uuid,
        amount: Decimal,
    ) -> Result<GatewayInitiation, ServiceError>;

    /// Looks up the authoritative status of a payment attempt.
    ///
    /// Read-only against the gateway and safe to call repeatedly.
    async fn lookup(&self, correlation_id: &str) -> Result<GatewayPaymentStatus, ServiceError>;
}
