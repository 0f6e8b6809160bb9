use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, Set};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::checkout_session::{self, CheckoutStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayPaymentStatus, PaymentGateway},
};

use super::sessions::{self, SessionWithItems};

/// Terminal result of payment verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Paid { paid_at: DateTime<Utc> },
    Failed { gateway_status: String },
}

/// Drives gateway lookups and applies the Paid/Failed transitions.
///
/// The gateway is the sole source of truth for payment outcome: the
/// caller-supplied correlation id only gates the request, the lookup always
/// uses the id stored on the session.
#[derive(Clone)]
pub struct PaymentVerifier {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl PaymentVerifier {
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

    /// Verifies the payment outcome for a session.
    ///
    /// Idempotent: once the session has reached Paid or Failed, the stored
    /// result is returned without querying the gateway again. A correlation
    /// id that does not match the stored one is rejected outright and leaves
    /// the session untouched.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn verify_payment(
        &self,
        session_id: Uuid,
        claimed_correlation_id: &str,
    ) -> Result<VerificationOutcome, ServiceError> {
        let SessionWithItems { session, .. } =
            sessions::load_session(&*self.db, session_id).await?;

        // Terminal statuses short-circuit before any gateway traffic.
        if let Some(outcome) = settled_outcome(&session)? {
            return Ok(outcome);
        }

        if session.status != CheckoutStatus::PaymentInitiated {
            return Err(ServiceError::InvalidState(format!(
                "payment cannot be verified for a session in status {}",
                session.status.as_str()
            )));
        }

        let stored = session
            .payment_correlation_id
            .as_deref()
            .ok_or(ServiceError::InternalServerError)?;
        if stored != claimed_correlation_id {
            warn!(
                session_id = %session_id,
                "verification rejected: correlation id does not match stored id"
            );
            return Err(ServiceError::CorrelationMismatch(session_id));
        }

        // Never trust the caller's claimed status; ask the gateway using the
        // id we stored at initiation.
        let gateway_status = self.gateway.lookup(stored).await?;

        match gateway_status {
            GatewayPaymentStatus::Completed => {
                let paid_at = Utc::now();
                match sessions::transition(
                    &*self.db,
                    &session,
                    CheckoutStatus::PaymentInitiated,
                    CheckoutStatus::Paid,
                    |change| {
                        change.paid_at = Set(Some(paid_at));
                        change.payment_status =
                            Set(Some(GatewayPaymentStatus::Completed.as_str().to_string()));
                    },
                )
                .await
                {
                    Ok(updated) => {
                        info!(session_id = %session_id, "payment verified");
                        self.event_sender
                            .send(Event::PaymentVerified { session_id })
                            .await;
                        Ok(VerificationOutcome::Paid {
                            paid_at: updated.paid_at.unwrap_or(paid_at),
                        })
                    }
                    Err(ServiceError::Conflict(msg)) => {
                        self.adopt_settled_outcome(session_id, msg).await
                    }
                    Err(err) => Err(err),
                }
            }
            other => {
                match sessions::transition(
                    &*self.db,
                    &session,
                    CheckoutStatus::PaymentInitiated,
                    CheckoutStatus::Failed,
                    |change| {
                        change.payment_status = Set(Some(other.as_str().to_string()));
                    },
                )
                .await
                {
                    Ok(_) => {
                        warn!(
                            session_id = %session_id,
                            gateway_status = other.as_str(),
                            "payment not completed; session marked failed"
                        );
                        self.event_sender
                            .send(Event::PaymentFailed {
                                session_id,
                                gateway_status: other.as_str().to_string(),
                            })
                            .await;
                        Ok(VerificationOutcome::Failed {
                            gateway_status: other.as_str().to_string(),
                        })
                    }
                    Err(ServiceError::Conflict(msg)) => {
                        self.adopt_settled_outcome(session_id, msg).await
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// After losing a transition race, adopt whatever terminal outcome the
    /// winner committed.
    async fn adopt_settled_outcome(
        &self,
        session_id: Uuid,
        conflict: String,
    ) -> Result<VerificationOutcome, ServiceError> {
        let SessionWithItems { session, .. } =
            sessions::load_session(&*self.db, session_id).await?;
        settled_outcome(&session)?.ok_or(ServiceError::Conflict(conflict))
    }
}

/// The stored terminal result, if the session already reached one.
fn settled_outcome(
    session: &checkout_session::Model,
) -> Result<Option<VerificationOutcome>, ServiceError> {
    match session.status {
        CheckoutStatus::Paid | CheckoutStatus::Finalized => {
            let paid_at = session.paid_at.ok_or(ServiceError::InternalServerError)?;
            Ok(Some(VerificationOutcome::Paid { paid_at }))
        }
        CheckoutStatus::Failed => Ok(Some(VerificationOutcome::Failed {
            gateway_status: session
                .payment_status
                .clone()
                .unwrap_or_else(|| GatewayPaymentStatus::Unknown.as_str().to_string()),
        })),
        _ => Ok(None),
    }
}
