use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

use super::{GatewayInitiation, GatewayPaymentStatus, PaymentGateway};

/// Khalti ePayment adapter (initiate + lookup).
///
/// Transient failures (network errors, 5xx) are retried with exponential
/// backoff up to `max_retries` before surfacing `GatewayUnavailable`; 4xx
/// responses surface `GatewayRejected` without retry.
#[derive(Clone)]
pub struct KhaltiGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Debug, Serialize)]
struct InitiateRequest<'a> {
    return_url: &'a str,
    website_url: &'a str,
    /// Amount in paisa (minor units).
    amount: i64,
    purchase_order_id: String,
    purchase_order_name: String,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    pidx: String,
    payment_url: String,
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    pidx: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
}

impl KhaltiGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// POSTs a JSON body, retrying transient failures with exponential
    /// backoff. Returns the successful response for the caller to decode.
    async fn post_with_retry<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ServiceError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(&url)
                .header("Authorization", format!("Key {}", self.config.secret_key))
                .json(body)
                .send()
                .await;

            let retryable = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_client_error() => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    return Err(ServiceError::GatewayRejected(format!(
                        "{} from gateway: {}",
                        status, detail
                    )));
                }
                Ok(response) => format!("gateway returned {}", response.status()),
                Err(e) => format!("request failed: {}", e),
            };

            attempt += 1;
            if attempt >= self.config.max_retries {
                return Err(ServiceError::GatewayUnavailable(retryable));
            }
            let backoff = self.config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(url = %url, attempt, backoff_ms = backoff, "retrying gateway call: {}", retryable);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for KhaltiGateway {
    #[instrument(skip(self))]
    async fn initiate(
        &self,
        session_id: Uuid,
        amount: Decimal,
    ) -> Result<GatewayInitiation, ServiceError> {
        let request = InitiateRequest {
            return_url: &self.config.return_url,
            website_url: &self.config.website_url,
            amount: to_paisa(amount)?,
            purchase_order_id: session_id.to_string(),
            purchase_order_name: format!("Order_{}", session_id),
        };

        let response = self
            .post_with_retry("epayment/initiate/", &request)
            .await?
            .json::<InitiateResponse>()
            .await
            .map_err(|e| {
                ServiceError::GatewayUnavailable(format!("malformed initiate response: {}", e))
            })?;

        Ok(GatewayInitiation {
            correlation_id: response.pidx,
            redirect_url: response.payment_url,
        })
    }

    #[instrument(skip(self))]
    async fn lookup(&self, correlation_id: &str) -> Result<GatewayPaymentStatus, ServiceError> {
        let request = LookupRequest {
            pidx: correlation_id,
        };

        let response = self
            .post_with_retry("epayment/lookup/", &request)
            .await?
            .json::<LookupResponse>()
            .await
            .map_err(|e| {
                ServiceError::GatewayUnavailable(format!("malformed lookup response: {}", e))
            })?;

        Ok(map_status(&response.status))
    }
}

/// Converts a decimal amount in rupees to paisa, the gateway's minor unit.
fn to_paisa(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("amount {} not representable in paisa", amount))
        })
}

fn map_status(status: &str) -> GatewayPaymentStatus {
    match status {
        "Completed" => GatewayPaymentStatus::Completed,
        "Pending" | "Initiated" => GatewayPaymentStatus::Pending,
        "Expired" | "User canceled" | "Refunded" => GatewayPaymentStatus::Failed,
        _ => GatewayPaymentStatus::Unknown,
    }
}
