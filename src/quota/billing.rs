//! Subscription provider client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::PlanTier;
use crate::error::EngineError;

/// Billing error types.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<BillingError> for EngineError {
    fn from(err: BillingError) -> Self {
        EngineError::Billing(err.to_string())
    }
}

/// Payment/subscription provider, opaque beyond these calls.
#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    /// Start an upgrade to `plan`, returning the checkout URL.
    async fn create_upgrade_preference(&self, account_id: &str, plan: PlanTier) -> Result<String, BillingError>;

    async fn cancel_subscription(&self, account_id: &str) -> Result<(), BillingError>;
}

#[derive(Debug, Serialize)]
struct PreferenceRequest<'a> {
    account_id: &'a str,
    plan: PlanTier,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    #[serde(default)]
    checkout_url: Option<String>,
}

/// JSON-over-HTTP subscription provider.
pub struct HttpSubscriptionProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSubscriptionProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<String, BillingError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| BillingError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BillingError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(BillingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl SubscriptionProvider for HttpSubscriptionProvider {
    async fn create_upgrade_preference(&self, account_id: &str, plan: PlanTier) -> Result<String, BillingError> {
        let body = self
            .post("/preferences", &PreferenceRequest { account_id, plan })
            .await?;

        let parsed: PreferenceResponse =
            serde_json::from_str(&body).map_err(|e| BillingError::InvalidResponse(e.to_string()))?;

        match parsed.checkout_url {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(BillingError::InvalidResponse("missing checkout_url".to_string())),
        }
    }

    async fn cancel_subscription(&self, account_id: &str) -> Result<(), BillingError> {
        self.post(
            &format!("/subscriptions/{}/cancel", account_id),
            &serde_json::json!({}),
        )
        .await?;
        tracing::info!("Billing: cancelled subscription for {}", account_id);
        Ok(())
    }
}
