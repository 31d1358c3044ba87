//! Quota checks against freshly fetched usage.

use std::sync::Arc;

use async_trait::async_trait;

use super::enforcer;
use crate::db::{PlanUsage, Store};
use crate::error::EngineError;

/// Where plan usage comes from.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn get_usage(&self, account_id: &str) -> Result<PlanUsage, EngineError>;
}

#[async_trait]
impl UsageSource for Store {
    async fn get_usage(&self, account_id: &str) -> Result<PlanUsage, EngineError> {
        let store = self.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || store.get_usage(&account_id))
            .await
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?
            .map_err(EngineError::from)
    }
}

/// Evaluates plan gates for an account. Every call fetches a fresh usage
/// snapshot; nothing is cached between calls.
#[derive(Clone)]
pub struct QuotaService {
    usage: Arc<dyn UsageSource>,
}

impl QuotaService {
    pub fn new(usage: Arc<dyn UsageSource>) -> Self {
        Self { usage }
    }

    pub async fn usage(&self, account_id: &str) -> Result<PlanUsage, EngineError> {
        self.usage.get_usage(account_id).await
    }

    pub async fn can_create_check(&self, account_id: &str) -> Result<bool, EngineError> {
        let usage = self.usage(account_id).await?;
        Ok(enforcer::can_create_check(&usage))
    }

    pub async fn is_interval_allowed(&self, account_id: &str, minutes: u32) -> Result<bool, EngineError> {
        let usage = self.usage(account_id).await?;
        Ok(enforcer::is_interval_allowed(&usage, minutes))
    }

    /// Gate a check creation. Returns the snapshot the decision was made on.
    pub async fn authorize_create(&self, account_id: &str, interval_minutes: u32) -> Result<PlanUsage, EngineError> {
        let usage = self.usage(account_id).await?;
        enforcer::ensure_can_create(&usage)?;
        enforcer::ensure_interval_allowed(&usage, interval_minutes)?;
        Ok(usage)
    }

    /// Gate an interval change on an existing check.
    pub async fn authorize_interval(&self, account_id: &str, interval_minutes: u32) -> Result<PlanUsage, EngineError> {
        let usage = self.usage(account_id).await?;
        enforcer::ensure_interval_allowed(&usage, interval_minutes)?;
        Ok(usage)
    }
}
