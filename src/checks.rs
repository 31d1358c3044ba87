//! Check lifecycle: creation and edits gated by the account's plan.

use chrono::Utc;
use serde::Deserialize;

use crate::db::{validate_check, Check, CheckInterval, DbError, LifecycleStatus, Store};
use crate::error::EngineError;
use crate::quota::QuotaService;

/// User-supplied check definition for create and update requests.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckDraft {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    pub interval: CheckInterval,
    pub regions: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u32>,
    #[serde(default)]
    pub expected_status_code: Option<u16>,
    #[serde(default)]
    pub status: Option<LifecycleStatus>,
}

impl CheckDraft {
    fn apply(self, check: &mut Check) {
        check.url = self.url;
        check.name = self.name.filter(|n| !n.trim().is_empty());
        check.interval = self.interval;
        check.regions = self.regions;
        if let Some(timeout) = self.timeout_secs {
            check.timeout_secs = timeout;
        }
        if let Some(code) = self.expected_status_code {
            check.expected_status_code = code;
        }
        if let Some(status) = self.status {
            check.status = status;
        }
    }
}

/// Creates, edits and deletes checks on behalf of an account.
#[derive(Clone)]
pub struct CheckManager {
    store: Store,
    quota: QuotaService,
}

impl CheckManager {
    pub fn new(store: Store, quota: QuotaService) -> Self {
        Self { store, quota }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(Store) -> Result<T, DbError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?
            .map_err(EngineError::from)
    }

    pub async fn list(&self, account_id: &str) -> Result<Vec<Check>, EngineError> {
        let account_id = account_id.to_string();
        self.blocking(move |store| store.get_checks(&account_id)).await
    }

    pub async fn get(&self, account_id: &str, id: i64) -> Result<Check, EngineError> {
        let account_id = account_id.to_string();
        self.blocking(move |store| store.get_check(&account_id, id)).await
    }

    /// Create a check. The plan gates run on a freshly fetched usage
    /// snapshot, and the store re-checks the count inside the insert.
    pub async fn create(&self, account_id: &str, draft: CheckDraft) -> Result<Check, EngineError> {
        let mut check = Check {
            account_id: account_id.to_string(),
            created_at: Utc::now(),
            ..Default::default()
        };
        draft.apply(&mut check);
        validate_check(&check).map_err(EngineError::InvalidRequest)?;

        let usage = self
            .quota
            .authorize_create(account_id, check.interval.minutes())
            .await?;

        let check = self
            .blocking(move |store| {
                store.add_check(&mut check, usage.checks.limit)?;
                Ok(check)
            })
            .await?;

        tracing::info!(
            "Checks: {} created check {} ({}, every {})",
            account_id,
            check.id,
            check.url,
            check.interval
        );
        Ok(check)
    }

    /// Update a check. Only a changed interval is re-validated against the
    /// plan floor, so checks created under a higher tier stay editable.
    pub async fn update(&self, account_id: &str, id: i64, draft: CheckDraft) -> Result<Check, EngineError> {
        let mut check = self.get(account_id, id).await?;
        let previous_interval = check.interval;
        draft.apply(&mut check);
        validate_check(&check).map_err(EngineError::InvalidRequest)?;

        if check.interval != previous_interval {
            self.quota
                .authorize_interval(account_id, check.interval.minutes())
                .await?;
        }

        self.blocking(move |store| {
            store.update_check(&check)?;
            Ok(check)
        })
        .await
    }

    /// Delete a check together with its results.
    pub async fn delete(&self, account_id: &str, id: i64) -> Result<(), EngineError> {
        let account = account_id.to_string();
        self.blocking(move |store| store.delete_check(&account, id)).await?;
        tracing::info!("Checks: {} deleted check {}", account_id, id);
        Ok(())
    }
}
