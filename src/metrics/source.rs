//! Read access to checks and their raw results.

use async_trait::async_trait;

use crate::db::{Check, RawCheckResult, ResultWindow, Store};
use crate::error::EngineError;

/// The result store as seen by the engine.
///
/// Both lookups are scoped to the caller's account and fail with
/// [`EngineError::NotFound`] for checks the account does not own.
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn get_check(&self, account_id: &str, check_id: i64) -> Result<Check, EngineError>;

    async fn get_results(
        &self,
        account_id: &str,
        check_id: i64,
        window: &ResultWindow,
    ) -> Result<Vec<RawCheckResult>, EngineError>;
}

#[async_trait]
impl ResultSource for Store {
    async fn get_check(&self, account_id: &str, check_id: i64) -> Result<Check, EngineError> {
        let store = self.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || store.get_check(&account_id, check_id))
            .await
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?
            .map_err(EngineError::from)
    }

    async fn get_results(
        &self,
        account_id: &str,
        check_id: i64,
        window: &ResultWindow,
    ) -> Result<Vec<RawCheckResult>, EngineError> {
        let store = self.clone();
        let account_id = account_id.to_string();
        let window = *window;
        tokio::task::spawn_blocking(move || store.get_results(&account_id, check_id, &window))
            .await
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?
            .map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewCheckResult;
    use chrono::Utc;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_store_source_scopes_by_account() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let mut check = Check {
            account_id: "alice".to_string(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        let id = store.add_check(&mut check, 5).unwrap();
        store
            .add_results(&[NewCheckResult {
                check_id: id,
                region: "us".to_string(),
                status_code: Some(200),
                latency_ms: 80.0,
                success: true,
                error_message: None,
                time: Utc::now(),
            }])
            .unwrap();

        let source: &dyn ResultSource = &store;
        assert_eq!(source.get_check("alice", id).await.unwrap().id, id);
        assert_eq!(
            source.get_results("alice", id, &ResultWindow::default()).await.unwrap().len(),
            1
        );
        assert_eq!(source.get_check("bob", id).await, Err(EngineError::NotFound));
        assert_eq!(
            source.get_results("bob", id, &ResultWindow::default()).await,
            Err(EngineError::NotFound)
        );
    }
}
