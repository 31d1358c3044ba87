//! Upward-facing metrics operations.

use std::sync::Arc;

use super::aggregate::{self, CheckMetrics, RegionalMetrics, TimeSeriesPoint};
use super::source::ResultSource;
use crate::db::{RawCheckResult, ResultWindow};
use crate::error::EngineError;

/// Computes derived metrics for a check on demand.
#[derive(Clone)]
pub struct MetricsService {
    source: Arc<dyn ResultSource>,
    timeseries_points: usize,
}

impl MetricsService {
    pub fn new(source: Arc<dyn ResultSource>, timeseries_points: usize) -> Self {
        Self {
            source,
            timeseries_points,
        }
    }

    async fn window(
        &self,
        account_id: &str,
        check_id: i64,
        window: &ResultWindow,
    ) -> Result<Vec<RawCheckResult>, EngineError> {
        self.source
            .get_results(account_id, check_id, window)
            .await
            .map_err(|e| match e {
                EngineError::NotFound => EngineError::NotFound,
                other => EngineError::SourceUnavailable(other.to_string()),
            })
    }

    /// Summary statistics, or `SourceUnavailable` when the window cannot be
    /// read. No zero-valued fallback is produced here.
    pub async fn get_check_metrics(
        &self,
        account_id: &str,
        check_id: i64,
        window: &ResultWindow,
    ) -> Result<CheckMetrics, EngineError> {
        let results = self.window(account_id, check_id, window).await?;
        Ok(aggregate::aggregate(&results, window))
    }

    pub async fn get_regional_breakdown(
        &self,
        account_id: &str,
        check_id: i64,
        window: &ResultWindow,
    ) -> Result<Vec<RegionalMetrics>, EngineError> {
        let results = self.window(account_id, check_id, window).await?;
        Ok(aggregate::regional_breakdown(&results, window))
    }

    pub async fn get_time_series(
        &self,
        account_id: &str,
        check_id: i64,
        window: &ResultWindow,
    ) -> Result<Vec<TimeSeriesPoint>, EngineError> {
        let results = self.window(account_id, check_id, window).await?;
        Ok(aggregate::time_series(&results, window, self.timeseries_points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Check;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedSource {
        results: Result<Vec<RawCheckResult>, EngineError>,
    }

    #[async_trait]
    impl ResultSource for FixedSource {
        async fn get_check(&self, _account_id: &str, check_id: i64) -> Result<Check, EngineError> {
            Ok(Check {
                id: check_id,
                ..Default::default()
            })
        }

        async fn get_results(
            &self,
            _account_id: &str,
            _check_id: i64,
            _window: &ResultWindow,
        ) -> Result<Vec<RawCheckResult>, EngineError> {
            self.results.clone()
        }
    }

    fn raw(region: &str, success: bool, latency: f64) -> RawCheckResult {
        RawCheckResult {
            id: 1,
            check_id: 1,
            region: Some(region.to_string()),
            status_code: None,
            latency_ms: Some(latency),
            success: Some(success),
            error_message: None,
            time: Utc::now(),
            invalid: None,
        }
    }

    #[tokio::test]
    async fn test_metrics_from_source() {
        let service = MetricsService::new(
            Arc::new(FixedSource {
                results: Ok(vec![raw("us", true, 100.0), raw("eu", false, 300.0)]),
            }),
            24,
        );
        let window = ResultWindow::default();

        let metrics = service.get_check_metrics("a", 1, &window).await.unwrap();
        assert_eq!(metrics.uptime_percentage, 50.0);
        assert_eq!(metrics.average_latency, 200.0);

        let regions = service.get_regional_breakdown("a", 1, &window).await.unwrap();
        assert_eq!(regions.len(), 2);

        let series = service.get_time_series("a", 1, &window).await.unwrap();
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn test_source_failure_returns_no_metrics() {
        let service = MetricsService::new(
            Arc::new(FixedSource {
                results: Err(EngineError::SourceUnavailable("disk I/O error".to_string())),
            }),
            24,
        );
        let err = service
            .get_check_metrics("a", 1, &ResultWindow::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SourceUnavailable(_)));

        let missing = MetricsService::new(
            Arc::new(FixedSource {
                results: Err(EngineError::NotFound),
            }),
            24,
        );
        assert_eq!(
            missing.get_regional_breakdown("a", 1, &ResultWindow::default()).await,
            Err(EngineError::NotFound)
        );
    }
}
