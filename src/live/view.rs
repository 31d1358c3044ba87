//! Dashboard view state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Check;
use crate::error::EngineError;
use crate::metrics::{Aggregation, CheckMetrics, RegionalMetrics, TimeSeriesPoint};

pub type ViewId = u64;

/// Lifecycle of a view. `Ready`, `Degraded` and `Error` go back to
/// `Loading` on the next tick or explicit refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPhase {
    Idle,
    Loading,
    Ready,
    /// Check metadata loaded but its results did not.
    Degraded,
    /// Check metadata failed to load this time around.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewError {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&EngineError> for ViewError {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_recoverable(),
        }
    }
}

/// What a dashboard renders for one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub view_id: ViewId,
    pub check_id: i64,
    pub phase: ViewPhase,
    pub check: Option<Check>,
    pub metrics: CheckMetrics,
    pub regions: Vec<RegionalMetrics>,
    pub timeseries: Vec<TimeSeriesPoint>,
    /// False while degraded: `metrics` then holds zeros, not real data.
    pub metrics_available: bool,
    pub error: Option<ViewError>,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Number of completed refreshes.
    pub refresh_count: u64,
}

impl ViewSnapshot {
    pub fn new(view_id: ViewId, check_id: i64) -> Self {
        Self {
            view_id,
            check_id,
            phase: ViewPhase::Idle,
            check: None,
            metrics: CheckMetrics::default(),
            regions: Vec::new(),
            timeseries: Vec::new(),
            metrics_available: false,
            error: None,
            refreshed_at: None,
            refresh_count: 0,
        }
    }
}

/// Result of one refresh round-trip.
#[derive(Debug)]
pub(crate) enum RefreshOutcome {
    Ready { check: Check, aggregation: Aggregation },
    Degraded { check: Check, error: EngineError },
    Failed(EngineError),
}

impl ViewSnapshot {
    /// Apply a refresh outcome. A failed metadata fetch keeps whatever was
    /// on screen before.
    pub(crate) fn apply(&mut self, outcome: RefreshOutcome, now: DateTime<Utc>) {
        match outcome {
            RefreshOutcome::Ready { check, aggregation } => {
                self.phase = ViewPhase::Ready;
                self.check = Some(check);
                self.metrics = aggregation.metrics;
                self.regions = aggregation.regions;
                self.timeseries = aggregation.timeseries;
                self.metrics_available = true;
                self.error = None;
                self.refreshed_at = Some(now);
            }
            RefreshOutcome::Degraded { check, error } => {
                self.phase = ViewPhase::Degraded;
                self.check = Some(check);
                self.metrics = CheckMetrics::default();
                self.regions.clear();
                self.timeseries.clear();
                self.metrics_available = false;
                self.error = Some(ViewError::from(&error));
                self.refreshed_at = Some(now);
            }
            RefreshOutcome::Failed(error) => {
                self.phase = ViewPhase::Error;
                self.error = Some(ViewError::from(&error));
            }
        }
        self.refresh_count += 1;
    }
}
