//! Scheduler module for ingesting probe results and expiring old data.

mod retention;

pub use retention::*;

use crate::db::{CheckStatus, DbError, NewCheckResult, Store};
use crate::error::EngineError;
use crate::metrics::{classify, next_state};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Accepts results from the prober and runs background maintenance.
pub struct Scheduler {
    result_tx: mpsc::Sender<NewCheckResult>,
    retention_manager: Arc<RetentionManager>,
}

impl Scheduler {
    /// Create a new scheduler with the given store.
    pub fn new(store: Arc<Store>, retention_sweep: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1000);

        let retention_manager = Arc::new(RetentionManager::new(store.clone(), retention_sweep));

        // Start batch writer in a separate task
        tokio::spawn(run_batch_writer(rx, store));

        Self {
            result_tx: tx,
            retention_manager,
        }
    }

    /// Start background maintenance.
    pub fn start(&self) {
        tracing::info!("Starting scheduler");
        self.retention_manager.start();
    }

    /// Stop background maintenance.
    pub async fn stop(&self) {
        self.retention_manager.stop().await;
    }

    /// Queue validated results for the batch writer.
    pub async fn submit(&self, results: Vec<NewCheckResult>) -> Result<usize, EngineError> {
        for r in &results {
            r.validate().map_err(EngineError::InvalidRequest)?;
        }

        let count = results.len();
        for r in results {
            self.result_tx
                .send(r)
                .await
                .map_err(|_| EngineError::SourceUnavailable("result writer stopped".to_string()))?;
        }
        Ok(count)
    }
}

/// Run the batch writer that accumulates and flushes results.
async fn run_batch_writer(mut rx: mpsc::Receiver<NewCheckResult>, store: Arc<Store>) {
    let mut buffer: Vec<NewCheckResult> = Vec::with_capacity(100);
    let mut interval = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Some(r) => {
                        buffer.push(r);
                        if buffer.len() >= 500 {
                            flush_buffer(&store, &mut buffer);
                        }
                    }
                    None => {
                        // Channel closed, flush remaining and exit
                        flush_buffer(&store, &mut buffer);
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                flush_buffer(&store, &mut buffer);
            }
        }
    }
}

fn flush_buffer(store: &Store, buffer: &mut Vec<NewCheckResult>) {
    if buffer.is_empty() {
        return;
    }

    match store.add_results(buffer) {
        Ok(inserted) => {
            if inserted < buffer.len() {
                tracing::warn!(
                    "Dropped {} results for unknown checks",
                    buffer.len() - inserted
                );
            }
            update_check_states(store, buffer);
        }
        Err(e) => tracing::error!("Failed to flush results: {}", e),
    }

    buffer.clear();
}

/// Fold freshly written results onto each check's last status and
/// failure streak, in time order. Results older than the newest one
/// already folded are stored but do not change the derived state.
fn update_check_states(store: &Store, results: &[NewCheckResult]) {
    let mut by_check: BTreeMap<i64, Vec<&NewCheckResult>> = BTreeMap::new();
    for r in results {
        by_check.entry(r.check_id).or_default().push(r);
    }

    for (check_id, mut results) in by_check {
        results.sort_by_key(|r| r.time);

        let check = match store.get_check_by_id(check_id) {
            Ok(c) => c,
            Err(DbError::NotFound) => continue,
            Err(e) => {
                tracing::error!("Failed to load check {}: {}", check_id, e);
                continue;
            }
        };

        let mut last_status: Option<CheckStatus> = check.last_status;
        let mut streak = check.failure_streak;
        let mut last_result_at = check.last_result_at;
        let mut late = 0;
        for r in results {
            if last_result_at.is_some_and(|seen| r.time < seen) {
                late += 1;
                continue;
            }
            let result = r.as_check_result();
            let verdict = classify(&result, check.expected_status_code);
            if verdict.status == CheckStatus::Up && !verdict.status_confirmed {
                tracing::debug!(
                    "Check {} succeeded in {} with status {:?}, expected {}",
                    check_id,
                    result.region,
                    result.status_code,
                    check.expected_status_code
                );
            }
            let (status, next_streak) = next_state(streak, &result);
            last_status = Some(status);
            streak = next_streak;
            last_result_at = Some(r.time);
        }

        if late > 0 {
            tracing::debug!(
                "Check {}: {} late results left out of the status",
                check_id,
                late
            );
        }

        if last_status != check.last_status {
            tracing::info!(
                "Check {} ({}) is now {}",
                check_id,
                check.url,
                last_status.map_or("unknown", CheckStatus::as_str)
            );
        }

        if let Err(e) = store.update_check_state(check_id, last_status, streak, last_result_at) {
            tracing::error!("Failed to update state of check {}: {}", check_id, e);
        }
    }
}
