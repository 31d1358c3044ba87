//! Retention manager for cleaning up old results.

use crate::db::Store;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Manager for deleting results past each account's plan retention.
pub struct RetentionManager {
    store: Arc<Store>,
    sweep_interval: Duration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, sweep_interval: Duration) -> Self {
        Self {
            store,
            sweep_interval,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let stop = self.stop.clone();
        let period = self.sweep_interval;

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        let store = store.clone();
                        let swept = tokio::task::spawn_blocking(move || {
                            process_retention(&store, Utc::now())
                        })
                        .await;
                        if let Err(e) = swept {
                            tracing::error!("RetentionManager: Sweep task failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

/// Delete every result older than its owner's retention period. Returns
/// the number of rows removed.
fn process_retention(store: &Store, now: DateTime<Utc>) -> usize {
    let checks = match store.get_all_checks() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("RetentionManager: Failed to get checks: {}", e);
            return 0;
        }
    };

    let mut retention_days: HashMap<String, u32> = HashMap::new();
    let mut deleted = 0;

    for check in checks {
        let days = match retention_days.get(&check.account_id) {
            Some(d) => *d,
            None => match store.get_profile(&check.account_id) {
                Ok(profile) => {
                    let d = profile.retention_days.value();
                    retention_days.insert(check.account_id.clone(), d);
                    d
                }
                Err(e) => {
                    tracing::error!(
                        "RetentionManager: Failed to get profile for {}: {}",
                        check.account_id,
                        e
                    );
                    continue;
                }
            },
        };

        // Retention reaching back past the calendar keeps everything.
        let Some(cutoff) = now.checked_sub_signed(ChronoDuration::days(days as i64)) else {
            tracing::debug!(
                "RetentionManager: {} keeps {} days, nothing to expire",
                check.account_id,
                days
            );
            continue;
        };
        match store.delete_results_before(check.id, cutoff) {
            Ok(n) => deleted += n,
            Err(e) => tracing::error!(
                "RetentionManager: Failed to delete results for check {}: {}",
                check.id,
                e
            ),
        }
    }

    if deleted > 0 {
        tracing::info!("RetentionManager: Deleted {} expired results", deleted);
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Check, NewCheckResult, PlanTier, ResultWindow};
    use tempfile::NamedTempFile;

    fn result(check_id: i64, time: DateTime<Utc>) -> NewCheckResult {
        NewCheckResult {
            check_id,
            region: "us".to_string(),
            status_code: Some(200),
            latency_ms: 10.0,
            success: true,
            error_message: None,
            time,
        }
    }

    fn add_check(store: &Store, account: &str) -> i64 {
        let mut check = Check {
            account_id: account.to_string(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        store.add_check(&mut check, 10).unwrap()
    }

    #[test]
    fn test_retention_follows_plan() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let now = Utc::now();

        // Free keeps 7 days, pro keeps 90.
        let free = add_check(&store, "free");
        let pro = add_check(&store, "pro");
        store.set_plan("pro", PlanTier::Pro).unwrap();

        for id in [free, pro] {
            store
                .add_results(&[
                    result(id, now - ChronoDuration::days(1)),
                    result(id, now - ChronoDuration::days(10)),
                    result(id, now - ChronoDuration::days(100)),
                ])
                .unwrap();
        }

        assert_eq!(process_retention(&store, now), 3);

        let window = ResultWindow::default();
        assert_eq!(store.get_results("free", free, &window).unwrap().len(), 1);
        assert_eq!(store.get_results("pro", pro, &window).unwrap().len(), 2);
    }

    #[test]
    fn test_retention_honours_override() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let now = Utc::now();

        let id = add_check(&store, "alice");
        store
            .upsert_profile("alice", Some(PlanTier::Free), None, None, Some(30))
            .unwrap();
        store
            .add_results(&[result(id, now - ChronoDuration::days(10))])
            .unwrap();

        assert_eq!(process_retention(&store, now), 0);
    }

    #[test]
    fn test_unbounded_retention_keeps_results() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let now = Utc::now();

        let id = add_check(&store, "alice");
        store
            .upsert_profile("alice", Some(PlanTier::Free), None, None, Some(u32::MAX))
            .unwrap();
        store
            .add_results(&[result(id, now - ChronoDuration::days(3650))])
            .unwrap();

        assert_eq!(process_retention(&store, now), 0);
        assert_eq!(
            store.get_results("alice", id, &ResultWindow::default()).unwrap().len(),
            1
        );
    }
}
