//! Live view coordinator.
//!
//! Each open view owns a refresh loop. A refresh fetches check metadata and
//! results concurrently and folds the outcome into the view's snapshot.
//! At most one refresh per view is in flight; requests arriving meanwhile
//! wait for that refresh instead of starting another. Views nobody reads
//! for the idle timeout are closed by a background sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, watch, RwLock, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};

use super::view::{RefreshOutcome, ViewId, ViewPhase, ViewSnapshot};
use crate::db::ResultWindow;
use crate::error::EngineError;
use crate::metrics::{aggregate_all, ResultSource, DEFAULT_TIMESERIES_POINTS};

/// Upper bound of the random delay before a view's first refresh.
const MAX_START_JITTER_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct LiveViewConfig {
    /// Period of automatic refreshes. `None` refreshes only on request.
    pub refresh_interval: Option<Duration>,
    /// Refreshes allowed to fetch at the same time across all views.
    pub max_concurrent_refreshes: usize,
    pub timeseries_points: usize,
    /// Length of the trailing result window shown by a view.
    pub window: ChronoDuration,
    /// Views not read for this long are closed. `None` keeps them open.
    pub idle_timeout: Option<Duration>,
}

impl Default for LiveViewConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Some(Duration::from_secs(30)),
            max_concurrent_refreshes: 8,
            timeseries_points: DEFAULT_TIMESERIES_POINTS,
            window: ChronoDuration::hours(24),
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

struct ViewState {
    snapshot: ViewSnapshot,
    in_flight: bool,
    closed: bool,
    last_access: Instant,
}

struct LiveView {
    account_id: String,
    check_id: i64,
    state: Mutex<ViewState>,
    /// Bumped whenever a refresh completes or the view closes.
    done: watch::Sender<u64>,
    stop: broadcast::Sender<()>,
}

impl LiveView {
    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_done(&self) {
        self.done.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// Shared by the coordinator and every refresh loop.
#[derive(Clone)]
struct Refresher {
    source: Arc<dyn ResultSource>,
    limiter: Arc<Semaphore>,
    timeseries_points: usize,
    window: ChronoDuration,
}

impl Refresher {
    /// Refresh a view, or join the refresh already in flight.
    async fn refresh(&self, view: &Arc<LiveView>) -> Result<ViewSnapshot, EngineError> {
        let mut done_rx = {
            let mut state = view.state();
            if state.closed {
                return Err(EngineError::ViewClosed);
            }

            // Subscribe under the lock so the completion cannot be missed.
            let rx = view.done.subscribe();
            if state.in_flight {
                tracing::debug!(
                    "LiveView: joining in-flight refresh of view {}",
                    state.snapshot.view_id
                );
            } else {
                state.in_flight = true;
                state.snapshot.phase = ViewPhase::Loading;
                // Detached, so a caller giving up does not strand the joiners.
                tokio::spawn(self.clone().run(view.clone()));
            }
            rx
        };

        done_rx
            .changed()
            .await
            .map_err(|_| EngineError::ViewClosed)?;

        let state = view.state();
        if state.closed {
            return Err(EngineError::ViewClosed);
        }
        Ok(state.snapshot.clone())
    }

    async fn run(self, view: Arc<LiveView>) {
        let outcome = self.fetch(&view).await;

        {
            let mut state = view.state();
            state.in_flight = false;
            if state.closed {
                tracing::debug!(
                    "LiveView: discarding refresh of closed view {}",
                    state.snapshot.view_id
                );
            } else {
                match &outcome {
                    RefreshOutcome::Degraded { error, .. } => tracing::warn!(
                        "LiveView: results unavailable for check {}: {}",
                        view.check_id,
                        error
                    ),
                    RefreshOutcome::Failed(error) => tracing::warn!(
                        "LiveView: refresh failed for check {}: {}",
                        view.check_id,
                        error
                    ),
                    RefreshOutcome::Ready { .. } => {}
                }
                state.snapshot.apply(outcome, Utc::now());
            }
            // Published together with the snapshot it announces.
            view.notify_done();
        }
    }

    async fn fetch(&self, view: &LiveView) -> RefreshOutcome {
        let _permit = match self.limiter.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                return RefreshOutcome::Failed(EngineError::SourceUnavailable(
                    "refresh limiter closed".to_string(),
                ))
            }
        };

        let window = ResultWindow::trailing(Utc::now(), self.window);
        let (check, results) = tokio::join!(
            self.source.get_check(&view.account_id, view.check_id),
            self.source.get_results(&view.account_id, view.check_id, &window),
        );

        match (check, results) {
            (Err(error), _) => RefreshOutcome::Failed(error),
            (Ok(check), Err(error)) => RefreshOutcome::Degraded { check, error },
            (Ok(check), Ok(results)) => RefreshOutcome::Ready {
                check,
                aggregation: aggregate_all(&results, &window, self.timeseries_points),
            },
        }
    }
}

/// Keeps open dashboard views fresh.
pub struct LiveViewCoordinator {
    refresher: Refresher,
    refresh_interval: Option<Duration>,
    idle_timeout: Option<Duration>,
    views: Arc<RwLock<HashMap<ViewId, Arc<LiveView>>>>,
    next_id: AtomicU64,
    sweep_stop: Mutex<Option<broadcast::Sender<()>>>,
}

impl LiveViewCoordinator {
    pub fn new(source: Arc<dyn ResultSource>, config: LiveViewConfig) -> Self {
        Self {
            refresher: Refresher {
                source,
                limiter: Arc::new(Semaphore::new(config.max_concurrent_refreshes.max(1))),
                timeseries_points: config.timeseries_points,
                window: config.window,
            },
            refresh_interval: config.refresh_interval,
            idle_timeout: config.idle_timeout,
            views: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            sweep_stop: Mutex::new(None),
        }
    }

    /// Start the idle sweep. Does nothing without an idle timeout.
    pub fn start(&self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };

        let (tx, mut rx) = broadcast::channel(1);
        if let Some(previous) = self
            .sweep_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx)
        {
            let _ = previous.send(());
        }

        let views = self.views.clone();
        let period = (timeout / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => close_idle_views(&views, timeout).await,
                }
            }
        });
    }

    /// Open a view of a check and start its refresh loop.
    pub async fn open_view(&self, account_id: &str, check_id: i64) -> ViewId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done, _) = watch::channel(0);
        let (stop, _) = broadcast::channel(1);

        let view = Arc::new(LiveView {
            account_id: account_id.to_string(),
            check_id,
            state: Mutex::new(ViewState {
                snapshot: ViewSnapshot::new(id, check_id),
                in_flight: false,
                closed: false,
                last_access: Instant::now(),
            }),
            done,
            stop,
        });

        self.views.write().await.insert(id, view.clone());
        tracing::info!("LiveView: opened view {} for check {}", id, check_id);

        if let Some(period) = self.refresh_interval {
            let stop_rx = view.stop.subscribe();
            tokio::spawn(run_refresh_loop(self.refresher.clone(), view, period, stop_rx));
        }

        id
    }

    /// Look a view up for its owner and mark it as read.
    async fn view(&self, account_id: &str, id: ViewId) -> Result<Arc<LiveView>, EngineError> {
        let view = self
            .views
            .read()
            .await
            .get(&id)
            .filter(|v| v.account_id == account_id)
            .cloned()
            .ok_or(EngineError::NotFound)?;
        view.state().last_access = Instant::now();
        Ok(view)
    }

    /// Current snapshot without triggering a refresh.
    pub async fn snapshot(&self, account_id: &str, id: ViewId) -> Result<ViewSnapshot, EngineError> {
        let view = self.view(account_id, id).await?;
        let snapshot = view.state().snapshot.clone();
        Ok(snapshot)
    }

    /// Refresh now, or wait for the refresh already in flight.
    pub async fn refresh(&self, account_id: &str, id: ViewId) -> Result<ViewSnapshot, EngineError> {
        let view = self.view(account_id, id).await?;
        self.refresher.refresh(&view).await
    }

    /// Tear a view down. A refresh still in flight is discarded when it lands.
    pub async fn close_view(&self, account_id: &str, id: ViewId) -> Result<(), EngineError> {
        let view = {
            let mut views = self.views.write().await;
            let owned = views.get(&id).is_some_and(|v| v.account_id == account_id);
            if owned {
                views.remove(&id)
            } else {
                None
            }
        }
        .ok_or(EngineError::NotFound)?;

        close(&view);
        tracing::info!("LiveView: closed view {}", id);
        Ok(())
    }

    /// Close every open view and stop the idle sweep.
    pub async fn shutdown(&self) {
        let sweep = self
            .sweep_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sweep {
            let _ = tx.send(());
        }

        let views: Vec<_> = self.views.write().await.drain().map(|(_, v)| v).collect();
        for view in &views {
            close(view);
        }
        tracing::info!("LiveView: closed {} views", views.len());
    }

    pub async fn view_count(&self) -> usize {
        self.views.read().await.len()
    }
}

fn close(view: &LiveView) {
    {
        let mut state = view.state();
        state.closed = true;
        // Wake anyone waiting on an in-flight refresh.
        view.notify_done();
    }
    let _ = view.stop.send(());
}

async fn close_idle_views(views: &RwLock<HashMap<ViewId, Arc<LiveView>>>, timeout: Duration) {
    let idle: Vec<_> = {
        let mut views = views.write().await;
        let expired: Vec<ViewId> = views
            .iter()
            .filter(|(_, v)| v.state().last_access.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| views.remove(&id).map(|v| (id, v)))
            .collect()
    };

    for (id, view) in &idle {
        close(view);
        tracing::info!("LiveView: closed idle view {}", id);
    }
}

async fn run_refresh_loop(
    refresher: Refresher,
    view: Arc<LiveView>,
    period: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let jitter = Duration::from_millis(rand::random::<u64>() % MAX_START_JITTER_MS);
    let mut interval = tokio::time::interval_at(Instant::now() + jitter, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                if let Err(EngineError::ViewClosed) = refresher.refresh(&view).await {
                    break;
                }
            }
        }
    }
}
