//! HTTP request handlers.

use super::AppState;
use crate::checks::CheckDraft;
use crate::db::{Check, NewCheckResult, PlanTier, PlanUsage, ResultWindow};
use crate::error::EngineError;
use crate::live::{ViewId, ViewSnapshot};
use crate::metrics::{CheckMetrics, RegionalMetrics, TimeSeriesPoint};

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the account id set by the upstream identity provider.
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// Length of the window used when a request names no bounds.
const DEFAULT_WINDOW_HOURS: i64 = 24;

// ============================================================================
// Account extraction
// ============================================================================

/// The authenticated account making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for AccountId {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| AccountId(v.to_string()))
            .ok_or((StatusCode::UNAUTHORIZED, "Missing account id"))
    }
}

// ============================================================================
// Windows
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl WindowQuery {
    /// Resolve the query against `now`. A missing start means the trailing
    /// day before `end`; a missing end leaves the window open.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<ResultWindow, EngineError> {
        let window = match (self.start, self.end) {
            (None, None) => ResultWindow::trailing(now, ChronoDuration::hours(DEFAULT_WINDOW_HOURS)),
            (None, Some(end)) => ResultWindow::trailing(end, ChronoDuration::hours(DEFAULT_WINDOW_HOURS)),
            (Some(start), end) => {
                if end.is_some_and(|e| e <= start) {
                    return Err(EngineError::InvalidRequest(
                        "window end must be after its start".to_string(),
                    ));
                }
                ResultWindow {
                    start: Some(start),
                    end,
                    limit: None,
                }
            }
        };

        Ok(match self.limit {
            Some(limit) => window.with_limit(limit),
            None => window,
        })
    }
}

// ============================================================================
// API: Checks
// ============================================================================

pub async fn handle_list_checks(
    State(state): State<AppState>,
    AccountId(account): AccountId,
) -> Result<Json<Vec<Check>>, EngineError> {
    Ok(Json(state.checks.list(&account).await?))
}

pub async fn handle_get_check(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<i64>,
) -> Result<Json<Check>, EngineError> {
    Ok(Json(state.checks.get(&account, id).await?))
}

pub async fn handle_create_check(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Json(draft): Json<CheckDraft>,
) -> Result<impl IntoResponse, EngineError> {
    let check = state.checks.create(&account, draft).await?;
    Ok((StatusCode::CREATED, Json(check)))
}

pub async fn handle_update_check(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<i64>,
    Json(draft): Json<CheckDraft>,
) -> Result<Json<Check>, EngineError> {
    Ok(Json(state.checks.update(&account, id, draft).await?))
}

pub async fn handle_delete_check(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<i64>,
) -> Result<StatusCode, EngineError> {
    state.checks.delete(&account, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// API: Metrics
// ============================================================================

pub async fn handle_check_metrics(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<CheckMetrics>, EngineError> {
    let window = query.resolve(Utc::now())?;
    Ok(Json(state.metrics.get_check_metrics(&account, id, &window).await?))
}

pub async fn handle_regional_breakdown(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<RegionalMetrics>>, EngineError> {
    let window = query.resolve(Utc::now())?;
    Ok(Json(
        state.metrics.get_regional_breakdown(&account, id, &window).await?,
    ))
}

pub async fn handle_time_series(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<TimeSeriesPoint>>, EngineError> {
    let window = query.resolve(Utc::now())?;
    Ok(Json(state.metrics.get_time_series(&account, id, &window).await?))
}

// ============================================================================
// API: Ingestion
// ============================================================================

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

/// Accept a batch of probe results. Results are written asynchronously.
pub async fn handle_ingest_results(
    State(state): State<AppState>,
    Json(results): Json<Vec<NewCheckResult>>,
) -> Result<impl IntoResponse, EngineError> {
    let accepted = state.scheduler.submit(results).await?;
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted })))
}

// ============================================================================
// API: Quota
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AllowedResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct IntervalQuery {
    pub minutes: u32,
}

pub async fn handle_usage(
    State(state): State<AppState>,
    AccountId(account): AccountId,
) -> Result<Json<PlanUsage>, EngineError> {
    Ok(Json(state.quota.usage(&account).await?))
}

pub async fn handle_can_create(
    State(state): State<AppState>,
    AccountId(account): AccountId,
) -> Result<Json<AllowedResponse>, EngineError> {
    let allowed = state.quota.can_create_check(&account).await?;
    Ok(Json(AllowedResponse { allowed }))
}

pub async fn handle_interval_allowed(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Query(query): Query<IntervalQuery>,
) -> Result<Json<AllowedResponse>, EngineError> {
    let allowed = state.quota.is_interval_allowed(&account, query.minutes).await?;
    Ok(Json(AllowedResponse { allowed }))
}

// ============================================================================
// API: Live views
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenViewRequest {
    pub check_id: i64,
}

#[derive(Debug, Serialize)]
pub struct OpenViewResponse {
    pub view_id: ViewId,
    pub snapshot: ViewSnapshot,
}

pub async fn handle_open_view(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Json(req): Json<OpenViewRequest>,
) -> Result<impl IntoResponse, EngineError> {
    // Reject checks outside the account before any refresh is scheduled.
    state.checks.get(&account, req.check_id).await?;

    let view_id = state.live.open_view(&account, req.check_id).await;
    let snapshot = state.live.snapshot(&account, view_id).await?;
    Ok((StatusCode::CREATED, Json(OpenViewResponse { view_id, snapshot })))
}

pub async fn handle_view_snapshot(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<ViewId>,
) -> Result<Json<ViewSnapshot>, EngineError> {
    Ok(Json(state.live.snapshot(&account, id).await?))
}

pub async fn handle_refresh_view(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<ViewId>,
) -> Result<Json<ViewSnapshot>, EngineError> {
    Ok(Json(state.live.refresh(&account, id).await?))
}

pub async fn handle_close_view(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Path(id): Path<ViewId>,
) -> Result<StatusCode, EngineError> {
    state.live.close_view(&account, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// API: Billing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    pub plan: PlanTier,
}

#[derive(Debug, Serialize)]
pub struct UpgradeResponse {
    pub checkout_url: String,
}

pub async fn handle_upgrade(
    State(state): State<AppState>,
    AccountId(account): AccountId,
    Json(req): Json<UpgradeRequest>,
) -> Result<Json<UpgradeResponse>, EngineError> {
    let billing = state.billing.as_ref().ok_or(EngineError::NotFound)?;
    if req.plan == PlanTier::Free {
        return Err(EngineError::InvalidRequest(
            "cannot upgrade to the free plan".to_string(),
        ));
    }

    let checkout_url = billing.create_upgrade_preference(&account, req.plan).await?;
    tracing::info!("Billing: {} started upgrade to {}", account, req.plan.as_str());
    Ok(Json(UpgradeResponse { checkout_url }))
}

/// Cancel the subscription and fall back to the free tier's limits.
pub async fn handle_cancel(
    State(state): State<AppState>,
    AccountId(account): AccountId,
) -> Result<Json<PlanUsage>, EngineError> {
    let billing = state.billing.as_ref().ok_or(EngineError::NotFound)?;
    billing.cancel_subscription(&account).await?;

    let store = state.store.clone();
    let owner = account.clone();
    tokio::task::spawn_blocking(move || store.set_plan(&owner, PlanTier::Free))
        .await
        .map_err(|e| EngineError::SourceUnavailable(e.to_string()))??;

    tracing::info!("Billing: {} cancelled subscription", account);
    Ok(Json(state.quota.usage(&account).await?))
}
