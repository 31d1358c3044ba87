//! Database model types.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Polling interval of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CheckInterval {
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl CheckInterval {
    pub const ALL: [CheckInterval; 6] = [
        CheckInterval::OneMinute,
        CheckInterval::FiveMinutes,
        CheckInterval::FifteenMinutes,
        CheckInterval::ThirtyMinutes,
        CheckInterval::OneHour,
        CheckInterval::OneDay,
    ];

    pub fn minutes(self) -> u32 {
        match self {
            CheckInterval::OneMinute => 1,
            CheckInterval::FiveMinutes => 5,
            CheckInterval::FifteenMinutes => 15,
            CheckInterval::ThirtyMinutes => 30,
            CheckInterval::OneHour => 60,
            CheckInterval::OneDay => 1440,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckInterval::OneMinute => "1min",
            CheckInterval::FiveMinutes => "5min",
            CheckInterval::FifteenMinutes => "15min",
            CheckInterval::ThirtyMinutes => "30min",
            CheckInterval::OneHour => "1h",
            CheckInterval::OneDay => "1d",
        }
    }
}

impl fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("unknown interval: {}", s))
    }
}

/// Whether a check is being polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    #[default]
    Active,
    Paused,
}

impl LifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Active => "active",
            LifecycleStatus::Paused => "paused",
        }
    }
}

impl FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LifecycleStatus::Active),
            "paused" => Ok(LifecycleStatus::Paused),
            other => Err(format!("unknown lifecycle status: {}", other)),
        }
    }
}

/// Derived health of a check or a single result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
        }
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(CheckStatus::Up),
            "down" => Ok(CheckStatus::Down),
            other => Err(format!("unknown check status: {}", other)),
        }
    }
}

/// A monitored target and its polling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub id: i64,
    pub account_id: String,
    pub url: String,
    pub name: Option<String>,
    pub interval: CheckInterval,
    pub regions: Vec<String>,
    pub timeout_secs: u32,
    pub expected_status_code: u16,
    pub status: LifecycleStatus,
    /// `None` until the first result has been ingested.
    pub last_status: Option<CheckStatus>,
    pub failure_streak: u32,
    /// Time of the newest result reflected in `last_status`.
    pub last_result_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Default for Check {
    fn default() -> Self {
        Self {
            id: 0,
            account_id: String::new(),
            url: String::new(),
            name: None,
            interval: CheckInterval::FifteenMinutes,
            regions: vec!["us".to_string()],
            timeout_secs: 30,
            expected_status_code: 200,
            status: LifecycleStatus::Active,
            last_status: None,
            failure_streak: 0,
            last_result_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Validate the user-editable parts of a check definition.
pub fn validate_check(check: &Check) -> Result<(), String> {
    if check.url.trim().is_empty() {
        return Err("url cannot be empty".to_string());
    }
    if check.regions.is_empty() {
        return Err("at least one region is required".to_string());
    }
    if check.regions.iter().any(|r| r.trim().is_empty()) {
        return Err("region names cannot be empty".to_string());
    }
    if !(100..=599).contains(&check.expected_status_code) {
        return Err(format!(
            "expected status code {} is not a valid HTTP status",
            check.expected_status_code
        ));
    }
    if check.timeout_secs == 0 {
        return Err("timeout must be positive".to_string());
    }
    Ok(())
}

/// A probe result as stored. The external prober owns these rows, so any
/// of the measured fields may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCheckResult {
    pub id: i64,
    pub check_id: i64,
    pub region: Option<String>,
    pub status_code: Option<u16>,
    pub latency_ms: Option<f64>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub time: DateTime<Utc>,
    /// Set by the store when a column held a value of the wrong type or
    /// range. Such rows are counted but never aggregated.
    #[serde(skip)]
    pub invalid: Option<MalformedResult>,
}

/// Why a stored result was left out of aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedResult {
    MissingRegion,
    MissingLatency,
    NegativeLatency,
    /// Infinite, NaN or not a number at all.
    InvalidLatency,
    InvalidStatusCode,
    MissingSuccess,
    InvalidSuccess,
    InvalidTime,
}

/// A validated probe result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: i64,
    pub check_id: i64,
    pub region: String,
    /// Absent for transport-level failures (timeouts, DNS errors).
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub time: DateTime<Utc>,
}

impl TryFrom<&RawCheckResult> for CheckResult {
    type Error = MalformedResult;

    fn try_from(raw: &RawCheckResult) -> Result<Self, Self::Error> {
        if let Some(reason) = raw.invalid {
            return Err(reason);
        }
        let region = match raw.region.as_deref() {
            Some(r) if !r.trim().is_empty() => r.to_string(),
            _ => return Err(MalformedResult::MissingRegion),
        };
        let latency_ms = match raw.latency_ms {
            Some(l) if !l.is_finite() => return Err(MalformedResult::InvalidLatency),
            Some(l) if l < 0.0 => return Err(MalformedResult::NegativeLatency),
            Some(l) => l,
            None => return Err(MalformedResult::MissingLatency),
        };
        let success = raw.success.ok_or(MalformedResult::MissingSuccess)?;

        Ok(CheckResult {
            id: raw.id,
            check_id: raw.check_id,
            region,
            status_code: raw.status_code,
            latency_ms,
            success,
            error_message: raw.error_message.clone(),
            time: raw.time,
        })
    }
}

/// A probe result submitted for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckResult {
    pub check_id: i64,
    pub region: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl NewCheckResult {
    pub fn validate(&self) -> Result<(), String> {
        if self.region.trim().is_empty() {
            return Err("region cannot be empty".to_string());
        }
        if !self.latency_ms.is_finite() || self.latency_ms < 0.0 {
            return Err(format!("invalid latency: {}", self.latency_ms));
        }
        Ok(())
    }

    /// View as a stored result. The sequence id is not assigned yet and
    /// reads as 0.
    pub fn as_check_result(&self) -> CheckResult {
        CheckResult {
            id: 0,
            check_id: self.check_id,
            region: self.region.clone(),
            status_code: self.status_code,
            latency_ms: self.latency_ms,
            success: self.success,
            error_message: self.error_message.clone(),
            time: self.time,
        }
    }
}

/// Bounds of a result window: `[start, end)` plus an optional cap that keeps
/// only the most recent results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ResultWindow {
    /// The trailing `duration` ending at `end`.
    pub fn trailing(end: DateTime<Utc>, duration: ChronoDuration) -> Self {
        Self {
            start: Some(end - duration),
            end: Some(end),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| time >= s) && self.end.map_or(true, |e| time < e)
    }

    /// Select the results falling inside this window, in input order.
    pub fn select<'a>(&self, results: &'a [RawCheckResult]) -> Vec<&'a RawCheckResult> {
        // A row with an unreadable time was placed in the window by the
        // store query; keep it so it is counted as excluded.
        let mut selected: Vec<&RawCheckResult> = results
            .iter()
            .filter(|r| r.invalid == Some(MalformedResult::InvalidTime) || self.contains(r.time))
            .collect();
        if let Some(limit) = self.limit {
            if selected.len() > limit {
                selected.drain(..selected.len() - limit);
            }
        }
        selected
    }
}

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Starter,
    Pro,
}

/// Entitlements that come with a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_checks: u32,
    pub min_interval_minutes: u32,
    pub retention_days: u32,
}

impl PlanTier {
    pub fn limits(self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                max_checks: 5,
                min_interval_minutes: 15,
                retention_days: 7,
            },
            PlanTier::Starter => PlanLimits {
                max_checks: 25,
                min_interval_minutes: 5,
                retention_days: 30,
            },
            PlanTier::Pro => PlanLimits {
                max_checks: 100,
                min_interval_minutes: 1,
                retention_days: 90,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Pro => "pro",
        }
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "starter" => Ok(PlanTier::Starter),
            "pro" => Ok(PlanTier::Pro),
            other => Err(format!("unknown plan: {}", other)),
        }
    }
}

/// A value read from a source that may omit it, recording whether the
/// default was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "value", rename_all = "lowercase")]
pub enum Field<T> {
    Present(T),
    Defaulted(T),
}

impl<T: Copy> Field<T> {
    pub fn from_option(value: Option<T>, default: T) -> Self {
        match value {
            Some(v) => Field::Present(v),
            None => Field::Defaulted(default),
        }
    }

    pub fn value(&self) -> T {
        match self {
            Field::Present(v) | Field::Defaulted(v) => *v,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Field::Present(_))
    }
}

/// A subscriber's plan profile. Overrides absent from storage fall back to
/// the tier defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub account_id: String,
    pub plan: Field<PlanTier>,
    pub max_checks: Field<u32>,
    pub min_interval_minutes: Field<u32>,
    pub retention_days: Field<u32>,
}

impl Profile {
    /// Build a profile from optionally-present stored columns.
    pub fn from_parts(
        account_id: &str,
        plan: Option<PlanTier>,
        max_checks: Option<u32>,
        min_interval_minutes: Option<u32>,
        retention_days: Option<u32>,
    ) -> Self {
        let plan = Field::from_option(plan, PlanTier::Free);
        let limits = plan.value().limits();
        Self {
            account_id: account_id.to_string(),
            plan,
            max_checks: Field::from_option(max_checks, limits.max_checks),
            min_interval_minutes: Field::from_option(
                min_interval_minutes,
                limits.min_interval_minutes,
            ),
            retention_days: Field::from_option(retention_days, limits.retention_days),
        }
    }

    /// Combine the profile with a live check count.
    pub fn usage(&self, current_checks: u32) -> PlanUsage {
        PlanUsage {
            plan: self.plan.value(),
            checks: CheckAllowance {
                current: current_checks,
                limit: self.max_checks.value(),
            },
            min_interval: MinInterval {
                minutes: self.min_interval_minutes.value(),
            },
            retention_days: self.retention_days.value(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAllowance {
    pub current: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinInterval {
    pub minutes: u32,
}

/// Point-in-time snapshot of a subscriber's plan usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUsage {
    pub plan: PlanTier,
    pub checks: CheckAllowance,
    pub min_interval: MinInterval,
    pub retention_days: u32,
}
