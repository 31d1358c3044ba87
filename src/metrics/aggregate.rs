//! Folding result windows into summary statistics.
//!
//! Everything here is a pure function of its input window: no I/O, no
//! shared state, and identical output for identical input.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tdigests::TDigest;

use crate::db::{CheckResult, RawCheckResult, ResultWindow};

/// Number of points in the chart series by convention.
pub const DEFAULT_TIMESERIES_POINTS: usize = 24;

/// Summary statistics for one check over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckMetrics {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    /// Full precision; rounding is left to the presentation layer.
    pub uptime_percentage: f64,
    /// Mean over every result in the window, failures included.
    pub average_latency: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    /// Malformed stored results left out of the figures above.
    pub excluded_results: u64,
}

/// Per-region slice of a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalMetrics {
    pub region: String,
    pub total_checks: u64,
    pub average_latency: f64,
    pub uptime_percentage: f64,
}

/// One point of the chart series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub time: DateTime<Utc>,
    /// 100 for a successful result, 0 otherwise.
    pub status: u8,
    pub latency_ms: f64,
}

/// Everything a dashboard needs from one window, computed in one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregation {
    pub metrics: CheckMetrics,
    pub regions: Vec<RegionalMetrics>,
    pub timeseries: Vec<TimeSeriesPoint>,
}

#[derive(Default)]
struct Tally {
    total: u64,
    successful: u64,
    latency_sum: f64,
}

impl Tally {
    fn add(&mut self, result: &CheckResult) {
        self.total += 1;
        if result.success {
            self.successful += 1;
        }
        self.latency_sum += result.latency_ms;
    }

    fn uptime_percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64 * 100.0
        }
    }

    fn average_latency(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.latency_sum / self.total as f64
        }
    }
}

/// Validate the results inside `window`, dropping malformed ones.
/// Returns the valid results in input order and the exclusion count.
fn validated(results: &[RawCheckResult], window: &ResultWindow) -> (Vec<CheckResult>, u64) {
    let mut valid = Vec::with_capacity(results.len());
    let mut excluded = 0u64;

    for raw in window.select(results) {
        match CheckResult::try_from(raw) {
            Ok(result) => valid.push(result),
            Err(reason) => {
                excluded += 1;
                tracing::debug!(
                    "Aggregator: excluding result {} of check {}: {:?}",
                    raw.id,
                    raw.check_id,
                    reason
                );
            }
        }
    }

    (valid, excluded)
}

fn summarize(results: &[CheckResult], excluded: u64) -> CheckMetrics {
    let mut tally = Tally::default();
    for r in results {
        tally.add(r);
    }

    let (p50, p95, p99) = if results.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let td = TDigest::from_values(results.iter().map(|r| r.latency_ms).collect());
        (
            sanitize_float(td.estimate_quantile(0.50)),
            sanitize_float(td.estimate_quantile(0.95)),
            sanitize_float(td.estimate_quantile(0.99)),
        )
    };

    CheckMetrics {
        total_checks: tally.total,
        successful_checks: tally.successful,
        failed_checks: tally.total - tally.successful,
        uptime_percentage: tally.uptime_percentage(),
        average_latency: tally.average_latency(),
        p50_latency: p50,
        p95_latency: p95,
        p99_latency: p99,
        excluded_results: excluded,
    }
}

fn by_region(results: &[CheckResult]) -> Vec<RegionalMetrics> {
    let mut groups: BTreeMap<&str, Tally> = BTreeMap::new();
    for r in results {
        groups.entry(r.region.as_str()).or_default().add(r);
    }

    // A group only exists once a result was added to it, so no region is
    // ever emitted with zero checks.
    groups
        .into_iter()
        .map(|(region, tally)| RegionalMetrics {
            region: region.to_string(),
            total_checks: tally.total,
            average_latency: tally.average_latency(),
            uptime_percentage: tally.uptime_percentage(),
        })
        .collect()
}

fn series(results: &[CheckResult], points: usize) -> Vec<TimeSeriesPoint> {
    let skip = results.len().saturating_sub(points);
    results[skip..]
        .iter()
        .map(|r| TimeSeriesPoint {
            time: r.time,
            status: if r.success { 100 } else { 0 },
            latency_ms: r.latency_ms,
        })
        .collect()
}

/// Summary statistics of the results inside `window`.
pub fn aggregate(results: &[RawCheckResult], window: &ResultWindow) -> CheckMetrics {
    let (valid, excluded) = validated(results, window);
    summarize(&valid, excluded)
}

/// Per-region statistics, ordered by region name.
pub fn regional_breakdown(results: &[RawCheckResult], window: &ResultWindow) -> Vec<RegionalMetrics> {
    let (valid, _) = validated(results, window);
    by_region(&valid)
}

/// The most recent `points` results in their original order. Fewer
/// results yield fewer points; gaps are not interpolated.
pub fn time_series(
    results: &[RawCheckResult],
    window: &ResultWindow,
    points: usize,
) -> Vec<TimeSeriesPoint> {
    let (valid, _) = validated(results, window);
    series(&valid, points)
}

/// Metrics, regional breakdown and chart series of one window.
pub fn aggregate_all(results: &[RawCheckResult], window: &ResultWindow, points: usize) -> Aggregation {
    let (valid, excluded) = validated(results, window);
    Aggregation {
        metrics: summarize(&valid, excluded),
        regions: by_region(&valid),
        timeseries: series(&valid, points),
    }
}

fn sanitize_float(f: f64) -> f64 {
    if f.is_nan() || f.is_infinite() {
        0.0
    } else {
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MalformedResult;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn raw(id: i64, region: &str, success: bool, latency: f64) -> RawCheckResult {
        RawCheckResult {
            id,
            check_id: 7,
            region: Some(region.to_string()),
            status_code: if success { Some(200) } else { None },
            latency_ms: Some(latency),
            success: Some(success),
            error_message: None,
            time: t0() + ChronoDuration::minutes(id),
            invalid: None,
        }
    }

    fn all() -> ResultWindow {
        ResultWindow::default()
    }

    #[test]
    fn test_two_region_scenario() {
        let window = vec![raw(1, "us", true, 100.0), raw(2, "eu", false, 300.0)];

        let metrics = aggregate(&window, &all());
        assert_eq!(metrics.total_checks, 2);
        assert_eq!(metrics.successful_checks, 1);
        assert_eq!(metrics.failed_checks, 1);
        assert_eq!(metrics.uptime_percentage, 50.0);
        assert_eq!(metrics.average_latency, 200.0);

        let regions = regional_breakdown(&window, &all());
        assert_eq!(
            regions,
            vec![
                RegionalMetrics {
                    region: "eu".to_string(),
                    total_checks: 1,
                    average_latency: 300.0,
                    uptime_percentage: 0.0,
                },
                RegionalMetrics {
                    region: "us".to_string(),
                    total_checks: 1,
                    average_latency: 100.0,
                    uptime_percentage: 100.0,
                },
            ]
        );
    }

    #[test]
    fn test_empty_window() {
        let metrics = aggregate(&[], &all());
        assert_eq!(metrics, CheckMetrics::default());
        assert_eq!(metrics.uptime_percentage, 0.0);
        assert_eq!(metrics.average_latency, 0.0);
        assert!(regional_breakdown(&[], &all()).is_empty());
        assert!(time_series(&[], &all(), DEFAULT_TIMESERIES_POINTS).is_empty());
    }

    #[test]
    fn test_counts_and_bounds() {
        let window: Vec<_> = (0..37)
            .map(|i| {
                let region = ["us", "eu", "ap"][i as usize % 3];
                raw(i, region, i % 4 != 0, 50.0 + i as f64)
            })
            .collect();

        let metrics = aggregate(&window, &all());
        assert_eq!(metrics.successful_checks + metrics.failed_checks, metrics.total_checks);
        assert!((0.0..=100.0).contains(&metrics.uptime_percentage));
        assert!(metrics.p50_latency >= 50.0 && metrics.p50_latency <= 86.0);

        let regions = regional_breakdown(&window, &all());
        assert!(regions.iter().all(|r| r.total_checks > 0));
        let regional_total: u64 = regions.iter().map(|r| r.total_checks).sum();
        assert_eq!(regional_total, metrics.total_checks);
    }

    #[test]
    fn test_idempotent_and_order_independent_counts() {
        let window = vec![
            raw(1, "us", true, 10.0),
            raw(2, "us", false, 20.0),
            raw(3, "eu", true, 30.0),
        ];
        assert_eq!(aggregate(&window, &all()), aggregate(&window, &all()));

        let mut reversed = window.clone();
        reversed.reverse();
        let a = aggregate(&window, &all());
        let b = aggregate(&reversed, &all());
        assert_eq!(a.successful_checks, b.successful_checks);
        assert_eq!(a.failed_checks, b.failed_checks);
        assert_eq!(a.uptime_percentage, b.uptime_percentage);
    }

    #[test]
    fn test_uptime_keeps_full_precision() {
        let window = vec![
            raw(1, "us", true, 1.0),
            raw(2, "us", true, 1.0),
            raw(3, "us", false, 1.0),
        ];
        let metrics = aggregate(&window, &all());
        assert_eq!(metrics.uptime_percentage, 2.0 / 3.0 * 100.0);
    }

    #[test]
    fn test_malformed_results_are_skipped() {
        let mut missing_latency = raw(2, "us", true, 0.0);
        missing_latency.latency_ms = None;
        let mut missing_region = raw(3, "eu", true, 10.0);
        missing_region.region = None;

        let window = vec![raw(1, "us", false, 40.0), missing_latency, missing_region];
        let metrics = aggregate(&window, &all());
        assert_eq!(metrics.total_checks, 1);
        assert_eq!(metrics.excluded_results, 2);
        assert_eq!(metrics.average_latency, 40.0);
        assert_eq!(regional_breakdown(&window, &all()).len(), 1);
    }

    #[test]
    fn test_unreadable_results_are_counted_not_aggregated() {
        let mut infinite = raw(2, "us", true, 0.0);
        infinite.latency_ms = Some(f64::INFINITY);
        let mut bad_status = raw(3, "us", true, 10.0);
        bad_status.invalid = Some(MalformedResult::InvalidStatusCode);
        let mut bad_time = raw(4, "eu", true, 10.0);
        bad_time.time = DateTime::<Utc>::MIN_UTC;
        bad_time.invalid = Some(MalformedResult::InvalidTime);

        let window = vec![raw(1, "us", true, 20.0), infinite, bad_status, bad_time];
        let bounds = ResultWindow::trailing(t0() + ChronoDuration::hours(1), ChronoDuration::hours(2));
        let metrics = aggregate(&window, &bounds);
        assert_eq!(metrics.total_checks, 1);
        assert_eq!(metrics.excluded_results, 3);
        assert_eq!(metrics.average_latency, 20.0);
        assert!(metrics.p99_latency.is_finite());
    }

    #[test]
    fn test_window_bounds_are_applied() {
        let window = vec![raw(1, "us", true, 10.0), raw(2, "us", false, 20.0), raw(3, "us", true, 30.0)];
        let bounds = ResultWindow {
            start: Some(t0() + ChronoDuration::minutes(2)),
            end: None,
            limit: None,
        };
        let metrics = aggregate(&window, &bounds);
        assert_eq!(metrics.total_checks, 2);
        assert_eq!(metrics.average_latency, 25.0);
    }

    #[test]
    fn test_time_series_keeps_latest_in_order() {
        let window: Vec<_> = (0..30).map(|i| raw(i, "us", i % 2 == 0, i as f64)).collect();

        let points = time_series(&window, &all(), DEFAULT_TIMESERIES_POINTS);
        assert_eq!(points.len(), 24);
        assert_eq!(points[0].latency_ms, 6.0);
        assert_eq!(points[23].latency_ms, 29.0);
        assert_eq!(points[0].status, 100);
        assert_eq!(points[23].status, 0);
        assert!(points.windows(2).all(|w| w[0].time < w[1].time));

        let short = time_series(&window[..5], &all(), DEFAULT_TIMESERIES_POINTS);
        assert_eq!(short.len(), 5);
    }

    #[test]
    fn test_aggregate_all_matches_parts() {
        let window = vec![raw(1, "us", true, 100.0), raw(2, "eu", false, 300.0)];
        let agg = aggregate_all(&window, &all(), 24);
        assert_eq!(agg.metrics, aggregate(&window, &all()));
        assert_eq!(agg.regions, regional_breakdown(&window, &all()));
        assert_eq!(agg.timeseries, time_series(&window, &all(), 24));
    }
}
