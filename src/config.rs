//! Configuration module for Uptrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptrail.db")
    pub db_path: String,
    /// Period of live view refreshes; `None` disables the periodic tick
    pub refresh_interval: Option<Duration>,
    /// Upper bound on refreshes querying the store at once
    pub max_concurrent_refreshes: usize,
    /// Number of time series points per view
    pub timeseries_points: usize,
    /// Live views left unread this long are closed; `None` keeps them
    pub view_idle_timeout: Option<Duration>,
    /// Period of the retention sweep
    pub retention_sweep: Duration,
    /// Base URL of the subscription provider; billing is off when unset
    pub billing_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptrail.db".to_string(),
            refresh_interval: Some(Duration::from_secs(30)),
            max_concurrent_refreshes: 8,
            timeseries_points: 24,
            view_idle_timeout: Some(Duration::from_secs(300)),
            retention_sweep: Duration::from_secs(3600),
            billing_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTRAIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPTRAIL_DB_PATH`: Database file path (default: "uptrail.db")
    /// - `UPTRAIL_REFRESH_INTERVAL_SECS`: Live view refresh period, 0 disables (default: 30)
    /// - `UPTRAIL_MAX_CONCURRENT_REFRESHES`: Concurrent refresh limit (default: 8)
    /// - `UPTRAIL_TIMESERIES_POINTS`: Time series resolution (default: 24)
    /// - `UPTRAIL_VIEW_IDLE_TIMEOUT_SECS`: Unread live view lifetime, 0 disables (default: 300)
    /// - `UPTRAIL_RETENTION_SWEEP_SECS`: Retention sweep period (default: 3600)
    /// - `UPTRAIL_BILLING_URL`: Subscription provider base URL (optional)
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    fn load_from(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = var("UPTRAIL_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = var("UPTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = var("UPTRAIL_REFRESH_INTERVAL_SECS").and_then(|s| s.parse::<u64>().ok()) {
            cfg.refresh_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(n) = var("UPTRAIL_MAX_CONCURRENT_REFRESHES").and_then(|s| s.parse::<usize>().ok()) {
            if n > 0 {
                cfg.max_concurrent_refreshes = n;
            }
        }

        if let Some(n) = var("UPTRAIL_TIMESERIES_POINTS").and_then(|s| s.parse::<usize>().ok()) {
            if n > 0 {
                cfg.timeseries_points = n;
            }
        }

        if let Some(secs) = var("UPTRAIL_VIEW_IDLE_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            cfg.view_idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(secs) = var("UPTRAIL_RETENTION_SWEEP_SECS").and_then(|s| s.parse::<u64>().ok()) {
            if secs > 0 {
                cfg.retention_sweep = Duration::from_secs(secs);
            }
        }

        cfg.billing_url = var("UPTRAIL_BILLING_URL").filter(|s| !s.trim().is_empty());

        cfg
    }
}
