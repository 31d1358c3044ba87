//! Uptrail - uptime check metrics and quota engine.
//!
//! Turns multi-region probe results into check status, uptime and latency
//! figures, gates check changes on the owner's plan and keeps dashboard
//! views refreshed.

pub mod checks;
pub mod config;
pub mod db;
pub mod error;
pub mod live;
pub mod metrics;
pub mod quota;
pub mod scheduler;
pub mod web;
