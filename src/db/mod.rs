//! Database module for Uptrail.
//!
//! Provides SQLite storage for checks, probe results and plan profiles.

mod models;
mod store;

pub use models::*;
pub use store::*;
