//! Metrics module: result classification, window aggregation and the
//! result source adapter.

mod aggregate;
mod classify;
mod service;
mod source;

pub use aggregate::*;
pub use classify::*;
pub use service::*;
pub use source::*;
