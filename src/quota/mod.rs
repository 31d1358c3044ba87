//! Quota module: plan gates, usage lookup and the subscription provider.

mod billing;
mod enforcer;
mod service;

pub use billing::*;
pub use enforcer::*;
pub use service::*;
