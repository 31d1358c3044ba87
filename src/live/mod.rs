//! Live dashboard views with periodic, coalesced refreshes.

mod coordinator;
mod view;

pub use coordinator::*;
pub use view::{ViewError, ViewId, ViewPhase, ViewSnapshot};
