//! Plan gates.
//!
//! Pure predicates over a usage snapshot. They never fetch or mutate
//! usage; callers on creation/update paths must pass a fresh snapshot.

use crate::db::PlanUsage;
use crate::error::EngineError;

/// True while the account is below its check limit.
pub fn can_create_check(usage: &PlanUsage) -> bool {
    usage.checks.current < usage.checks.limit
}

/// True when `requested_minutes` meets the plan floor (inclusive).
pub fn is_interval_allowed(usage: &PlanUsage, requested_minutes: u32) -> bool {
    requested_minutes >= usage.min_interval.minutes
}

pub fn ensure_can_create(usage: &PlanUsage) -> Result<(), EngineError> {
    if can_create_check(usage) {
        Ok(())
    } else {
        Err(EngineError::QuotaExceeded {
            current: usage.checks.current,
            limit: usage.checks.limit,
        })
    }
}

/// Reject intervals below the plan floor. Values are never clamped up.
pub fn ensure_interval_allowed(usage: &PlanUsage, requested_minutes: u32) -> Result<(), EngineError> {
    if is_interval_allowed(usage, requested_minutes) {
        Ok(())
    } else {
        Err(EngineError::InvalidInterval {
            requested: requested_minutes,
            minimum: usage.min_interval.minutes,
        })
    }
}
