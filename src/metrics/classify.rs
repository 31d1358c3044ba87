//! Health classification of individual probe results.

use crate::db::{CheckResult, CheckStatus};

/// Verdict for a single result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: CheckStatus,
    /// The result succeeded and also returned the expected status code.
    /// Informational only; it never changes `status`.
    pub status_confirmed: bool,
}

/// Classify a result. The success flag recorded at capture time is
/// authoritative: transport failures carry no status code and are `Down`.
pub fn classify(result: &CheckResult, expected_status_code: u16) -> Classification {
    let status = if result.success {
        CheckStatus::Up
    } else {
        CheckStatus::Down
    };

    Classification {
        status,
        status_confirmed: result.success && result.status_code == Some(expected_status_code),
    }
}

/// Fold a result onto a check's failure streak, returning the new last
/// status and streak.
pub fn next_state(failure_streak: u32, result: &CheckResult) -> (CheckStatus, u32) {
    if result.success {
        (CheckStatus::Up, 0)
    } else {
        (CheckStatus::Down, failure_streak.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(success: bool, status_code: Option<u16>) -> CheckResult {
        CheckResult {
            id: 1,
            check_id: 1,
            region: "us".to_string(),
            status_code,
            latency_ms: 120.0,
            success,
            error_message: None,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_success_flag_is_authoritative() {
        let up = classify(&result(true, Some(200)), 200);
        assert_eq!(up.status, CheckStatus::Up);
        assert!(up.status_confirmed);

        // Captured as a success even though the code differs.
        let unconfirmed = classify(&result(true, Some(301)), 200);
        assert_eq!(unconfirmed.status, CheckStatus::Up);
        assert!(!unconfirmed.status_confirmed);

        // Matching code does not rescue a failed probe.
        let failed = classify(&result(false, Some(200)), 200);
        assert_eq!(failed.status, CheckStatus::Down);
        assert!(!failed.status_confirmed);
    }

    #[test]
    fn test_transport_failure_is_down() {
        let timeout = classify(&result(false, None), 200);
        assert_eq!(timeout.status, CheckStatus::Down);
    }

    #[test]
    fn test_next_state() {
        assert_eq!(next_state(0, &result(false, None)), (CheckStatus::Down, 1));
        assert_eq!(next_state(4, &result(false, None)), (CheckStatus::Down, 5));
        assert_eq!(next_state(4, &result(true, Some(200))), (CheckStatus::Up, 0));
        assert_eq!(next_state(u32::MAX, &result(false, None)), (CheckStatus::Down, u32::MAX));
    }
}
