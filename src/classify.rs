//! Result classification policy: decides per-result pass/fail under the
//! `failOnCriticalErrors` / `failOnTimeout` flags, and aggregates a run
//! [`Summary`].
//!
//! Per-result verdicts are partially observed (`passed?`, `error?`,
//! `errorCode?`, `unhealthy?`). Rather than a chain of `is_some()` checks,
//! this module classifies each [`PollResult`] into an [`Outcome`] sum type
//! and dispatches on that (`SPEC_FULL.md` §9).

use crate::model::{PollResult, ResultError};

/// A classified per-result outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Timeout,
    Unhealthy,
    Endpoint,
    Tunnel,
    /// No explicit verdict was ever reported (`passed`, `errorCode` both
    /// absent, no synthesised error).
    Unknown,
}

fn classify(result: &PollResult) -> Outcome {
    let r = &result.result;
    if r.unhealthy == Some(true) {
        return Outcome::Unhealthy;
    }
    match r.error {
        Some(ResultError::Endpoint) => return Outcome::Endpoint,
        Some(ResultError::Timeout) => return Outcome::Timeout,
        Some(ResultError::Tunnel) => return Outcome::Tunnel,
        None => {}
    }
    if let Some(passed) = r.passed {
        return if passed { Outcome::Passed } else { Outcome::Failed };
    }
    if r.error_code.is_some() {
        return Outcome::Failed;
    }
    Outcome::Unknown
}

/// Decides whether a single poll result counts as passing, under the
/// active policy flags (`spec.md` §4.5).
///
/// Monotone in both flags: flipping either from `true` to `false` can only
/// convert a `false` verdict to `true`, never the reverse.
pub fn has_result_passed(
    result: &PollResult,
    fail_on_critical_errors: bool,
    fail_on_timeout: bool,
) -> bool {
    match classify(result) {
        Outcome::Unhealthy | Outcome::Endpoint => !fail_on_critical_errors,
        Outcome::Timeout => !fail_on_timeout,
        Outcome::Tunnel => false,
        Outcome::Passed => true,
        Outcome::Failed => false,
        Outcome::Unknown => true,
    }
}

/// A test's overall verdict is the conjunction over all its poll results.
pub fn has_all_results_passed(
    results: &[PollResult],
    fail_on_critical_errors: bool,
    fail_on_timeout: bool,
) -> bool {
    results
        .iter()
        .all(|r| has_result_passed(r, fail_on_critical_errors, fail_on_timeout))
}

/// Duration of a poll result in milliseconds, rounded: `duration` if
/// present, else `timings.total`, else `0`.
pub fn get_result_duration(result: &PollResult) -> i64 {
    if let Some(duration) = result.result.duration {
        return duration.round() as i64;
    }
    if let Some(total) = result.result.timings.as_ref().and_then(|t| t.total) {
        return total.round() as i64;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Device, ResultPayload};

    fn result_with(
        passed: Option<bool>,
        error: Option<ResultError>,
        error_code: Option<&str>,
        unhealthy: Option<bool>,
    ) -> PollResult {
        PollResult {
            result_id: "r1".into(),
            dc_id: None,
            timestamp: 0,
            result: ResultPayload {
                passed,
                error,
                error_code: error_code.map(|s| s.to_string()),
                unhealthy,
                event_type: "finished".into(),
                duration: Some(1234.4),
                timings: None,
                tunnel: false,
                step_details: Vec::new(),
                device: Device::default(),
                start_url: String::new(),
            },
        }
    }

    #[test]
    fn endpoint_error_passes_when_not_failing_critical_errors() {
        let r = result_with(None, Some(ResultError::Endpoint), None, None);
        assert!(has_result_passed(&r, false, true));
        assert!(!has_result_passed(&r, true, true));
    }

    #[test]
    fn timeout_passes_when_not_failing_on_timeout() {
        let r = result_with(Some(false), Some(ResultError::Timeout), None, None);
        assert!(has_result_passed(&r, true, false));
        assert!(!has_result_passed(&r, true, true));
    }

    #[test]
    fn explicit_passed_flag_wins_when_no_synthesised_error() {
        let r = result_with(Some(false), None, None, None);
        assert!(!has_result_passed(&r, true, true));
        let r = result_with(Some(true), None, None, None);
        assert!(has_result_passed(&r, true, true));
    }

    #[test]
    fn error_code_without_passed_flag_fails() {
        let r = result_with(None, None, Some("ASSERT"), None);
        assert!(!has_result_passed(&r, true, true));
    }

    #[test]
    fn no_verdict_at_all_is_treated_as_passing() {
        let r = result_with(None, None, None, None);
        assert!(has_result_passed(&r, true, true));
    }

    #[test]
    fn unhealthy_is_gated_by_fail_on_critical_errors() {
        let r = result_with(None, None, None, Some(true));
        assert!(has_result_passed(&r, false, true));
        assert!(!has_result_passed(&r, true, true));
    }

    #[test]
    fn classifier_is_monotone_in_policy_flags() {
        // Flipping a flag true->false can only turn a fail into a pass.
        for (err, code, unhealthy) in [
            (Some(ResultError::Endpoint), None, None),
            (Some(ResultError::Timeout), None, None),
            (Some(ResultError::Tunnel), None, None),
            (None, Some("ASSERT"), None),
            (None, None, Some(true)),
        ] {
            let r = result_with(Some(false), err, code, unhealthy);
            let strict = has_result_passed(&r, true, true);
            let lenient = has_result_passed(&r, false, false);
            assert!(lenient || !strict, "monotonicity violated for {:?}", r.result.error);
        }
    }

    #[test]
    fn tunnel_error_always_fails_regardless_of_policy_flags() {
        let r = result_with(Some(false), Some(ResultError::Tunnel), None, None);
        assert!(!has_result_passed(&r, false, false));
        assert!(!has_result_passed(&r, true, true));
    }

    #[test]
    fn duration_prefers_flat_duration_over_timings() {
        let r = result_with(Some(true), None, None, None);
        assert_eq!(get_result_duration(&r), 1234);
    }

    #[test]
    fn duration_falls_back_to_timings_total() {
        let mut r = result_with(Some(true), None, None, None);
        r.result.duration = None;
        r.result.timings = Some(crate::model::Timings { total: Some(42.6) });
        assert_eq!(get_result_duration(&r), 43);
    }

    #[test]
    fn duration_defaults_to_zero() {
        let mut r = result_with(Some(true), None, None, None);
        r.result.duration = None;
        r.result.timings = None;
        assert_eq!(get_result_duration(&r), 0);
    }
}
