//! Bounded-attempt retry with quadratic backoff (`attempt^2` seconds),
//! shared by the Orchestrator REST facade and the Scheduler-CLI adapter.
//!
//! Node creation is deliberately never routed through these helpers: it is
//! not idempotent, so a retried create could double-provision capacity.

use std::thread::sleep;
use std::time::Duration;

use crate::error::CcSlurmError;

pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Retries `f` up to `attempts` times (minimum 1), sleeping `attempt^2`
/// seconds between failures, and wraps the last error as `OrchestratorFailure`.
pub fn retry_rest<T, E, F>(mut f: F, attempts: u32) -> Result<T, CcSlurmError>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut last_err: Option<String> = None;
    for attempt in 1..=attempts {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let msg = e.to_string();
                tracing::debug!(attempt, error = %msg, "orchestrator call failed");
                last_err = Some(msg);
                if attempt < attempts {
                    sleep(Duration::from_secs((attempt * attempt) as u64));
                }
            }
        }
    }
    Err(CcSlurmError::OrchestratorFailure(
        last_err.unwrap_or_else(|| "unknown error".to_string()),
    ))
}

/// Same backoff schedule as [`retry_rest`] but wraps failures as
/// `CommandFailure`, and logs a warning (not just debug) on each retry —
/// matching the original's louder treatment of subprocess flakiness.
pub fn retry_subprocess<T, E, F>(mut f: F, attempts: u32) -> Result<T, CcSlurmError>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut last_err: Option<String> = None;
    for attempt in 1..=attempts {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let msg = e.to_string();
                tracing::warn!(attempt, error = %msg, "command failed, retrying");
                last_err = Some(msg);
                if attempt < attempts {
                    sleep(Duration::from_secs((attempt * attempt) as u64));
                }
            }
        }
    }
    Err(CcSlurmError::CommandFailure(
        last_err.unwrap_or_else(|| "unknown error".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retry_rest_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result: Result<i32, CcSlurmError> = retry_rest(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            },
            5,
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_rest_exhausts_attempts_and_wraps_error() {
        let calls = Cell::new(0);
        let result: Result<i32, CcSlurmError> = retry_rest(
            || {
                calls.set(calls.get() + 1);
                Err::<i32, _>("always fails".to_string())
            },
            2,
        );
        assert_eq!(calls.get(), 2);
        assert!(matches!(result, Err(CcSlurmError::OrchestratorFailure(_))));
    }

    #[test]
    fn retry_subprocess_wraps_as_command_failure() {
        let result: Result<i32, CcSlurmError> =
            retry_subprocess(|| Err::<i32, _>("boom".to_string()), 1);
        assert!(matches!(result, Err(CcSlurmError::CommandFailure(_))));
    }
}
