//! Deterministic classification of entry-point executions.

use crate::core::types::{Evaluation, RunTest};

/// Error text used when the entry point is missing or blank.
pub const NO_CODE_FOUND: &str = "no code found";

/// Classify a finished (not timed out) execution.
///
/// - Non-zero exit: `objective_not_met_error` with stderr as the error. A blank
///   stderr is replaced by a description of the exit status so the error is
///   never empty.
/// - Clean exit: trimmed stdout is compared to the trimmed expected result by
///   exact string equality.
pub fn classify_output(
    success: bool,
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
    expected: &str,
) -> Evaluation {
    if !success {
        let error = if stderr.trim().is_empty() {
            match exit_code {
                Some(code) => format!("entry point exited with status {code}"),
                None => "entry point terminated by signal".to_string(),
            }
        } else {
            stderr.to_string()
        };
        return Evaluation {
            test: RunTest::ObjectiveNotMetError,
            result: None,
            error: Some(error),
        };
    }

    let actual = stdout.trim();
    let test = if actual == expected.trim() {
        RunTest::ObjectiveMet
    } else {
        RunTest::ObjectiveNotMet
    };
    Evaluation {
        test,
        result: Some(actual.to_string()),
        error: None,
    }
}

/// Outcome when there is no entry point to run.
pub fn no_code() -> Evaluation {
    fault(NO_CODE_FOUND)
}

/// Outcome when the entry point exceeded its time budget.
pub fn timed_out(timeout_secs: u64) -> Evaluation {
    fault(&format!("entry point timed out after {timeout_secs}s"))
}

/// Reclassify any evaluator fault as an error outcome.
pub fn fault(message: &str) -> Evaluation {
    Evaluation {
        test: RunTest::ObjectiveNotMetError,
        result: None,
        error: Some(message.to_string()),
    }
}
