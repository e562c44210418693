//! Objective evaluation: run the entry point and classify what it printed.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::cap_timeout;
use crate::core::classifier::{classify_output, fault, no_code, timed_out};
use crate::core::types::Evaluation;
use crate::io::config::RefinerConfig;
use crate::io::process::{command_from_parts, run_command_with_timeout};
use crate::io::session_store::{SessionStore, now_timestamp};
use crate::io::workspace::Sandbox;

/// Run the entry point once and append the outcome to the run log.
///
/// Never fails: every fault is folded into an `objective_not_met_error`
/// evaluation, and a failure to persist the run entry is only logged.
#[instrument(skip_all)]
pub fn evaluate<S: SessionStore>(
    store: &S,
    sandbox: &Sandbox,
    config: &RefinerConfig,
    deadline: Option<Instant>,
) -> Evaluation {
    let evaluation = match store.load() {
        Ok(session) => run_entry_point(sandbox, config, &session.expected_result, deadline)
            .unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "evaluation fault");
                fault(&format!("{err:#}"))
            }),
        Err(err) => fault(&format!("{err:#}")),
    };

    info!(
        test = evaluation.test.as_str(),
        result = ?evaluation.result,
        has_error = evaluation.error.is_some(),
        "evaluated entry point"
    );
    if let Err(err) = store.append_run(evaluation.to_entry(now_timestamp())) {
        warn!(err = %format!("{err:#}"), "failed to append run entry");
    }
    evaluation
}

fn run_entry_point(
    sandbox: &Sandbox,
    config: &RefinerConfig,
    expected: &str,
    deadline: Option<Instant>,
) -> Result<Evaluation> {
    if sandbox.read_entry_point()?.is_none() {
        debug!(entry_point = %sandbox.entry_point_display(), "no entry point");
        return Ok(no_code());
    }

    let timeout = cap_timeout(Duration::from_secs(config.run_timeout_secs), deadline)?;
    let mut cmd = command_from_parts(&config.interpreter)?;
    cmd.arg(&config.entry_point).current_dir(sandbox.dir());
    let output = run_command_with_timeout(cmd, None, timeout, config.output_limit_bytes)?;

    if output.timed_out {
        return Ok(timed_out(timeout.as_secs()));
    }
    Ok(classify_output(
        output.status.success(),
        output.status.code(),
        &output.stdout_text(),
        &output.stderr_text(),
        expected,
    ))
}
