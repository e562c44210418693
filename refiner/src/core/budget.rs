//! Shared time budget helpers for the convergence loop.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("wall-clock budget exhausted"));
    }
    Ok(remaining)
}

/// Cap a per-call timeout by the loop deadline, if one is set.
pub fn cap_timeout(timeout: Duration, deadline: Option<Instant>) -> Result<Duration> {
    match deadline {
        Some(deadline) => Ok(timeout.min(remaining_budget(deadline)?)),
        None => Ok(timeout),
    }
}

/// True once `deadline` has passed. `None` never expires.
pub fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}
