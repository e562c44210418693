//! Convergence loop: EVALUATE -> (DONE | SELECT -> APPLY -> EVALUATE).

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

use crate::apply::apply;
use crate::context::LoopContext;
use crate::core::budget::deadline_passed;
use crate::core::sandbox::SandboxViolation;
use crate::core::types::{Evaluation, Feedback, FileActionDecision};
use crate::evaluate::evaluate;
use crate::io::config::RefinerConfig;
use crate::io::dependencies::DependencyResolver;
use crate::io::model::Model;
use crate::io::session_store::SessionStore;
use crate::select::{Selection, select_action};

/// Caps for a single `run_loop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    /// Maximum SELECT/APPLY cycles; `0` is unbounded.
    pub max_iterations: u32,
    pub max_wall_clock: Option<Duration>,
}

impl LoopLimits {
    pub fn from_config(config: &RefinerConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_wall_clock: (config.max_wall_clock_secs > 0)
                .then(|| Duration::from_secs(config.max_wall_clock_secs)),
        }
    }
}

/// Which budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustReason {
    MaxIterations { max_iterations: u32 },
    WallClock { budget_secs: u64 },
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The entry point printed the expected result.
    ObjectiveMet,
    /// A budget ran out before the objective was met.
    Exhausted { reason: ExhaustReason },
    /// A selected path escaped the sandbox; nothing was written.
    SandboxViolation { path: String },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// SELECT/APPLY cycles executed, including ones without a decision.
    pub iterations: u32,
    pub stop: LoopStop,
    /// Most recent evaluation.
    pub last: Evaluation,
}

/// Progress report passed to the `on_iteration` callback.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: u32,
    pub decision: Option<FileActionDecision>,
    /// Why no decision was made, if none was.
    pub skipped: Option<String>,
    pub applied: bool,
    /// Evaluation after the change; `None` when nothing was applied.
    pub evaluation: Option<Evaluation>,
}

/// Run the convergence loop until the objective is met, a budget is
/// exhausted, or a sandbox violation aborts the run.
///
/// Expects a prepared session (see [`crate::start::prepare_session`]).
/// Errors other than sandbox violations propagate.
pub fn run_loop<S: SessionStore, M: Model, D: DependencyResolver, F: FnMut(&IterationReport)>(
    ctx: &LoopContext<'_, S, M, D>,
    limits: &LoopLimits,
    mut on_iteration: F,
) -> Result<LoopOutcome> {
    let deadline = limits.max_wall_clock.map(|budget| Instant::now() + budget);
    let session = ctx.store.load()?;
    let mut feedback = Feedback::new(&session.objective, &session.expected_result);

    let mut last = evaluate(ctx.store, ctx.sandbox, ctx.config, deadline);
    feedback.record(&last);
    let mut iterations = 0u32;

    loop {
        if last.met() {
            info!(iterations, "objective met");
            return Ok(LoopOutcome {
                iterations,
                stop: LoopStop::ObjectiveMet,
                last,
            });
        }
        if let Some(reason) = exhausted(limits, iterations, deadline) {
            info!(iterations, ?reason, "budget exhausted");
            return Ok(LoopOutcome {
                iterations,
                stop: LoopStop::Exhausted { reason },
                last,
            });
        }

        iterations += 1;
        let decision = match select_action(ctx, &feedback)? {
            Selection::Decision(decision) => decision,
            Selection::NoDecision { reason } => {
                on_iteration(&IterationReport {
                    iteration: iterations,
                    decision: None,
                    skipped: Some(reason),
                    applied: false,
                    evaluation: None,
                });
                continue;
            }
        };

        let applied = match apply(ctx, &decision, &feedback) {
            Ok(applied) => applied,
            Err(err) => {
                if let Some(violation) = err.downcast_ref::<SandboxViolation>() {
                    let latest_run = ctx.store.latest_run().ok().flatten();
                    warn!(
                        path = %violation.path,
                        sandbox = %violation.sandbox,
                        ?latest_run,
                        "sandbox violation, aborting"
                    );
                    return Ok(LoopOutcome {
                        iterations,
                        stop: LoopStop::SandboxViolation {
                            path: violation.path.clone(),
                        },
                        last,
                    });
                }
                return Err(err);
            }
        };

        if !applied {
            on_iteration(&IterationReport {
                iteration: iterations,
                decision: Some(decision),
                skipped: Some("change not applied".to_string()),
                applied: false,
                evaluation: None,
            });
            continue;
        }

        last = evaluate(ctx.store, ctx.sandbox, ctx.config, deadline);
        feedback.record(&last);
        on_iteration(&IterationReport {
            iteration: iterations,
            decision: Some(decision),
            skipped: None,
            applied: true,
            evaluation: Some(last.clone()),
        });
    }
}

fn exhausted(limits: &LoopLimits, iterations: u32, deadline: Option<Instant>) -> Option<ExhaustReason> {
    if limits.max_iterations > 0 && iterations >= limits.max_iterations {
        return Some(ExhaustReason::MaxIterations {
            max_iterations: limits.max_iterations,
        });
    }
    if deadline_passed(deadline) {
        return Some(ExhaustReason::WallClock {
            budget_secs: limits.max_wall_clock.map_or(0, |budget| budget.as_secs()),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunTest;
    use crate::io::dependencies::NoopResolver;
    use crate::test_support::{ScriptedModel, TestProject, decision_json};

    fn limits(max_iterations: u32) -> LoopLimits {
        LoopLimits {
            max_iterations,
            max_wall_clock: None,
        }
    }

    #[test]
    fn already_met_runs_no_iterations() {
        let project = TestProject::new("print 3", "3").expect("project");
        project.write_entry_point("echo 3\n").expect("write");
        let model = ScriptedModel::new(Vec::new());
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);

        let outcome = run_loop(&ctx, &limits(5), |_| {}).expect("loop");
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.stop, LoopStop::ObjectiveMet);
        assert_eq!(project.session().run_log.len(), 1);
    }

    /// A skipped selection counts as an iteration and does not re-evaluate.
    #[test]
    fn no_decision_retries_without_evaluating() {
        let project = TestProject::new("print 3", "3").expect("project");
        project.write_entry_point("echo 2\n").expect("write");
        let model = ScriptedModel::new(vec![
            Ok("{not json".to_string()),
            Ok(decision_json("dynamic/main.sh", "edit", "print 3")),
            Ok("echo 3\n".to_string()),
        ]);
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);

        let mut reports = Vec::new();
        let outcome = run_loop(&ctx, &limits(5), |report| reports.push(report.clone()))
            .expect("loop");

        assert_eq!(outcome.stop, LoopStop::ObjectiveMet);
        assert_eq!(outcome.iterations, 2);
        assert!(reports[0].skipped.is_some());
        assert!(reports[1].applied);

        let session = project.session();
        assert_eq!(session.change_log.len(), 1);
        assert_eq!(session.run_log.len(), 2);
        model.assert_drained();
    }

    /// A decision whose target cannot be touched is skipped; the loop goes on.
    #[test]
    fn filesystem_failure_on_target_continues_loop() {
        let project = TestProject::new("print 3", "3").expect("project");
        project.write_entry_point("echo 2\n").expect("write");
        project.write_file("pkg/mod.sh", "echo 1\n").expect("write");
        let model = ScriptedModel::new(vec![
            Ok(decision_json("dynamic/pkg", "delete", "drop pkg")),
            Ok(decision_json("dynamic/pkg", "edit", "rewrite pkg")),
            Ok(decision_json("dynamic/main.sh", "edit", "print 3")),
            Ok("echo 3\n".to_string()),
        ]);
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);

        let mut reports = Vec::new();
        let outcome = run_loop(&ctx, &limits(5), |report| reports.push(report.clone()))
            .expect("loop");

        assert_eq!(outcome.stop, LoopStop::ObjectiveMet);
        assert_eq!(outcome.iterations, 3);
        assert!(!reports[0].applied);
        assert!(!reports[1].applied);
        assert_eq!(project.session().change_log.len(), 1);
        model.assert_drained();
    }

    #[test]
    fn stops_after_max_iterations() {
        let project = TestProject::new("print 3", "3").expect("project");
        project.write_entry_point("echo 2\n").expect("write");
        let model = ScriptedModel::new(vec![
            Ok(decision_json("dynamic/main.sh", "edit", "print 3")),
            Ok("echo 4\n".to_string()),
            Ok(decision_json("dynamic/main.sh", "edit", "print 3")),
            Ok("echo 5\n".to_string()),
        ]);
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);

        let outcome = run_loop(&ctx, &limits(2), |_| {}).expect("loop");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            outcome.stop,
            LoopStop::Exhausted {
                reason: ExhaustReason::MaxIterations { max_iterations: 2 }
            }
        );
        assert_eq!(outcome.last.test, RunTest::ObjectiveNotMet);
        assert_eq!(outcome.last.result.as_deref(), Some("5"));
        model.assert_drained();
    }

    #[test]
    fn zero_wall_clock_budget_exhausts_immediately() {
        let project = TestProject::new("print 3", "3").expect("project");
        project.write_entry_point("echo 2\n").expect("write");
        let model = ScriptedModel::new(Vec::new());
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);

        let outcome = run_loop(
            &ctx,
            &LoopLimits {
                max_iterations: 0,
                max_wall_clock: Some(Duration::ZERO),
            },
            |_| {},
        )
        .expect("loop");
        assert_eq!(
            outcome.stop,
            LoopStop::Exhausted {
                reason: ExhaustReason::WallClock { budget_secs: 0 }
            }
        );
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn sandbox_violation_aborts() {
        let project = TestProject::new("print 3", "3").expect("project");
        project.write_entry_point("echo 2\n").expect("write");
        let model = ScriptedModel::new(vec![Ok(decision_json("../evil.sh", "create", "x"))]);
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);

        let outcome = run_loop(&ctx, &limits(5), |_| {}).expect("loop");
        assert_eq!(
            outcome.stop,
            LoopStop::SandboxViolation {
                path: "../evil.sh".to_string()
            }
        );
        assert!(project.session().change_log.is_empty());
        model.assert_drained();
    }

    #[test]
    fn limits_follow_config() {
        let project = TestProject::new("o", "e").expect("project");
        let limits = LoopLimits::from_config(&project.config);
        assert_eq!(limits.max_iterations, project.config.max_iterations);
        assert_eq!(limits.max_wall_clock, None);
    }
}
