//! Session start: restart policy, objective, and sandbox bootstrap.
//!
//! This is the INIT state of the loop. It leaves the store with an objective
//! and the sandbox with at least an entry point, so the first evaluation has
//! something to run.

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::apply::{resolve_dependencies, sync_known_files};
use crate::context::LoopContext;
use crate::core::response::{parse_generated_file, parse_outline};
use crate::core::types::{Action, ChangeEntry, Feedback, Session};
use crate::io::dependencies::DependencyResolver;
use crate::io::interaction::Interactor;
use crate::io::model::{Model, ResponseKind};
use crate::io::session_store::{SessionStore, now_timestamp};
use crate::io::workspace::Sandbox;

/// What to do when a previous session left files behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Ask the operator.
    #[default]
    Ask,
    Always,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveInput {
    pub objective: String,
    pub expected_result: String,
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Objective from the command line; asked interactively when absent and
    /// the session has none.
    pub objective: Option<ObjectiveInput>,
    pub restart: RestartPolicy,
}

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub session: Session,
    pub restarted: bool,
    pub bootstrapped: bool,
}

/// Prepare the session for a loop run.
#[instrument(skip_all)]
pub fn prepare_session<S: SessionStore, M: Model, D: DependencyResolver, I: Interactor>(
    ctx: &LoopContext<'_, S, M, D>,
    interactor: &I,
    options: &StartOptions,
) -> Result<StartOutcome> {
    sync_known_files(ctx.store, ctx.sandbox)?;
    let session = ctx.store.load()?;

    let mut restarted = false;
    if !session.known_files.is_empty() {
        let restart = match options.restart {
            RestartPolicy::Always => true,
            RestartPolicy::Never => false,
            RestartPolicy::Ask => interactor.confirm(&format!(
                "Found {} file(s) from a previous session. Start over?",
                session.known_files.len()
            ))?,
        };
        if restart {
            reset_session(ctx.store, ctx.sandbox)?;
            restarted = true;
        }
    }

    let session = ctx.store.load()?;
    match &options.objective {
        Some(input) => {
            if input.objective.trim().is_empty() || input.expected_result.trim().is_empty() {
                bail!("objective and expected result must not be empty");
            }
            ctx.store
                .set_objective(&input.objective, &input.expected_result)?;
        }
        None if session.has_objective() => {}
        None => {
            let (objective, expected) = interactor.ask_objective()?;
            ctx.store.set_objective(&objective, &expected)?;
        }
    }

    let session = ctx.store.load()?;
    let bootstrapped = session.known_files.is_empty();
    if bootstrapped {
        ctx.sandbox.ensure_dir()?;
        if ctx.config.bootstrap.outline {
            let feedback = Feedback::new(&session.objective, &session.expected_result);
            let created = bootstrap_outline(ctx, &feedback)?;
            info!(created, "outline bootstrap finished");
        }
        ctx.sandbox
            .bootstrap_entry_point(&ctx.config.bootstrap.entry_point_source)?;
        sync_known_files(ctx.store, ctx.sandbox)?;
    }

    Ok(StartOutcome {
        session: ctx.store.load()?,
        restarted,
        bootstrapped,
    })
}

/// Delete the sandbox and replace the session with defaults.
pub fn reset_session<S: SessionStore>(store: &S, sandbox: &Sandbox) -> Result<()> {
    sandbox.remove_all()?;
    store.reset().context("reset session")?;
    info!(sandbox = %sandbox.dir_display(), "session reset");
    Ok(())
}

/// Ask the model for a file outline, then for each outlined file.
///
/// Returns the number of files written. A malformed outline writes nothing; a
/// malformed file reply or a failed write skips that file. Outlined names are relative to the
/// sandbox and must stay inside it.
fn bootstrap_outline<S: SessionStore, M: Model, D: DependencyResolver>(
    ctx: &LoopContext<'_, S, M, D>,
    feedback: &Feedback,
) -> Result<usize> {
    let prompt = ctx
        .prompts
        .build_outline(feedback, &ctx.config.entry_point)?;
    let outline = match ctx
        .model
        .ask(&prompt, ResponseKind::Json)
        .map(|raw| parse_outline(&raw))
    {
        Ok(Ok(outline)) => outline,
        Ok(Err(err)) => {
            warn!(err = %err, "unusable outline, skipping");
            return Ok(0);
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "outline request failed, skipping");
            return Ok(0);
        }
    };

    let mut created = 0;
    for (name, functionality) in &outline.files {
        let candidate = format!("{}/{}", ctx.sandbox.dir_display(), name);
        let path = ctx.sandbox.resolve(&candidate).map_err(anyhow::Error::new)?;

        let prompt = ctx
            .prompts
            .build_outline_file(feedback, &outline, name, functionality)?;
        let code = match ctx
            .model
            .ask(&prompt, ResponseKind::Json)
            .map(|raw| parse_generated_file(&raw))
        {
            Ok(Ok(response)) => response.code,
            Ok(Err(err)) => {
                warn!(file = %name, err = %err, "unusable file reply, skipping");
                continue;
            }
            Err(err) => {
                warn!(file = %name, err = %format!("{err:#}"), "file request failed, skipping");
                continue;
            }
        };

        resolve_dependencies(ctx, &code);
        if let Err(err) = ctx.sandbox.write(&path, &code) {
            warn!(file = %name, err = %format!("{err:#}"), "write failed, skipping");
            continue;
        }
        sync_known_files(ctx.store, ctx.sandbox)?;
        ctx.store.append_change(ChangeEntry {
            action: Action::Create,
            code: Some(code),
            file_path: ctx.sandbox.relative(&path),
            functionality: functionality.clone(),
            timestamp: now_timestamp(),
        })?;
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sandbox::SandboxViolation;
    use crate::io::dependencies::NoopResolver;
    use crate::test_support::{ScriptedInteractor, ScriptedModel, TestProject};

    fn objective() -> Option<ObjectiveInput> {
        Some(ObjectiveInput {
            objective: "print the sum of 1 and 2".to_string(),
            expected_result: "3".to_string(),
        })
    }

    #[test]
    fn fresh_project_gets_objective_and_entry_point() {
        let project = TestProject::empty().expect("project");
        let model = ScriptedModel::new(Vec::new());
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);
        let interactor = ScriptedInteractor::new(
            Some(("print the sum of 1 and 2", "3")),
            Vec::new(),
        );

        let outcome = prepare_session(&ctx, &interactor, &StartOptions::default()).expect("start");

        assert!(outcome.bootstrapped);
        assert!(!outcome.restarted);
        assert_eq!(outcome.session.objective, "print the sum of 1 and 2");
        assert_eq!(outcome.session.expected_result, "3");
        assert!(outcome.session.known_files.contains("dynamic/main.sh"));
        assert!(project.sandbox.read_entry_point().expect("read").is_some());
        assert!(outcome.session.change_log.is_empty());
    }

    #[test]
    fn existing_files_restart_when_confirmed() {
        let project = TestProject::new("old objective", "old").expect("project");
        project.write_entry_point("echo old\n").expect("write");
        project.write_file("extra.sh", "echo extra\n").expect("write");
        let model = ScriptedModel::new(Vec::new());
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);
        let interactor = ScriptedInteractor::new(Some(("new objective", "new")), vec![true]);

        let outcome = prepare_session(&ctx, &interactor, &StartOptions::default()).expect("start");

        assert!(outcome.restarted);
        assert!(outcome.bootstrapped);
        assert_eq!(outcome.session.objective, "new objective");
        assert!(!project.sandbox.dir().join("extra.sh").exists());
        assert_eq!(interactor.questions().len(), 1);
    }

    #[test]
    fn resume_keeps_files_and_objective() {
        let project = TestProject::new("keep me", "3").expect("project");
        project.write_entry_point("echo 2\n").expect("write");
        let model = ScriptedModel::new(Vec::new());
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);
        let interactor = ScriptedInteractor::new(None, Vec::new());

        let options = StartOptions {
            objective: None,
            restart: RestartPolicy::Never,
        };
        let outcome = prepare_session(&ctx, &interactor, &options).expect("start");

        assert!(!outcome.restarted);
        assert!(!outcome.bootstrapped);
        assert_eq!(outcome.session.objective, "keep me");
        assert_eq!(
            project.sandbox.read_entry_point().expect("read").as_deref(),
            Some("echo 2\n")
        );
        assert!(interactor.questions().is_empty());
    }

    #[test]
    fn command_line_objective_replaces_stored_one() {
        let project = TestProject::new("old", "1").expect("project");
        let model = ScriptedModel::new(Vec::new());
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);
        let interactor = ScriptedInteractor::new(None, Vec::new());

        let options = StartOptions {
            objective: objective(),
            restart: RestartPolicy::Always,
        };
        let outcome = prepare_session(&ctx, &interactor, &options).expect("start");
        assert_eq!(outcome.session.objective, "print the sum of 1 and 2");
    }

    #[test]
    fn outline_bootstrap_creates_planned_files() {
        let mut project = TestProject::empty().expect("project");
        project.config.bootstrap.outline = true;
        let model = ScriptedModel::new(vec![
            Ok(r#"{"main.sh": "print the sum", "lib.sh": "define add"}"#.to_string()),
            Ok(r#"{"code": "add() { echo $(($1 + $2)); }"}"#.to_string()),
            Ok("not json".to_string()),
        ]);
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);
        let interactor = ScriptedInteractor::new(None, Vec::new());

        let options = StartOptions {
            objective: objective(),
            restart: RestartPolicy::Never,
        };
        let outcome = prepare_session(&ctx, &interactor, &options).expect("start");

        // lib.sh sorts first; main.sh's reply was unusable so the stub entry point is written.
        assert_eq!(outcome.session.change_log.len(), 1);
        assert_eq!(outcome.session.change_log[0].file_path, "dynamic/lib.sh");
        assert_eq!(outcome.session.change_log[0].action, Action::Create);
        assert!(outcome.session.known_files.contains("dynamic/main.sh"));
        model.assert_drained();
    }

    #[test]
    fn outline_escape_is_a_violation() {
        let mut project = TestProject::empty().expect("project");
        project.config.bootstrap.outline = true;
        let model = ScriptedModel::new(vec![Ok(r#"{"../escape.sh": "nope"}"#.to_string())]);
        let resolver = NoopResolver;
        let ctx = project.context(&model, &resolver);
        let interactor = ScriptedInteractor::new(None, Vec::new());

        let options = StartOptions {
            objective: objective(),
            restart: RestartPolicy::Never,
        };
        let err = prepare_session(&ctx, &interactor, &options).unwrap_err();
        assert!(err.downcast_ref::<SandboxViolation>().is_some());
        assert!(!project.root().join("escape.sh").exists());
    }

    #[test]
    fn reset_removes_sandbox_and_session() {
        let project = TestProject::new("objective", "3").expect("project");
        project.write_entry_point("echo 3\n").expect("write");
        project.sync_known_files().expect("sync");

        reset_session(&project.store, &project.sandbox).expect("reset");
        assert!(!project.sandbox.dir().exists());
        assert_eq!(project.session(), Session::default());
    }
}
