//! End-to-end loop runs against scripted models and a shell sandbox.

use refiner::core::types::{Action, RunTest};
use refiner::io::dependencies::NoopResolver;
use refiner::looping::{ExhaustReason, LoopLimits, LoopStop, run_loop};
use refiner::start::{ObjectiveInput, RestartPolicy, StartOptions, prepare_session};
use refiner::test_support::{ScriptedInteractor, ScriptedModel, TestProject, decision_json};

fn limits(max_iterations: u32) -> LoopLimits {
    LoopLimits {
        max_iterations,
        max_wall_clock: None,
    }
}

fn start_options() -> StartOptions {
    StartOptions {
        objective: Some(ObjectiveInput {
            objective: "print the sum of 1 and 2".to_string(),
            expected_result: "3".to_string(),
        }),
        restart: RestartPolicy::Never,
    }
}

#[test]
fn sum_objective_converges_in_one_cycle() {
    let project = TestProject::empty().expect("project");
    project.write_entry_point("echo 2\n").expect("write");
    let model = ScriptedModel::new(vec![
        Ok(decision_json(
            "dynamic/main.sh",
            "edit",
            "print the sum of 1 and 2",
        )),
        Ok("```sh\necho $((1 + 2))\n```".to_string()),
    ]);
    let resolver = NoopResolver;
    let interactor = ScriptedInteractor::new(None, Vec::new());
    let ctx = project.context(&model, &resolver);

    prepare_session(&ctx, &interactor, &start_options()).expect("start");
    let outcome = run_loop(&ctx, &limits(5), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::ObjectiveMet);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.last.result.as_deref(), Some("3"));

    let session = project.session();
    assert_eq!(session.change_log.len(), 1);
    assert_eq!(session.change_log[0].action, Action::Edit);
    let tests: Vec<RunTest> = session.run_log.iter().map(|run| run.test).collect();
    assert_eq!(tests, vec![RunTest::ObjectiveNotMet, RunTest::ObjectiveMet]);
    model.assert_drained();
}

#[test]
fn fresh_project_bootstraps_then_converges() {
    let project = TestProject::empty().expect("project");
    let model = ScriptedModel::new(vec![
        Ok(decision_json("dynamic/main.sh", "edit", "print 3")),
        Ok("echo 3\n".to_string()),
    ]);
    let resolver = NoopResolver;
    let interactor = ScriptedInteractor::new(None, Vec::new());
    let ctx = project.context(&model, &resolver);

    let start = prepare_session(&ctx, &interactor, &start_options()).expect("start");
    assert!(start.bootstrapped);

    let outcome = run_loop(&ctx, &limits(3), |_| {}).expect("loop");
    assert_eq!(outcome.stop, LoopStop::ObjectiveMet);
    // The stub prints "hello", so the first run is a miss.
    assert_eq!(project.session().run_log[0].result.as_deref(), Some("hello"));
}

#[test]
fn malformed_selection_appends_no_change() {
    let project = TestProject::new("print 3", "3").expect("project");
    project.write_entry_point("echo 2\n").expect("write");
    let model = ScriptedModel::new(vec![
        Ok("{\"file\": \"dynamic/main.sh\"".to_string()),
        Ok(r#"{"file": "dynamic/main.sh", "action": "rename", "functionality": "x"}"#.to_string()),
    ]);
    let resolver = NoopResolver;
    let ctx = project.context(&model, &resolver);

    let outcome = run_loop(&ctx, &limits(2), |_| {}).expect("loop");

    assert_eq!(
        outcome.stop,
        LoopStop::Exhausted {
            reason: ExhaustReason::MaxIterations { max_iterations: 2 }
        }
    );
    let session = project.session();
    assert!(session.change_log.is_empty());
    assert_eq!(session.run_log.len(), 1);
    model.assert_drained();
}

#[test]
fn escaping_selection_aborts_without_writing() {
    let project = TestProject::new("print 3", "3").expect("project");
    project.write_entry_point("echo 2\n").expect("write");
    let model = ScriptedModel::new(vec![Ok(decision_json(
        "dynamic/../../escape.sh",
        "create",
        "escape",
    ))]);
    let resolver = NoopResolver;
    let ctx = project.context(&model, &resolver);

    let outcome = run_loop(&ctx, &limits(5), |_| {}).expect("loop");

    assert!(matches!(outcome.stop, LoopStop::SandboxViolation { .. }));
    assert!(project.session().change_log.is_empty());
    let parent = project.root().parent().expect("parent");
    assert!(!parent.join("escape.sh").exists());
}

#[test]
fn crashing_program_feeds_error_into_next_prompt() {
    let project = TestProject::new("print 3", "3").expect("project");
    project
        .write_entry_point("echo boom >&2\nexit 1\n")
        .expect("write");
    let model = ScriptedModel::new(vec![
        Ok(decision_json("dynamic/main.sh", "edit", "print 3")),
        Ok("echo 3\n".to_string()),
    ]);
    let resolver = NoopResolver;
    let ctx = project.context(&model, &resolver);

    let outcome = run_loop(&ctx, &limits(3), |_| {}).expect("loop");
    assert_eq!(outcome.stop, LoopStop::ObjectiveMet);

    let requests = model.requests();
    assert!(requests[0].prompt.contains("boom"));
    assert_eq!(project.session().run_log[0].test, RunTest::ObjectiveNotMetError);
}

#[test]
fn iteration_budget_bounds_model_calls() {
    let project = TestProject::new("print 3", "3").expect("project");
    project.write_entry_point("echo 2\n").expect("write");
    let mut replies = Vec::new();
    for attempt in 4..7 {
        replies.push(Ok(decision_json("dynamic/main.sh", "edit", "print 3")));
        replies.push(Ok(format!("echo {attempt}\n")));
    }
    let model = ScriptedModel::new(replies);
    let resolver = NoopResolver;
    let ctx = project.context(&model, &resolver);

    let mut seen = Vec::new();
    let outcome = run_loop(&ctx, &limits(3), |report| seen.push(report.iteration)).expect("loop");

    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.last.result.as_deref(), Some("6"));
    assert_eq!(project.session().run_log.len(), 4);
    model.assert_drained();
}
