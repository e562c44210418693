//! `refiner` command-line entry point.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use refiner::context::LoopContext;
use refiner::core::sandbox::SandboxViolation;
use refiner::core::types::Evaluation;
use refiner::evaluate::evaluate;
use refiner::exit_codes;
use refiner::io::config::{RefinerConfig, load_config};
use refiner::io::dependencies::{DependencyResolver, NoopResolver, PipResolver};
use refiner::io::interaction::{Interactor, StdinInteractor};
use refiner::io::model::CommandModel;
use refiner::io::paths::{InitOptions, RefinerPaths, init_refiner};
use refiner::io::prompt_log::PromptLog;
use refiner::io::session_store::{JsonFileStore, SessionStore};
use refiner::io::workspace::Sandbox;
use refiner::logging;
use refiner::looping::{ExhaustReason, IterationReport, LoopLimits, LoopStop, run_loop};
use refiner::start::{ObjectiveInput, RestartPolicy, StartOptions, prepare_session, reset_session};

#[derive(Parser)]
#[command(
    name = "refiner",
    version,
    about = "Refine sandboxed code with a model until it prints the expected result"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.refiner/config.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the refinement loop until the objective is met or a budget runs out.
    Run {
        /// What the program should do.
        #[arg(long, requires = "expected")]
        objective: Option<String>,
        /// Exact output the entry point must print.
        #[arg(long, requires = "objective")]
        expected: Option<String>,
        /// Override `max_iterations` from the config (0 = unbounded).
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Discard files from a previous session without asking.
        #[arg(long, conflicts_with = "resume")]
        restart: bool,
        /// Keep files from a previous session without asking.
        #[arg(long)]
        resume: bool,
    },
    /// Run the entry point once and report the outcome.
    Evaluate,
    /// Show the objective, known files, and latest change and run.
    Status,
    /// Delete the sandbox and reset the session.
    Reset,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<SandboxViolation>().is_some() {
                exit_codes::SANDBOX_VIOLATION
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            objective,
            expected,
            max_iterations,
            restart,
            resume,
        } => {
            let options = StartOptions {
                objective: objective
                    .zip(expected)
                    .map(|(objective, expected_result)| ObjectiveInput {
                        objective,
                        expected_result,
                    }),
                restart: restart_policy(restart, resume),
            };
            cmd_run(&root, &options, max_iterations)
        }
        Command::Evaluate => cmd_evaluate(&root),
        Command::Status => cmd_status(&root),
        Command::Reset => cmd_reset(&root),
    }
}

fn restart_policy(restart: bool, resume: bool) -> RestartPolicy {
    match (restart, resume) {
        (true, _) => RestartPolicy::Always,
        (false, true) => RestartPolicy::Never,
        (false, false) => RestartPolicy::Ask,
    }
}

/// Config, sandbox, and stores for a project root.
struct Project {
    paths: RefinerPaths,
    config: RefinerConfig,
    sandbox: Sandbox,
    store: JsonFileStore,
    prompt_log: PromptLog,
}

impl Project {
    fn open(root: &Path) -> Result<Self> {
        let paths = RefinerPaths::new(root);
        let config = load_config(&paths.config_path)?;
        let sandbox = Sandbox::new(root, &config)?;
        Ok(Self {
            store: JsonFileStore::new(&paths.session_path),
            prompt_log: PromptLog::new(&paths.prompt_log_path),
            paths,
            config,
            sandbox,
        })
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_refiner(root, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, options: &StartOptions, max_iterations: Option<u32>) -> Result<i32> {
    let mut project = Project::open(root)?;
    if let Some(max_iterations) = max_iterations {
        project.config.max_iterations = max_iterations;
    }
    let model = CommandModel::from_config(&project.config.model);
    let interactor = StdinInteractor::stdio();
    if project.config.dependencies.enabled {
        let resolver = PipResolver::new(&project.config.dependencies, &interactor);
        drive(&project, &model, &resolver, &interactor, options)
    } else {
        drive(&project, &model, &NoopResolver, &interactor, options)
    }
}

fn drive<D: DependencyResolver, I: Interactor>(
    project: &Project,
    model: &CommandModel,
    resolver: &D,
    interactor: &I,
    options: &StartOptions,
) -> Result<i32> {
    let ctx = LoopContext::new(
        &project.config,
        &project.sandbox,
        &project.store,
        model,
        &project.prompt_log,
        resolver,
    );
    let start = prepare_session(&ctx, interactor, options)?;
    info!(
        objective = %start.session.objective,
        restarted = start.restarted,
        bootstrapped = start.bootstrapped,
        session = %project.paths.session_path.display(),
        "session ready"
    );

    let outcome = run_loop(&ctx, &LoopLimits::from_config(&project.config), print_iteration)?;
    match outcome.stop {
        LoopStop::ObjectiveMet => {
            println!("objective met after {} iteration(s)", outcome.iterations);
            print_evaluation(&outcome.last);
            Ok(exit_codes::OK)
        }
        LoopStop::Exhausted { reason } => {
            match reason {
                ExhaustReason::MaxIterations { max_iterations } => {
                    println!("stopped: reached max_iterations ({max_iterations})");
                }
                ExhaustReason::WallClock { budget_secs } => {
                    println!("stopped: wall-clock budget of {budget_secs}s exhausted");
                }
            }
            print_evaluation(&outcome.last);
            Ok(exit_codes::EXHAUSTED)
        }
        LoopStop::SandboxViolation { path } => {
            eprintln!(
                "aborted: '{path}' resolves outside sandbox '{}'",
                project.sandbox.dir_display()
            );
            Ok(exit_codes::SANDBOX_VIOLATION)
        }
    }
}

fn print_iteration(report: &IterationReport) {
    let target = report
        .decision
        .as_ref()
        .map(|d| format!("{} {}", d.action, d.file))
        .unwrap_or_else(|| "no decision".to_string());
    match (&report.skipped, &report.evaluation) {
        (Some(reason), _) => println!("[{}] {target}: skipped ({reason})", report.iteration),
        (None, Some(evaluation)) => println!(
            "[{}] {target}: {}",
            report.iteration,
            evaluation.test.as_str()
        ),
        (None, None) => println!("[{}] {target}", report.iteration),
    }
}

fn print_evaluation(evaluation: &Evaluation) {
    println!("test: {}", evaluation.test.as_str());
    if let Some(result) = &evaluation.result {
        println!("result: {result}");
    }
    if let Some(error) = &evaluation.error {
        println!("error: {}", error.trim_end());
    }
}

fn cmd_evaluate(root: &Path) -> Result<i32> {
    let project = Project::open(root)?;
    let evaluation = evaluate(&project.store, &project.sandbox, &project.config, None);
    print_evaluation(&evaluation);
    Ok(if evaluation.met() {
        exit_codes::OK
    } else {
        exit_codes::EXHAUSTED
    })
}

fn cmd_status(root: &Path) -> Result<i32> {
    let project = Project::open(root)?;
    let session = project.store.load()?;
    println!("objective: {}", session.objective);
    println!("expected: {}", session.expected_result);
    println!("files ({}):", session.known_files.len());
    for file in &session.known_files {
        println!("  {file}");
    }
    println!(
        "changes: {}, runs: {}",
        session.change_log.len(),
        session.run_log.len()
    );
    if let Some(change) = session.latest_change() {
        println!(
            "latest change: {} {} at {} ({})",
            change.action, change.file_path, change.timestamp, change.functionality
        );
    }
    if let Some(run) = session.latest_run() {
        println!("latest run: {} at {}", run.test.as_str(), run.timestamp);
    }
    Ok(exit_codes::OK)
}

fn cmd_reset(root: &Path) -> Result<i32> {
    let project = Project::open(root)?;
    reset_session(&project.store, &project.sandbox)?;
    println!("removed {} and reset the session", project.sandbox.dir_display());
    Ok(exit_codes::OK)
}
