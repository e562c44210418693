//! Test helpers: throwaway projects and scripted collaborators.
//!
//! Projects run their entry point with `sh` so tests do not depend on a
//! Python installation.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::apply::sync_known_files;
use crate::context::LoopContext;
use crate::core::types::Session;
use crate::io::config::{BootstrapConfig, DependencyConfig, RefinerConfig, write_config};
use crate::io::dependencies::DependencyResolver;
use crate::io::interaction::Interactor;
use crate::io::model::{Model, ModelRequest};
use crate::io::paths::RefinerPaths;
use crate::io::prompt_log::PromptLog;
use crate::io::session_store::{JsonFileStore, SessionStore};
use crate::io::workspace::Sandbox;

/// Config for a shell-script sandbox at `dynamic/main.sh`.
pub fn shell_config() -> RefinerConfig {
    RefinerConfig {
        entry_point: "main.sh".to_string(),
        language: "POSIX shell".to_string(),
        interpreter: vec!["sh".to_string()],
        run_timeout_secs: 10,
        dependencies: DependencyConfig {
            enabled: false,
            ..DependencyConfig::default()
        },
        bootstrap: BootstrapConfig {
            outline: false,
            entry_point_source: "echo hello\n".to_string(),
        },
        ..RefinerConfig::default()
    }
}

/// A project root in a temp directory with a JSON session store.
pub struct TestProject {
    _temp: TempDir,
    pub paths: RefinerPaths,
    pub config: RefinerConfig,
    pub sandbox: Sandbox,
    pub store: JsonFileStore,
    pub prompt_log: PromptLog,
}

impl TestProject {
    /// Project with no session objective and no sandbox.
    pub fn empty() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = RefinerPaths::new(temp.path());
        let config = shell_config();
        write_config(&paths.config_path, &config)?;
        let sandbox = Sandbox::new(temp.path(), &config)?;
        Ok(Self {
            store: JsonFileStore::new(&paths.session_path),
            prompt_log: PromptLog::new(&paths.prompt_log_path),
            _temp: temp,
            paths,
            config,
            sandbox,
        })
    }

    /// Project whose session already holds an objective.
    pub fn new(objective: &str, expected_result: &str) -> Result<Self> {
        let project = Self::empty()?;
        project.store.set_objective(objective, expected_result)?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn context<'a, M: Model, D: DependencyResolver>(
        &'a self,
        model: &'a M,
        resolver: &'a D,
    ) -> LoopContext<'a, JsonFileStore, M, D> {
        LoopContext::new(
            &self.config,
            &self.sandbox,
            &self.store,
            model,
            &self.prompt_log,
            resolver,
        )
    }

    pub fn write_entry_point(&self, code: &str) -> Result<()> {
        self.sandbox.ensure_dir()?;
        fs::write(self.sandbox.entry_point_path(), code)?;
        Ok(())
    }

    /// Write a file at `name`, relative to the sandbox directory.
    pub fn write_file(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.sandbox.dir().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn sync_known_files(&self) -> Result<()> {
        sync_known_files(&self.store, &self.sandbox)
    }

    pub fn session(&self) -> Session {
        self.store.load().expect("load session")
    }
}

/// Model that replays canned replies in order. `Err` entries simulate
/// transport failures.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.borrow().clone()
    }

    pub fn assert_drained(&self) {
        let left = self.replies.borrow().len();
        assert_eq!(left, 0, "{left} scripted replies were never requested");
    }
}

impl Model for ScriptedModel {
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted model ran out of replies")),
        }
    }
}

/// Interactor with a fixed objective and a queue of yes/no answers.
pub struct ScriptedInteractor {
    objective: Option<(String, String)>,
    answers: RefCell<VecDeque<bool>>,
    questions: RefCell<Vec<String>>,
}

impl ScriptedInteractor {
    pub fn new(objective: Option<(&str, &str)>, answers: Vec<bool>) -> Self {
        Self {
            objective: objective.map(|(o, e)| (o.to_string(), e.to_string())),
            answers: RefCell::new(answers.into()),
            questions: RefCell::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }
}

impl Interactor for ScriptedInteractor {
    fn ask_objective(&self) -> Result<(String, String)> {
        self.objective
            .clone()
            .ok_or_else(|| anyhow!("unexpected objective prompt"))
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        self.questions.borrow_mut().push(question.to_string());
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected question: {question}"))
    }
}

/// Resolver that records every package set it is asked about.
#[derive(Default)]
pub struct RecordingResolver {
    calls: RefCell<Vec<BTreeSet<String>>>,
}

impl RecordingResolver {
    pub fn calls(&self) -> Vec<BTreeSet<String>> {
        self.calls.borrow().clone()
    }
}

impl DependencyResolver for RecordingResolver {
    fn resolve(&self, packages: &BTreeSet<String>) -> Result<()> {
        self.calls.borrow_mut().push(packages.clone());
        Ok(())
    }
}

/// Serialized `{file, action, functionality}` reply.
pub fn decision_json(file: &str, action: &str, functionality: &str) -> String {
    serde_json::json!({
        "file": file,
        "action": action,
        "functionality": functionality,
    })
    .to_string()
}
