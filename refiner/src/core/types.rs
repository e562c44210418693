//! Shared types for the session record and loop decisions.
//!
//! These types define the persisted contract (`.refiner/session.json`) and the
//! values passed between the selector, applier, and evaluator. Field order on
//! the persisted structs is alphabetical by JSON key so the serialized session
//! stays stable across rewrites.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mutation kind chosen for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Edit,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = UnknownActionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(Action::Create),
            "edit" => Ok(Action::Edit),
            "delete" => Ok(Action::Delete),
            other => Err(UnknownActionError {
                value: other.to_string(),
            }),
        }
    }
}

/// An action string outside `{create, edit, delete}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownActionError {
    pub value: String,
}

impl fmt::Display for UnknownActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown action '{}' (expected create, edit, or delete)",
            self.value
        )
    }
}

impl std::error::Error for UnknownActionError {}

/// Classification of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTest {
    /// Clean exit and trimmed stdout equals the trimmed expected result.
    ObjectiveMet,
    /// Clean exit but stdout differs from the expected result.
    ObjectiveNotMet,
    /// No entry point, non-zero exit, timeout, or an evaluator fault.
    ObjectiveNotMetError,
}

impl RunTest {
    pub fn as_str(self) -> &'static str {
        match self {
            RunTest::ObjectiveMet => "objective_met",
            RunTest::ObjectiveNotMet => "objective_not_met",
            RunTest::ObjectiveNotMetError => "objective_not_met_error",
        }
    }
}

/// One file mutation in the change log. Never modified after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub action: Action,
    /// Written content; `None` for deletes.
    pub code: Option<String>,
    /// Path relative to the project root, `/`-separated.
    pub file_path: String,
    /// Free-text intent behind the change.
    pub functionality: String,
    pub timestamp: String,
}

/// One evaluation attempt in the run log. Never modified after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    pub error: Option<String>,
    pub result: Option<String>,
    pub test: RunTest,
    pub timestamp: String,
}

/// Persisted session record.
///
/// `known_files` mirrors the sandbox listing at the last sync; it is a cache and
/// never consulted as the source of truth for what exists on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub change_log: Vec<ChangeEntry>,
    #[serde(rename = "code_files")]
    pub known_files: BTreeSet<String>,
    #[serde(rename = "last_known_expected_result")]
    pub expected_result: String,
    #[serde(rename = "last_known_objective")]
    pub objective: String,
    pub run_log: Vec<RunEntry>,
}

impl Session {
    pub fn has_objective(&self) -> bool {
        !self.objective.trim().is_empty()
    }

    pub fn latest_change(&self) -> Option<&ChangeEntry> {
        self.change_log.last()
    }

    pub fn latest_run(&self) -> Option<&RunEntry> {
        self.run_log.last()
    }
}

/// Outcome of one evaluation: `(met, result, error)` plus its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub test: RunTest,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Evaluation {
    pub fn met(&self) -> bool {
        self.test == RunTest::ObjectiveMet
    }

    /// Build the run-log record for this evaluation.
    pub fn to_entry(&self, timestamp: String) -> RunEntry {
        RunEntry {
            error: self.error.clone(),
            result: self.result.clone(),
            test: self.test,
            timestamp,
        }
    }
}

/// Validated `{file, action, functionality}` reply from the reasoning model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileActionDecision {
    pub file: String,
    pub action: Action,
    pub functionality: String,
}

/// What the model is told about the goal and the previous evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feedback {
    pub objective: String,
    pub expected_result: String,
    pub last_result: Option<String>,
    pub last_error: Option<String>,
}

impl Feedback {
    pub fn new(objective: &str, expected_result: &str) -> Self {
        Self {
            objective: objective.to_string(),
            expected_result: expected_result.to_string(),
            last_result: None,
            last_error: None,
        }
    }

    /// Carry the latest evaluation forward into the next prompt.
    pub fn record(&mut self, evaluation: &Evaluation) {
        self.last_result = evaluation.result.clone();
        self.last_error = evaluation.error.clone();
    }
}
