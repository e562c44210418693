//! Reasoning-model abstraction.
//!
//! The [`Model`] trait decouples the loop from the actual backend (by default
//! a command such as `codex exec -` that reads a prompt on stdin). Tests use
//! scripted models that return predetermined replies without spawning
//! processes. [`ModelClient`] wraps a model with the prompt budget and the
//! prompt audit log.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ModelConfig;
use crate::io::process::{command_from_parts, run_command_with_timeout};
use crate::io::prompt_log::PromptLog;

/// Shape of reply the model is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Raw source for a single file.
    Code,
    /// A single JSON object.
    Json,
}

impl ResponseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseKind::Code => "code",
            ResponseKind::Json => "json",
        }
    }

    fn preamble(self) -> &'static str {
        match self {
            ResponseKind::Code => CODE_PREAMBLE,
            ResponseKind::Json => JSON_PREAMBLE,
        }
    }
}

const CODE_PREAMBLE: &str = "You are a code generator. Reply with the complete source of one file and nothing else: no explanations, no markdown.";
const JSON_PREAMBLE: &str = "You are a planning assistant. Reply with exactly one JSON object and nothing else: no explanations, no markdown.";

/// Parameters for a model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub kind: ResponseKind,
    pub prompt: String,
    pub timeout: Duration,
}

/// Abstraction over reasoning-model backends.
pub trait Model {
    /// Return the raw reply text. Transport failures are errors; reply shape
    /// is checked by the caller.
    fn complete(&self, request: &ModelRequest) -> Result<String>;
}

/// Model that spawns a configured command and reads its stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            command: config.command.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl Model for CommandModel {
    #[instrument(skip_all, fields(kind = request.kind.as_str(), timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        info!(program = ?self.command.first(), "invoking model");
        let cmd = command_from_parts(&self.command)?;
        let input = format!("{}\n\n{}", request.kind.preamble(), request.prompt);
        let output = run_command_with_timeout(
            cmd,
            Some(input.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "model timed out");
            return Err(anyhow!("model timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "model reply exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        debug!(bytes = output.stdout.len(), "model replied");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Model handle used by the loop: budget check, audit log, then the model.
pub struct ModelClient<'a, M: Model> {
    model: &'a M,
    log: &'a PromptLog,
    config: &'a ModelConfig,
}

impl<'a, M: Model> ModelClient<'a, M> {
    pub fn new(model: &'a M, log: &'a PromptLog, config: &'a ModelConfig) -> Self {
        Self { model, log, config }
    }

    /// Send `prompt` and return the raw reply.
    ///
    /// Prompts over `prompt_budget_bytes` are refused before anything is sent.
    /// A failure to write the audit log is logged and does not block the call.
    pub fn ask(&self, prompt: &str, kind: ResponseKind) -> Result<String> {
        if prompt.len() > self.config.prompt_budget_bytes {
            return Err(anyhow!(
                "prompt of {} bytes exceeds budget of {} bytes",
                prompt.len(),
                self.config.prompt_budget_bytes
            ));
        }
        if let Err(err) = self.log.append(kind, prompt) {
            warn!(err = %err, "failed to append prompt log");
        }
        let request = ModelRequest {
            kind,
            prompt: prompt.to_string(),
            timeout: Duration::from_secs(self.config.timeout_secs),
        };
        self.model.complete(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    struct EchoModel {
        seen: RefCell<Vec<ModelRequest>>,
    }

    impl Model for EchoModel {
        fn complete(&self, request: &ModelRequest) -> Result<String> {
            self.seen.borrow_mut().push(request.clone());
            Ok(request.prompt.clone())
        }
    }

    fn sh_config(script: &str) -> ModelConfig {
        ModelConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs: 10,
            ..ModelConfig::default()
        }
    }

    /// Verifies the client logs the prompt and forwards kind and timeout.
    #[test]
    fn client_logs_and_forwards_request() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = PromptLog::new(temp.path().join("prompt.log"));
        let config = ModelConfig::default();
        let model = EchoModel {
            seen: RefCell::new(Vec::new()),
        };

        let reply = ModelClient::new(&model, &log, &config)
            .ask("hello", ResponseKind::Json)
            .expect("ask");
        assert_eq!(reply, "hello");

        let seen = model.seen.borrow();
        assert_eq!(seen[0].kind, ResponseKind::Json);
        assert_eq!(seen[0].timeout, Duration::from_secs(config.timeout_secs));
        let logged = fs::read_to_string(log.path()).expect("read");
        assert!(logged.contains("hello"));
    }

    /// Verifies over-budget prompts never reach the model.
    #[test]
    fn client_refuses_prompt_over_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = PromptLog::new(temp.path().join("prompt.log"));
        let config = ModelConfig {
            prompt_budget_bytes: 4,
            ..ModelConfig::default()
        };
        let model = EchoModel {
            seen: RefCell::new(Vec::new()),
        };

        let err = ModelClient::new(&model, &log, &config)
            .ask("too long", ResponseKind::Code)
            .unwrap_err();
        assert!(err.to_string().contains("exceeds budget"));
        assert!(model.seen.borrow().is_empty());
        assert!(!log.path().exists());
    }

    #[test]
    fn command_model_returns_stdout() {
        let config = sh_config("cat >/dev/null; echo '{\"ok\": true}'");
        let reply = CommandModel::from_config(&config)
            .complete(&ModelRequest {
                kind: ResponseKind::Json,
                prompt: "prompt".to_string(),
                timeout: Duration::from_secs(10),
            })
            .expect("complete");
        assert_eq!(reply.trim(), "{\"ok\": true}");
    }

    #[test]
    fn command_model_receives_preamble_and_prompt() {
        let config = sh_config("cat");
        let reply = CommandModel::from_config(&config)
            .complete(&ModelRequest {
                kind: ResponseKind::Code,
                prompt: "write it".to_string(),
                timeout: Duration::from_secs(10),
            })
            .expect("complete");
        assert!(reply.starts_with(CODE_PREAMBLE));
        assert!(reply.ends_with("write it"));
    }

    #[test]
    fn command_model_failure_is_an_error() {
        let config = sh_config("cat >/dev/null; echo nope >&2; exit 1");
        let err = CommandModel::from_config(&config)
            .complete(&ModelRequest {
                kind: ResponseKind::Json,
                prompt: "prompt".to_string(),
                timeout: Duration::from_secs(10),
            })
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
