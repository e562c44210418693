//! Refiner configuration stored under `.refiner/config.toml`.

use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Minimal entry point written on first bootstrap.
pub const DEFAULT_ENTRY_POINT_SOURCE: &str = r#"def main():
    print("Hello from dynamic_main.py")


if __name__ == "__main__":
    main()
"#;

/// Refiner configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// the defaults below, which target a Python sandbox at `dynamic/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefinerConfig {
    /// Sandbox directory, relative to the project root.
    pub sandbox_dir: String,

    /// Entry-point file name inside the sandbox.
    pub entry_point: String,

    /// Language name used in prompts.
    pub language: String,

    /// Command prefix used to execute the entry point (e.g. `["python"]`).
    pub interpreter: Vec<String>,

    /// Wall-clock limit for a single entry-point execution.
    pub run_timeout_secs: u64,

    /// Truncate captured entry-point stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Maximum SELECT/APPLY cycles per `run`. `0` disables the cap.
    pub max_iterations: u32,

    /// Total wall-clock budget per `run` in seconds. `0` disables the budget.
    pub max_wall_clock_secs: u64,

    pub model: ModelConfig,

    pub dependencies: DependencyConfig,

    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command that reads a prompt on stdin and answers on stdout.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    /// Prompts are trimmed to, and refused above, this many bytes.
    pub prompt_budget_bytes: usize,

    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DependencyConfig {
    /// Check imports in generated code and offer to install missing packages.
    pub enabled: bool,

    /// Probe command; `import <name>` is appended as the final argument.
    pub check_command: Vec<String>,

    /// Install command; the package name is appended as the final argument.
    pub install_command: Vec<String>,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Ask the model for a multi-file outline on first bootstrap.
    pub outline: bool,

    /// Contents of the entry point when none exists yet.
    pub entry_point_source: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 10 * 60,
            prompt_budget_bytes: 32_000,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_command: vec!["python".to_string(), "-c".to_string()],
            install_command: vec!["pip".to_string(), "install".to_string()],
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            outline: false,
            entry_point_source: DEFAULT_ENTRY_POINT_SOURCE.to_string(),
        }
    }
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            sandbox_dir: "dynamic".to_string(),
            entry_point: "dynamic_main.py".to_string(),
            language: "Python".to_string(),
            interpreter: vec!["python".to_string()],
            run_timeout_secs: 60,
            output_limit_bytes: 100_000,
            max_iterations: 25,
            max_wall_clock_secs: 0,
            model: ModelConfig::default(),
            dependencies: DependencyConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl RefinerConfig {
    pub fn validate(&self) -> Result<()> {
        validate_relative("sandbox_dir", &self.sandbox_dir)?;
        validate_relative("entry_point", &self.entry_point)?;
        if Path::new(&self.entry_point).components().count() != 1 {
            return Err(anyhow!("entry_point must be a bare file name"));
        }
        if !has_program(&self.interpreter) {
            return Err(anyhow!("interpreter must be a non-empty array"));
        }
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("run_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if !has_program(&self.model.command) {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.prompt_budget_bytes == 0 {
            return Err(anyhow!("model.prompt_budget_bytes must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.dependencies.enabled {
            if !has_program(&self.dependencies.check_command) {
                return Err(anyhow!(
                    "dependencies.check_command must be a non-empty array"
                ));
            }
            if !has_program(&self.dependencies.install_command) {
                return Err(anyhow!(
                    "dependencies.install_command must be a non-empty array"
                ));
            }
            if self.dependencies.timeout_secs == 0 {
                return Err(anyhow!("dependencies.timeout_secs must be > 0"));
            }
        }
        Ok(())
    }
}

fn has_program(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

fn validate_relative(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{field} must not be empty"));
    }
    let path = Path::new(value);
    if path.is_absolute() {
        return Err(anyhow!("{field} must be relative (got '{value}')"));
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(anyhow!(
            "{field} must not contain '.', '..', or prefixes (got '{value}')"
        ));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RefinerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RefinerConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = RefinerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RefinerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RefinerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
