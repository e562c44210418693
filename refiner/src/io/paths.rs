//! Canonical `.refiner/` locations and `refiner init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{RefinerConfig, write_config};

/// All canonical paths within `.refiner/` for a project root.
#[derive(Debug, Clone)]
pub struct RefinerPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub session_path: PathBuf,
    pub prompt_log_path: PathBuf,
}

impl RefinerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".refiner");
        Self {
            root: root.clone(),
            state_dir: state_dir.clone(),
            gitignore_path: state_dir.join(".gitignore"),
            config_path: state_dir.join("config.toml"),
            session_path: state_dir.join("session.json"),
            prompt_log_path: state_dir.join("prompt.log"),
        }
    }
}

/// Options for `init_refiner`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config.
    pub force: bool,
}

/// Create `.refiner/` with a default `config.toml`.
///
/// The session record and prompt log are created lazily on first use.
pub fn init_refiner(root: &Path, options: &InitOptions) -> Result<RefinerPaths> {
    let paths = RefinerPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "refiner init: .refiner exists but is not a directory"
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "refiner init: .refiner/config.toml already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create directory {}", paths.state_dir.display()))?;
    fs::write(&paths.gitignore_path, REFINER_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &RefinerConfig::default())?;

    info!(config = %paths.config_path.display(), "initialized .refiner");
    Ok(paths)
}

const REFINER_GITIGNORE: &str = "prompt.log\n";
