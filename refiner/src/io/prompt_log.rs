//! Append-only audit log of prompts sent to the model.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::model::ResponseKind;
use super::session_store::now_timestamp;

#[derive(Debug, Clone)]
pub struct PromptLog {
    path: PathBuf,
}

impl PromptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one prompt with a timestamped header.
    pub fn append(&self, kind: ResponseKind, prompt: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open prompt log {}", self.path.display()))?;
        let entry = format!(
            "=== {} ({}) ===\n{}\n\n",
            now_timestamp(),
            kind.as_str(),
            prompt.trim_end()
        );
        file.write_all(entry.as_bytes())
            .with_context(|| format!("append prompt log {}", self.path.display()))
    }
}
