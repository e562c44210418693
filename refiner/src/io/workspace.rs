//! Sandbox directory on disk.
//!
//! All file mutations chosen by the model go through [`Sandbox::resolve`],
//! which applies the lexical containment check from `core::sandbox` and then
//! canonicalizes the deepest existing ancestor so a symlink inside the sandbox
//! cannot redirect a write elsewhere.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::core::sandbox::{
    SandboxViolation, display_relative, is_strict_descendant, normalize_lexically, resolve_within,
};
use crate::io::config::RefinerConfig;

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    dir: PathBuf,
    entry_point: PathBuf,
}

impl Sandbox {
    /// Sandbox rooted at `root/<sandbox_dir>`.
    ///
    /// `root` is made absolute (without resolving symlinks) so containment
    /// checks compare like with like.
    pub fn new(root: &Path, config: &RefinerConfig) -> Result<Self> {
        let root = std::path::absolute(root)
            .with_context(|| format!("resolve project root {}", root.display()))?;
        let root = normalize_lexically(&root).unwrap_or(root);
        let dir = root.join(&config.sandbox_dir);
        let entry_point = dir.join(&config.entry_point);
        Ok(Self {
            root,
            dir,
            entry_point,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_point_path(&self) -> &Path {
        &self.entry_point
    }

    /// Entry point relative to the project root, e.g. `dynamic/dynamic_main.py`.
    pub fn entry_point_display(&self) -> String {
        self.relative(&self.entry_point)
    }

    /// Sandbox directory relative to the project root.
    pub fn dir_display(&self) -> String {
        self.relative(&self.dir)
    }

    pub fn relative(&self, path: &Path) -> String {
        display_relative(&self.root, path)
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create sandbox {}", self.dir.display()))
    }

    /// Resolve a model-chosen path to an absolute path strictly inside the sandbox.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf, SandboxViolation> {
        let resolved = resolve_within(&self.root, &self.dir, candidate)?;
        if !self.stays_inside_on_disk(&resolved) {
            return Err(SandboxViolation {
                path: candidate.to_string(),
                sandbox: self.dir_display(),
            });
        }
        Ok(resolved)
    }

    /// Canonicalize the deepest existing ancestor of `path` and require it to
    /// stay under the canonical sandbox.
    fn stays_inside_on_disk(&self, path: &Path) -> bool {
        let Ok(sandbox_real) = self.dir.canonicalize() else {
            // No sandbox on disk yet: nothing below it can be a symlink.
            return true;
        };
        let mut ancestor = path;
        loop {
            if fs::symlink_metadata(ancestor).is_ok() {
                break;
            }
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => return true,
            }
        }
        let Ok(real) = ancestor.canonicalize() else {
            return false;
        };
        (real == sandbox_real && ancestor != path) || is_strict_descendant(&real, &sandbox_real)
    }

    /// Every regular file below the sandbox, relative to the project root.
    pub fn list_files(&self) -> Result<BTreeSet<String>> {
        let mut files = BTreeSet::new();
        if !self.dir.exists() {
            return Ok(files);
        }
        for entry in WalkDir::new(&self.dir).follow_links(false) {
            let entry =
                entry.with_context(|| format!("walk sandbox {}", self.dir.display()))?;
            if entry.file_type().is_file() {
                files.insert(self.relative(entry.path()));
            }
        }
        Ok(files)
    }

    /// Names importable from the sandbox: `.py` file stems and directory names.
    pub fn local_modules(&self) -> Result<BTreeSet<String>> {
        let mut modules = BTreeSet::new();
        if !self.dir.exists() {
            return Ok(modules);
        }
        for entry in WalkDir::new(&self.dir).follow_links(false) {
            let entry =
                entry.with_context(|| format!("walk sandbox {}", self.dir.display()))?;
            if entry.depth() == 0 {
                continue;
            }
            let path = entry.path();
            let name = if entry.file_type().is_dir() {
                path.file_name()
            } else if path.extension().is_some_and(|ext| ext == "py") {
                path.file_stem()
            } else {
                None
            };
            if let Some(name) = name {
                modules.insert(name.to_string_lossy().into_owned());
            }
        }
        Ok(modules)
    }

    /// Entry-point source, or `None` when it is missing or blank.
    pub fn read_entry_point(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.entry_point) {
            Ok(code) if code.trim().is_empty() => Ok(None),
            Ok(code) => Ok(Some(code)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("read entry point {}", self.entry_point.display())),
        }
    }

    pub fn read(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Write a resolved path, creating parent directories.
    pub fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %self.relative(path), bytes = contents.len(), "wrote sandbox file");
        Ok(())
    }

    /// Remove a resolved path. Returns whether a file was removed.
    pub fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %self.relative(path), "deleted sandbox file");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("delete {}", path.display())),
        }
    }

    /// Write `source` as the entry point unless one already exists.
    pub fn bootstrap_entry_point(&self, source: &str) -> Result<bool> {
        self.ensure_dir()?;
        if self.read_entry_point()?.is_some() {
            return Ok(false);
        }
        self.write(&self.entry_point, source)?;
        info!(entry_point = %self.entry_point_display(), "bootstrapped entry point");
        Ok(true)
    }

    /// Delete the sandbox directory and everything in it.
    pub fn remove_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                info!(sandbox = %self.dir_display(), "removed sandbox");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove sandbox {}", self.dir.display())),
        }
    }
}
