//! Lexical containment checks for sandbox paths.
//!
//! Paths chosen by the model are resolved relative to the project root and must
//! land strictly below the sandbox directory. This module only reasons about
//! path components; symlink checks against the filesystem live in
//! `io::workspace`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A selected path that does not resolve inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxViolation {
    /// Path exactly as requested.
    pub path: String,
    /// Sandbox directory the path had to stay within.
    pub sandbox: String,
}

impl fmt::Display for SandboxViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "path '{}' resolves outside sandbox '{}'",
            self.path, self.sandbox
        )
    }
}

impl std::error::Error for SandboxViolation {}

/// Resolve `candidate` against `root` and require it to be a strict descendant
/// of `sandbox_dir`.
///
/// Relative candidates are joined onto `root`; absolute candidates are taken
/// as-is. `.` and `..` are folded lexically, and a `..` that climbs past the
/// filesystem root is a violation.
pub fn resolve_within(
    root: &Path,
    sandbox_dir: &Path,
    candidate: &str,
) -> Result<PathBuf, SandboxViolation> {
    let violation = || SandboxViolation {
        path: candidate.to_string(),
        sandbox: sandbox_dir.display().to_string(),
    };

    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(violation());
    }
    let requested = Path::new(trimmed);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    let resolved = normalize_lexically(&joined).ok_or_else(violation)?;
    let sandbox = normalize_lexically(sandbox_dir).ok_or_else(violation)?;
    if is_strict_descendant(&resolved, &sandbox) {
        Ok(resolved)
    } else {
        Err(violation())
    }
}

/// True when `path` is below `ancestor` (and not equal to it).
pub fn is_strict_descendant(path: &Path, ancestor: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}

/// Fold `.` and `..` components without touching the filesystem.
///
/// Returns `None` if `..` would climb above the first component.
pub fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Render `path` relative to `root` with `/` separators.
pub fn display_relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
