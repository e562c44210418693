//! Mutation applier: carry out one create/edit/delete inside the sandbox.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::context::LoopContext;
use crate::core::imports::{external_only, scan_imports};
use crate::core::response::parse_code;
use crate::core::types::{Action, ChangeEntry, Feedback, FileActionDecision};
use crate::io::dependencies::DependencyResolver;
use crate::io::model::{Model, ResponseKind};
use crate::io::prompt::PromptContext;
use crate::io::session_store::{SessionStore, now_timestamp};
use crate::io::workspace::Sandbox;

/// Apply `decision` and record it in the change log.
///
/// The target path is checked against the sandbox before anything else; an
/// escape fails with a [`SandboxViolation`](crate::core::sandbox::SandboxViolation)
/// that callers recover with `downcast_ref`. Returns `Ok(false)` when the
/// model could not produce usable content or the sandbox file could not be
/// read, written, or removed; nothing is logged to the change log then.
#[instrument(skip_all, fields(file = %decision.file, action = %decision.action))]
pub fn apply<S: SessionStore, M: Model, D: DependencyResolver>(
    ctx: &LoopContext<'_, S, M, D>,
    decision: &FileActionDecision,
    feedback: &Feedback,
) -> Result<bool> {
    let path = ctx.sandbox.resolve(&decision.file).map_err(anyhow::Error::new)?;
    let file_path = ctx.sandbox.relative(&path);

    let code = match decision.action {
        Action::Delete => {
            let removed = match ctx.sandbox.delete(&path) {
                Ok(removed) => removed,
                Err(err) => {
                    warn!(file = %file_path, err = %format!("{err:#}"), "delete failed, skipping");
                    return Ok(false);
                }
            };
            info!(file = %file_path, removed, "deleted file");
            None
        }
        Action::Create | Action::Edit => {
            let Some(code) = generate_code(ctx, decision, feedback, &path)? else {
                return Ok(false);
            };
            resolve_dependencies(ctx, &code);
            if let Err(err) = ctx.sandbox.write(&path, &code) {
                warn!(file = %file_path, err = %format!("{err:#}"), "write failed, skipping");
                return Ok(false);
            }
            info!(file = %file_path, bytes = code.len(), "wrote file");
            Some(code)
        }
    };

    sync_known_files(ctx.store, ctx.sandbox)?;
    ctx.store
        .append_change(ChangeEntry {
            action: decision.action,
            code,
            file_path,
            functionality: decision.functionality.clone(),
            timestamp: now_timestamp(),
        })
        .context("append change entry")?;
    Ok(true)
}

/// Ask the model for the file contents. `None` when the current contents
/// cannot be read, the model fails, or the reply is unusable.
fn generate_code<S: SessionStore, M: Model, D: DependencyResolver>(
    ctx: &LoopContext<'_, S, M, D>,
    decision: &FileActionDecision,
    feedback: &Feedback,
    path: &std::path::Path,
) -> Result<Option<String>> {
    let session = ctx.store.load()?;
    let prompt_ctx = PromptContext {
        feedback,
        files: &session.known_files,
        last_change: session.latest_change(),
    };
    let current = match decision.action {
        Action::Edit => match ctx.sandbox.read(path) {
            Ok(current) => current,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not read current contents, skipping");
                return Ok(None);
            }
        },
        Action::Create | Action::Delete => None,
    };
    let prompt = match &current {
        Some(current) => ctx.prompts.build_edit(&prompt_ctx, decision, current)?,
        None => ctx.prompts.build_create(&prompt_ctx, decision)?,
    };

    let raw = match ctx.model.ask(&prompt, ResponseKind::Code) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "code generation failed, skipping");
            return Ok(None);
        }
    };
    match parse_code(&raw) {
        Ok(response) => Ok(Some(response.code)),
        Err(err) => {
            warn!(err = %err, "unusable code reply, skipping");
            Ok(None)
        }
    }
}

pub(crate) fn resolve_dependencies<S: SessionStore, M: Model, D: DependencyResolver>(
    ctx: &LoopContext<'_, S, M, D>,
    code: &str,
) {
    let local = match ctx.sandbox.local_modules() {
        Ok(local) => local,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "could not list local modules");
            Default::default()
        }
    };
    let packages = external_only(scan_imports(code), &local);
    if packages.is_empty() {
        return;
    }
    if let Err(err) = ctx.resolver.resolve(&packages) {
        warn!(err = %format!("{err:#}"), ?packages, "dependency resolution failed");
    }
}

/// Refresh the session's file listing from disk.
pub fn sync_known_files<S: SessionStore>(store: &S, sandbox: &Sandbox) -> Result<()> {
    let files = sandbox.list_files()?;
    store.sync_known_files(files)
}
