//! Action selection: ask the model which single file to change next.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::context::LoopContext;
use crate::core::response::parse_decision;
use crate::core::types::{Feedback, FileActionDecision};
use crate::io::dependencies::DependencyResolver;
use crate::io::model::{Model, ResponseKind};
use crate::io::prompt::{EntryPointView, PromptContext};
use crate::io::session_store::SessionStore;

/// Result of one selection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Decision(FileActionDecision),
    /// The model could not be reached or its reply was unusable.
    NoDecision { reason: String },
}

/// Build the decision context from the session and sandbox, ask the model,
/// and validate the reply.
///
/// Model and format failures are recoverable and come back as
/// [`Selection::NoDecision`]. Errors are reserved for the local side (store,
/// sandbox reads, template rendering).
#[instrument(skip_all)]
pub fn select_action<S: SessionStore, M: Model, D: DependencyResolver>(
    ctx: &LoopContext<'_, S, M, D>,
    feedback: &Feedback,
) -> Result<Selection> {
    let session = ctx.store.load()?;
    let entry_point = EntryPointView {
        path: ctx.sandbox.entry_point_display(),
        code: ctx.sandbox.read_entry_point()?,
    };
    let prompt = ctx.prompts.build_selection(
        &PromptContext {
            feedback,
            files: &session.known_files,
            last_change: session.latest_change(),
        },
        &entry_point,
    )?;

    let raw = match ctx.model.ask(&prompt, ResponseKind::Json) {
        Ok(raw) => raw,
        Err(err) => {
            let reason = format!("model request failed: {err:#}");
            warn!(%reason, "no decision");
            return Ok(Selection::NoDecision { reason });
        }
    };

    match parse_decision(&raw) {
        Ok(decision) => {
            info!(
                file = %decision.file,
                action = %decision.action,
                functionality = %decision.functionality,
                "model selected action"
            );
            Ok(Selection::Decision(decision))
        }
        Err(err) => {
            warn!(err = %err, "no decision");
            Ok(Selection::NoDecision {
                reason: err.to_string(),
            })
        }
    }
}
