//! Prompt builder for model requests.
//!
//! Templates mark each section with `<!-- section:KEY required|droppable -->`.
//! After rendering, droppable sections are removed in a fixed order until the
//! prompt fits the byte budget; if it still does not fit, the largest
//! remaining section is truncated.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::response::Outline;
use crate::core::types::{ChangeEntry, Feedback, FileActionDecision};

const SELECT_TEMPLATE: &str = include_str!("prompts/select.md");
const CREATE_TEMPLATE: &str = include_str!("prompts/create.md");
const EDIT_TEMPLATE: &str = include_str!("prompts/edit.md");
const OUTLINE_TEMPLATE: &str = include_str!("prompts/outline.md");
const OUTLINE_FILE_TEMPLATE: &str = include_str!("prompts/outline_file.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 5] = ["files", "outline", "last_change", "result", "error"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in [
        ("select", SELECT_TEMPLATE),
        ("create", CREATE_TEMPLATE),
        ("edit", EDIT_TEMPLATE),
        ("outline", OUTLINE_TEMPLATE),
        ("outline_file", OUTLINE_FILE_TEMPLATE),
    ] {
        env.add_template(name, source)
            .expect("prompt template should be valid");
    }
    env
});

/// What the model sees of the project on every decision and code request.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub feedback: &'a Feedback,
    /// Sandbox listing, relative to the project root.
    pub files: &'a BTreeSet<String>,
    /// Most recent change, presented as already implemented.
    pub last_change: Option<&'a ChangeEntry>,
}

/// Entry point as shown to the selector.
#[derive(Debug, Clone, Serialize)]
pub struct EntryPointView {
    pub path: String,
    /// `None` when the file is missing or blank.
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LastChangeView {
    action: String,
    file_path: String,
    functionality: String,
}

impl LastChangeView {
    fn from_entry(entry: &ChangeEntry) -> Self {
        Self {
            action: entry.action.as_str().to_string(),
            file_path: entry.file_path.clone(),
            functionality: entry.functionality.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn rendered_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * 2;
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if rendered_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if rendered_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = rendered_len(sections);
    if total <= budget {
        return;
    }
    let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let excess = total - budget;
    let before_len = largest.content.len();
    let keep = before_len.saturating_sub(excess);
    if keep > TRUNCATION_MARKER.len() {
        truncate_at_char_boundary(&mut largest.content, keep - TRUNCATION_MARKER.len());
        largest.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_char_boundary(&mut largest.content, keep);
    }
    debug!(
        section = largest.key,
        before_len,
        after_len = largest.content.len(),
        "truncated section for budget"
    );

    let fitted = rendered_len(sections);
    if fitted > budget {
        warn!(budget, fitted, "prompt still over budget after truncation");
    }
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
    language: String,
    sandbox: String,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize, language: &str, sandbox: &str) -> Self {
        Self {
            budget_bytes,
            language: language.to_string(),
            sandbox: sandbox.to_string(),
        }
    }

    /// Prompt for the next `{file, action, functionality}` decision.
    pub fn build_selection(&self, ctx: &PromptContext<'_>, entry_point: &EntryPointView) -> Result<String> {
        let rendered = ENGINE.get_template("select")?.render(context! {
            language => self.language,
            sandbox => self.sandbox,
            objective => ctx.feedback.objective.trim(),
            expected_result => ctx.feedback.expected_result.trim(),
            entry_point => entry_point,
            error => non_blank(ctx.feedback.last_error.as_deref()),
            result => non_blank(ctx.feedback.last_result.as_deref()),
            last_change => ctx.last_change.map(LastChangeView::from_entry),
            files => ctx.files,
        })?;
        Ok(self.fit(&rendered))
    }

    /// Prompt for the full contents of a new file.
    pub fn build_create(&self, ctx: &PromptContext<'_>, decision: &FileActionDecision) -> Result<String> {
        let rendered = ENGINE.get_template("create")?.render(context! {
            language => self.language,
            task => decision,
            objective => ctx.feedback.objective.trim(),
            expected_result => ctx.feedback.expected_result.trim(),
            error => non_blank(ctx.feedback.last_error.as_deref()),
            result => non_blank(ctx.feedback.last_result.as_deref()),
            last_change => ctx.last_change.map(LastChangeView::from_entry),
            files => ctx.files,
        })?;
        Ok(self.fit(&rendered))
    }

    /// Prompt for the replacement contents of an existing file.
    pub fn build_edit(
        &self,
        ctx: &PromptContext<'_>,
        decision: &FileActionDecision,
        current: &str,
    ) -> Result<String> {
        let rendered = ENGINE.get_template("edit")?.render(context! {
            language => self.language,
            task => decision,
            objective => ctx.feedback.objective.trim(),
            expected_result => ctx.feedback.expected_result.trim(),
            error => non_blank(ctx.feedback.last_error.as_deref()),
            result => non_blank(ctx.feedback.last_result.as_deref()),
            last_change => ctx.last_change.map(LastChangeView::from_entry),
            files => ctx.files,
            current => current.trim_end(),
        })?;
        Ok(self.fit(&rendered))
    }

    /// Prompt for a `{file name: functionality}` outline.
    pub fn build_outline(&self, feedback: &Feedback, entry_point: &str) -> Result<String> {
        let rendered = ENGINE.get_template("outline")?.render(context! {
            language => self.language,
            entry_point => entry_point,
            objective => feedback.objective.trim(),
            expected_result => feedback.expected_result.trim(),
        })?;
        Ok(self.fit(&rendered))
    }

    /// Prompt for one outlined file as `{"code": ...}`.
    pub fn build_outline_file(
        &self,
        feedback: &Feedback,
        outline: &Outline,
        file: &str,
        functionality: &str,
    ) -> Result<String> {
        let rendered = ENGINE.get_template("outline_file")?.render(context! {
            language => self.language,
            file => file,
            functionality => functionality.trim(),
            objective => feedback.objective.trim(),
            expected_result => feedback.expected_result.trim(),
            outline => outline.files,
        })?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}
