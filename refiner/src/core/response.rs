//! Boundary parsing for raw model replies.
//!
//! The reasoning model returns free text. Each reply kind is parsed into a typed
//! value here, and anything that does not fit is a [`FormatError`]: the caller
//! logs it and skips the operation without touching session state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use jsonschema::{Validator, validator_for};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::types::FileActionDecision;

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

static DECISION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(DECISION_SCHEMA).expect("decision schema should be valid json");
    validator_for(&schema).expect("decision schema should compile")
});

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap()
});

/// A model reply that does not match the expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError {
    pub message: String,
}

impl FormatError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed model response: {}", self.message)
    }
}

impl std::error::Error for FormatError {}

/// Source text for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeResponse {
    pub code: String,
}

/// Planned files for an outline bootstrap, keyed by file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outline {
    pub files: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct GeneratedFile {
    code: String,
}

/// Parse a `code` reply: raw source, optionally wrapped in a markdown fence.
pub fn parse_code(raw: &str) -> Result<CodeResponse, FormatError> {
    let code = strip_fences(raw);
    if code.trim().is_empty() {
        return Err(FormatError::new("empty code response"));
    }
    let mut code = code.to_string();
    if !code.ends_with('\n') {
        code.push('\n');
    }
    Ok(CodeResponse { code })
}

/// Parse and validate a `{file, action, functionality}` decision.
pub fn parse_decision(raw: &str) -> Result<FileActionDecision, FormatError> {
    let value = parse_json_object(raw)?;
    if !DECISION_VALIDATOR.is_valid(&value) {
        let messages = DECISION_VALIDATOR
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(FormatError::new(format!(
            "decision failed validation: {}",
            messages.join("; ")
        )));
    }
    serde_json::from_value(value).map_err(|err| FormatError::new(format!("decision: {err}")))
}

/// Parse an outline reply: a JSON object mapping file names to functionality.
pub fn parse_outline(raw: &str) -> Result<Outline, FormatError> {
    let value = parse_json_object(raw)?;
    let files: BTreeMap<String, String> = serde_json::from_value(value)
        .map_err(|err| FormatError::new(format!("outline: {err}")))?;
    if files.is_empty() {
        return Err(FormatError::new("outline lists no files"));
    }
    Ok(Outline { files })
}

/// Parse a `{"code": "..."}` reply used by the outline bootstrap.
pub fn parse_generated_file(raw: &str) -> Result<CodeResponse, FormatError> {
    let value = parse_json_object(raw)?;
    let file: GeneratedFile = serde_json::from_value(value)
        .map_err(|err| FormatError::new(format!("generated file: {err}")))?;
    parse_code(&file.code)
}

fn parse_json_object(raw: &str) -> Result<Value, FormatError> {
    let body = strip_fences(raw);
    let value: Value = serde_json::from_str(body.trim())
        .map_err(|err| FormatError::new(format!("invalid json: {err}")))?;
    if !value.is_object() {
        return Err(FormatError::new("expected a json object"));
    }
    Ok(value)
}

/// Remove a single surrounding markdown code fence, if present.
pub fn strip_fences(raw: &str) -> &str {
    match FENCE_RE.captures(raw).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Action;

    #[test]
    fn decision_parses_valid_object() {
        let raw = r#"{"file": "dynamic/dynamic_main.py", "action": "edit", "functionality": "fix the sum"}"#;
        let decision = parse_decision(raw).expect("decision");
        assert_eq!(decision.file, "dynamic/dynamic_main.py");
        assert_eq!(decision.action, Action::Edit);
        assert_eq!(decision.functionality, "fix the sum");
    }

    #[test]
    fn decision_tolerates_json_fence() {
        let raw = "```json\n{\"file\": \"dynamic/a.py\", \"action\": \"create\", \"functionality\": \"x\"}\n```";
        let decision = parse_decision(raw).expect("decision");
        assert_eq!(decision.action, Action::Create);
    }

    #[test]
    fn decision_rejects_action_outside_closed_set() {
        let raw = r#"{"file": "dynamic/a.py", "action": "rename", "functionality": "x"}"#;
        let err = parse_decision(raw).unwrap_err();
        assert!(err.message.contains("validation"), "{err}");
    }

    #[test]
    fn decision_rejects_missing_keys_and_garbage() {
        assert!(parse_decision(r#"{"file": "dynamic/a.py", "action": "edit"}"#).is_err());
        assert!(parse_decision("sure, edit the main file").is_err());
        assert!(parse_decision("[1, 2]").is_err());
    }

    #[test]
    fn code_strips_fence_and_requires_content() {
        let code = parse_code("```python\nprint(3)\n```").expect("code");
        assert_eq!(code.code, "print(3)\n");
        assert!(parse_code("   \n").is_err());
        assert!(parse_code("```\n```").is_err());
    }

    #[test]
    fn code_without_fence_is_kept_verbatim() {
        let code = parse_code("echo 3\n").expect("code");
        assert_eq!(code.code, "echo 3\n");
    }

    #[test]
    fn outline_requires_string_values() {
        let outline =
            parse_outline(r#"{"dynamic_main.py": "entry", "util.py": "helpers"}"#).expect("outline");
        assert_eq!(outline.files.len(), 2);
        assert_eq!(outline.files["util.py"], "helpers");

        assert!(parse_outline(r#"{"a.py": 3}"#).is_err());
        assert!(parse_outline("{}").is_err());
    }

    #[test]
    fn generated_file_reads_code_key() {
        let code = parse_generated_file(r#"{"code": "print(1)"}"#).expect("code");
        assert_eq!(code.code, "print(1)\n");
        assert!(parse_generated_file(r#"{"source": "print(1)"}"#).is_err());
    }
}
