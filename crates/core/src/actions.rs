//! # Action Parser
//!
//! Extracts a structured action from free-form model text. Models are asked
//! to emit JSON, but replies arrive bare, fenced, or buried in prose, so
//! extraction tries a strict priority ladder and never errors:
//!
//! 1. the whole trimmed reply, if it starts with `{`
//! 2. a fenced block explicitly tagged ```json
//! 3. any fenced block whose body starts with `{`
//! 4. the substring between the first `{` and the last `}`
//!
//! Explicit tagging is trusted over heuristic slicing; the substring scan is
//! a last resort for unstructured output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recognized instruction decoded from model output.
///
/// The closed set of action kinds, discriminated by the `action` field.
/// Unrecognized discriminants and non-object payloads decode to nothing
/// rather than partially-read maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ListDir {
        path: String,
    },
    RunCommand {
        command: String,
        #[serde(default = "default_cwd")]
        cwd: String,
    },
    /// Researcher: load a file into context for analysis
    AnalyzeFile {
        path: String,
    },
    /// Researcher: semantic search over the indexed codebase
    SearchCode {
        query: String,
    },
    /// Reviewer: pull a file into the review context
    ReviewFile {
        path: String,
    },
    /// Terminal signal; carries whatever summary fields the role emits
    Finish {
        #[serde(default)]
        summary: String,
        #[serde(default)]
        verdict: Option<String>,
        #[serde(default)]
        files_modified: Vec<String>,
    },
}

fn default_cwd() -> String {
    ".".to_string()
}

impl Action {
    /// Gateway tool name for tool-backed actions; `None` for finish and the
    /// analysis shapes the workers service directly.
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            Action::ReadFile { .. } => Some("read_file"),
            Action::WriteFile { .. } => Some("write_file"),
            Action::ListDir { .. } => Some("list_dir"),
            Action::RunCommand { .. } => Some("run_command"),
            _ => None,
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }
}

/// Pull the first plausible JSON object out of free-form model text.
///
/// Returns `None` unless some extraction stage yields a JSON **object**;
/// arrays and scalars are ignored.
pub fn extract_json_object(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    // 1. The whole reply is the object
    if trimmed.starts_with('{') {
        if let Some(obj) = parse_object(trimmed) {
            return Some(obj);
        }
    }

    // 2. Explicitly tagged fence
    if let Some(start) = content.find("```json") {
        let body = &content[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            if let Some(obj) = parse_object(body[..end].trim()) {
                return Some(obj);
            }
        }
    }

    // 3. Any fence whose body starts with an object
    if let Some(start) = content.find("```") {
        let body = &content[start + "```".len()..];
        if let Some(end) = body.find("```") {
            let candidate = body[..end].trim();
            if candidate.starts_with('{') {
                if let Some(obj) = parse_object(candidate) {
                    return Some(obj);
                }
            }
        }
    }

    // 4. First '{' to last '}'
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end > start {
        return parse_object(&content[start..=end]);
    }

    None
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// Extract and decode an [`Action`] from model text.
///
/// A parse miss is not an error: the worker simply proceeds without a tool
/// call.
pub fn parse_action(content: &str) -> Option<Action> {
    let value = extract_json_object(content)?;
    match serde_json::from_value::<Action>(value) {
        Ok(action) => Some(action),
        Err(e) => {
            tracing::debug!("unrecognized action shape: {e}");
            None
        }
    }
}
