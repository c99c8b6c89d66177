//! # Tool Invocation Gateway
//!
//! Dispatches a named action to a tool collaborator and logs the result.
//! The registry is fixed: `read_file`, `write_file`, `list_dir`,
//! `run_command`. Every invocation is timed and recorded whether or not it
//! succeeds; outputs are truncated before storage so long runs stay bounded.
//!
//! ## Modules
//!
//! - `file_ops` - validated file read/write/list
//! - `terminal` - sandboxed shell execution

pub mod file_ops;
pub mod terminal;

use chrono::Utc;
use serde_json::Value;
use std::time::Instant;

use crate::config::ToolPolicy;
use crate::state::ToolRecord;
use file_ops::FAILURE_MARKER;

/// Character cap applied to outputs before they enter the tool log
const STORED_OUTPUT_CHARS: usize = 1000;

/// Tool names the gateway will dispatch
pub const REGISTERED_TOOLS: &[&str] = &["read_file", "write_file", "list_dir", "run_command"];

/// Full result of one gateway dispatch
#[derive(Debug)]
pub struct ToolOutcome {
    /// Untruncated output, for the message appended to the conversation
    pub output: String,
    pub success: bool,
    /// Log entry with the storage-truncated output
    pub record: ToolRecord,
}

/// The gateway; owns the tool policy and nothing else
#[derive(Debug, Clone)]
pub struct ToolGateway {
    policy: ToolPolicy,
}

impl ToolGateway {
    pub fn new(policy: ToolPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Execute `tool_name` with a JSON argument map.
    ///
    /// Unknown names and malformed argument maps produce failed outcomes;
    /// nothing here returns an error to the caller, and every call leaves a
    /// log record behind.
    pub async fn execute(&self, tool_name: &str, input: &Value) -> ToolOutcome {
        let started = Instant::now();
        tracing::info!("executing tool: {tool_name} with input: {input}");

        let output = self.dispatch(tool_name, input).await;
        let success = !output.starts_with(FAILURE_MARKER) && !output.starts_with("Unknown tool");
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!("tool {tool_name} completed in {duration_ms}ms. Success: {success}");

        let record = ToolRecord {
            tool_name: tool_name.to_string(),
            input: input.clone(),
            output: truncate_chars(&output, STORED_OUTPUT_CHARS),
            success,
            duration_ms,
            timestamp: Utc::now(),
        };

        ToolOutcome {
            output,
            success,
            record,
        }
    }

    async fn dispatch(&self, tool_name: &str, input: &Value) -> String {
        match tool_name {
            "read_file" => match required_str(input, "path") {
                Ok(path) => file_ops::read_file(path, &self.policy).await,
                Err(e) => e,
            },
            "write_file" => {
                match (required_str(input, "path"), required_str(input, "content")) {
                    (Ok(path), Ok(content)) => {
                        file_ops::write_file(path, content, &self.policy).await
                    }
                    (Err(e), _) | (_, Err(e)) => e,
                }
            }
            "list_dir" => match required_str(input, "path") {
                Ok(path) => file_ops::list_dir(path, &self.policy).await,
                Err(e) => e,
            },
            "run_command" => match required_str(input, "command") {
                Ok(command) => {
                    let cwd = input.get("cwd").and_then(|v| v.as_str()).unwrap_or(".");
                    terminal::run_command(command, cwd, self.policy.command_timeout).await
                }
                Err(e) => e,
            },
            unknown => format!("Unknown tool: {unknown}"),
        }
    }
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, String> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("{FAILURE_MARKER} missing required argument '{key}'"))
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use serde_json::json;

    fn gateway() -> ToolGateway {
        ToolGateway::new(Settings::default().tool_policy())
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_but_is_logged() {
        let outcome = gateway().execute("unknown_tool", &json!({})).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("Unknown tool"));
        assert_eq!(outcome.record.tool_name, "unknown_tool");
        assert!(!outcome.record.success);
    }

    #[tokio::test]
    async fn test_every_registered_tool_dispatches() {
        for tool in REGISTERED_TOOLS {
            let outcome = gateway().execute(tool, &json!({})).await;
            // missing arguments fail, but the tool itself is recognized
            assert!(
                !outcome.output.contains("Unknown tool"),
                "{tool} not dispatched"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_argument_is_a_failed_outcome() {
        let outcome = gateway().execute("read_file", &json!({})).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("missing required argument 'path'"));
    }

    #[tokio::test]
    async fn test_write_file_succeeds_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.rs");
        let input = json!({"path": path.to_str().unwrap(), "content": "fn main() {}"});

        let outcome = gateway().execute("write_file", &input).await;

        assert!(outcome.success, "{}", outcome.output);
        assert_eq!(outcome.record.input, input);
        assert!(outcome.record.output.starts_with("Successfully wrote"));
    }

    #[tokio::test]
    async fn test_failed_read_flips_the_success_flag() {
        let outcome = gateway()
            .execute("read_file", &json!({"path": "/no/such/file.rs"}))
            .await;

        assert!(!outcome.success);
        assert!(outcome.record.output.starts_with(FAILURE_MARKER));
    }

    #[tokio::test]
    async fn test_stored_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        tokio::fs::write(&path, "x".repeat(5000)).await.unwrap();

        let outcome = gateway()
            .execute("read_file", &json!({"path": path.to_str().unwrap()}))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.output.len(), 5000);
        assert_eq!(outcome.record.output.len(), STORED_OUTPUT_CHARS);
    }
}
