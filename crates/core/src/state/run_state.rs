//! # Run State
//!
//! The mutable record threaded through one orchestration run.
//! List fields are append-only; scalar fields are overwritten by node
//! updates. Nothing outside [`RunState::apply`] mutates a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default iteration cap. Prevents runaway supervisor loops.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Role tag for a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One role-tagged content block in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// The node scheduled to execute next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NextStep {
    Supervisor,
    Planner,
    Researcher,
    Coder,
    Reviewer,
    #[serde(rename = "FINISH")]
    Finish,
}

impl NextStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextStep::Supervisor => "supervisor",
            NextStep::Planner => "planner",
            NextStep::Researcher => "researcher",
            NextStep::Coder => "coder",
            NextStep::Reviewer => "reviewer",
            NextStep::Finish => "FINISH",
        }
    }
}

/// Result of one tool invocation, as logged by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub tool_name: String,
    pub input: serde_json::Value,
    /// Truncated for storage; the full output only travels in messages
    pub output: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// One entry in the narrative memory trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub role: String,
    pub content: String,
    pub agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(role: &str, content: impl Into<String>, agent: Option<&str>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            agent: agent.map(|a| a.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Error information recorded by a failing node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub agent: String,
    pub error: String,
    /// Only a fatal error halts the run outside the normal FINISH path
    pub fatal: bool,
}

/// State for one orchestration run.
///
/// Created from the initiating user message, mutated exclusively through
/// [`RunState::apply`], and discarded at run end unless persisted under a
/// session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Conversation messages, append-only
    pub messages: Vec<ChatMessage>,
    /// Next node to execute
    pub next_step: NextStep,
    /// The user task driving this run
    pub task: String,
    /// Repository structure map, if an indexer supplied one
    pub repo_map: String,
    /// Currently active agent name
    pub current_agent: String,
    /// Supervisor turns taken so far
    pub iteration_count: u32,
    /// Hard cap on supervisor turns
    pub max_iterations: u32,
    /// Tool execution log, append-only
    pub tool_results: Vec<ToolRecord>,
    /// Narrative trace, append-only, independent of `messages`
    pub memory: Vec<MemoryItem>,
    /// Latest plan from the planner, overwritten per planning pass
    pub plan: Option<String>,
    /// Latest review reflection, overwritten by the reviewer
    pub reflection: String,
    /// Set by a failing node; `fatal` forces early termination
    pub error_context: Option<ErrorContext>,
    /// Open key/value bag (session correlation, versioning)
    pub metadata: HashMap<String, String>,
}

impl RunState {
    /// Create a properly initialized run from the user's message
    pub fn new(user_message: impl Into<String>) -> Self {
        let user_message = user_message.into();

        let mut metadata = HashMap::new();
        metadata.insert("created_at".to_string(), Utc::now().to_rfc3339());
        metadata.insert(
            "version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );

        Self {
            messages: vec![ChatMessage::user(user_message.clone())],
            next_step: NextStep::Supervisor,
            task: user_message.clone(),
            repo_map: String::new(),
            current_agent: "supervisor".to_string(),
            iteration_count: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_results: Vec::new(),
            memory: vec![MemoryItem::new("user", user_message, None)],
            plan: None,
            reflection: String::new(),
            error_context: None,
            metadata,
        }
    }

    /// Whether the state machine should take another supervisor turn.
    ///
    /// False once the iteration cap is reached, FINISH is scheduled, or a
    /// fatal error was recorded.
    pub fn should_continue(&self) -> bool {
        if self.iteration_count >= self.max_iterations {
            return false;
        }

        if self.next_step == NextStep::Finish {
            return false;
        }

        if let Some(ctx) = &self.error_context {
            if ctx.fatal {
                return false;
            }
        }

        true
    }

    /// Paths of files successfully written during this run, in order
    pub fn written_files(&self) -> Vec<String> {
        self.tool_results
            .iter()
            .filter(|r| r.tool_name == "write_file" && r.success)
            .filter_map(|r| r.input.get("path"))
            .filter_map(|p| p.as_str())
            .map(|p| p.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = RunState::new("review my parser");

        assert_eq!(state.next_step, NextStep::Supervisor);
        assert_eq!(state.iteration_count, 0);
        assert_eq!(state.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.memory.len(), 1);
        assert!(state.should_continue());
    }

    #[test]
    fn test_continuation_stops_at_iteration_cap() {
        let mut state = RunState::new("task");
        state.iteration_count = state.max_iterations;
        assert!(!state.should_continue());
    }

    #[test]
    fn test_continuation_stops_on_finish() {
        let mut state = RunState::new("task");
        state.next_step = NextStep::Finish;
        assert!(!state.should_continue());
    }

    #[test]
    fn test_continuation_stops_on_fatal_error() {
        let mut state = RunState::new("task");
        state.error_context = Some(ErrorContext {
            agent: "coder".to_string(),
            error: "boom".to_string(),
            fatal: true,
        });
        assert!(!state.should_continue());

        // A non-fatal error does not halt the run
        state.error_context.as_mut().unwrap().fatal = false;
        assert!(state.should_continue());
    }

    #[test]
    fn test_written_files_only_successful_writes() {
        let mut state = RunState::new("task");
        state.tool_results.push(ToolRecord {
            tool_name: "write_file".to_string(),
            input: serde_json::json!({"path": "src/a.rs", "content": "x"}),
            output: "ok".to_string(),
            success: true,
            duration_ms: 1,
            timestamp: Utc::now(),
        });
        state.tool_results.push(ToolRecord {
            tool_name: "write_file".to_string(),
            input: serde_json::json!({"path": "src/b.rs", "content": "y"}),
            output: "Error: denied".to_string(),
            success: false,
            duration_ms: 1,
            timestamp: Utc::now(),
        });
        state.tool_results.push(ToolRecord {
            tool_name: "read_file".to_string(),
            input: serde_json::json!({"path": "src/c.rs"}),
            output: "fn main() {}".to_string(),
            success: true,
            duration_ms: 1,
            timestamp: Utc::now(),
        });

        assert_eq!(state.written_files(), vec!["src/a.rs".to_string()]);
    }

    #[test]
    fn test_next_step_serializes_like_the_wire_format() {
        assert_eq!(
            serde_json::to_string(&NextStep::Finish).unwrap(),
            "\"FINISH\""
        );
        assert_eq!(
            serde_json::to_string(&NextStep::Coder).unwrap(),
            "\"coder\""
        );
    }
}
