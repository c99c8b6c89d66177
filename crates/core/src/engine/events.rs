//! # Run Events
//!
//! State deltas emitted while a run executes. The engine yields one
//! [`RunEvent`] per executed node plus a terminal completion or failure
//! marker; the transport layer serializes them to clients.

use serde::Serialize;

use crate::state::{ChatMessage, NextStep};

/// What one node appended to the run
#[derive(Debug, Clone, Serialize)]
pub struct NodeDelta {
    /// Node that just executed
    pub node: String,
    /// Messages the node appended to the conversation
    pub messages: Vec<ChatMessage>,
    /// Supervisor turns taken so far
    pub iteration: u32,
    /// Where the run goes next
    pub next_step: NextStep,
}

/// Summary attached to the completion marker
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub iterations: u32,
    pub message_count: usize,
    pub tool_calls: usize,
    /// Final review reflection, if the reviewer produced one
    pub reflection: String,
    pub session_id: Option<String>,
}

/// One element of the engine's output stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A node finished and appended these messages
    Node(NodeDelta),
    /// Terminal: the run reached FINISH (or its iteration cap)
    Completed(RunSummary),
    /// Terminal: the run could not proceed at all
    Failed { error: String },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed(_) | RunEvent::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_markers() {
        let node = RunEvent::Node(NodeDelta {
            node: "coder".to_string(),
            messages: vec![],
            iteration: 1,
            next_step: NextStep::Supervisor,
        });
        assert!(!node.is_terminal());

        let done = RunEvent::Completed(RunSummary {
            iterations: 2,
            message_count: 4,
            tool_calls: 1,
            reflection: String::new(),
            session_id: None,
        });
        assert!(done.is_terminal());
    }

    #[test]
    fn test_events_serialize_with_a_type_tag() {
        let failed = RunEvent::Failed {
            error: "store unavailable".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["type"], "failed");
    }
}
