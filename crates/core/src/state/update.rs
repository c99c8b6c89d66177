//! # State Reducer
//!
//! Each node returns a [`StateUpdate`]; [`RunState::apply`] merges it with a
//! fixed per-field policy: list fields append, scalar fields overwrite when
//! present. This is the only mutation path for a run.

use super::run_state::{
    ChatMessage, ErrorContext, MemoryItem, NextStep, RunState, ToolRecord,
};

/// Partial update produced by one state-machine node
#[derive(Debug, Default)]
pub struct StateUpdate {
    /// Appended to `messages`
    pub messages: Vec<ChatMessage>,
    /// Appended to `tool_results`
    pub tool_results: Vec<ToolRecord>,
    /// Appended to `memory`
    pub memory: Vec<MemoryItem>,
    pub next_step: Option<NextStep>,
    pub current_agent: Option<String>,
    pub iteration_count: Option<u32>,
    pub plan: Option<String>,
    pub reflection: Option<String>,
    pub repo_map: Option<String>,
    pub error_context: Option<ErrorContext>,
}

impl StateUpdate {
    pub fn with_agent(mut self, agent: &str) -> Self {
        self.current_agent = Some(agent.to_string());
        self
    }
}

impl RunState {
    /// Merge a node's update into the run.
    ///
    /// `iteration_count` only ever moves forward; appends never reorder.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        self.tool_results.extend(update.tool_results);
        self.memory.extend(update.memory);

        if let Some(next) = update.next_step {
            self.next_step = next;
        }
        if let Some(agent) = update.current_agent {
            self.current_agent = agent;
        }
        if let Some(count) = update.iteration_count {
            self.iteration_count = self.iteration_count.max(count);
        }
        if let Some(plan) = update.plan {
            self.plan = Some(plan);
        }
        if let Some(reflection) = update.reflection {
            self.reflection = reflection;
        }
        if let Some(map) = update.repo_map {
            self.repo_map = map;
        }
        if let Some(ctx) = update.error_context {
            self.error_context = Some(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_append_scalars_overwrite() {
        let mut state = RunState::new("task");

        state.apply(StateUpdate {
            messages: vec![ChatMessage::assistant("first")],
            plan: Some("step 1".to_string()),
            next_step: Some(NextStep::Coder),
            iteration_count: Some(1),
            ..Default::default()
        });

        state.apply(StateUpdate {
            messages: vec![ChatMessage::assistant("second")],
            plan: Some("step 2".to_string()),
            iteration_count: Some(2),
            ..Default::default()
        });

        // one initial user message plus two appends
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.plan.as_deref(), Some("step 2"));
        assert_eq!(state.next_step, NextStep::Coder);
        assert_eq!(state.iteration_count, 2);
    }

    #[test]
    fn test_absent_fields_leave_state_untouched() {
        let mut state = RunState::new("task");
        state.apply(StateUpdate {
            plan: Some("keep me".to_string()),
            ..Default::default()
        });

        state.apply(StateUpdate::default());

        assert_eq!(state.plan.as_deref(), Some("keep me"));
        assert_eq!(state.next_step, NextStep::Supervisor);
    }

    #[test]
    fn test_iteration_count_never_regresses() {
        let mut state = RunState::new("task");
        state.apply(StateUpdate {
            iteration_count: Some(5),
            ..Default::default()
        });
        state.apply(StateUpdate {
            iteration_count: Some(3),
            ..Default::default()
        });

        assert_eq!(state.iteration_count, 5);
    }
}
