//! Role prompts bundled at compile time.

/// Supervisor - routes the conversation to the next specialist
pub const SUPERVISOR: &str = include_str!("prompts/supervisor.md");

/// Planner - task decomposition and implementation planning
pub const PLANNER: &str = include_str!("prompts/planner.md");

/// Researcher - codebase context gathering
pub const RESEARCHER: &str = include_str!("prompts/researcher.md");

/// Coder - file edits and command execution
pub const CODER: &str = include_str!("prompts/coder.md");

/// Reviewer - quality and security review
pub const REVIEWER: &str = include_str!("prompts/reviewer.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_are_non_empty() {
        for prompt in [SUPERVISOR, PLANNER, RESEARCHER, CODER, REVIEWER] {
            assert!(!prompt.trim().is_empty());
        }
    }

    #[test]
    fn test_supervisor_prompt_names_every_role() {
        for role in ["planner", "researcher", "coder", "reviewer", "FINISH"] {
            assert!(SUPERVISOR.contains(role), "missing {role}");
        }
    }
}
