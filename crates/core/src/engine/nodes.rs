//! # Agent Nodes
//!
//! One function per state-machine node. Every node returns a [`StateUpdate`]
//! and nothing else; errors are folded into the update (an appended error
//! message plus a non-fatal `error_context`), never propagated, so a run
//! always finds its way back to the supervisor and eventually to FINISH.

use super::prompts;
use super::Engine;
use crate::actions::{extract_json_object, parse_action, Action};
use crate::state::{ChatMessage, ErrorContext, MemoryItem, NextStep, RunState, StateUpdate};
use crate::tools::file_ops;

/// Character cap for memory trace entries
const MEMORY_PREVIEW_CHARS: usize = 500;

/// Character cap for file content pulled into a review
const REVIEW_FILE_CHARS: usize = 2000;

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

/// Decode the supervisor's free-text reply into a routing decision.
///
/// The reply is lower-cased and scanned for each role name in fixed order;
/// the first match wins and an unmatched reply defaults to the coder. A
/// "finish" substring anywhere overrides any role match.
pub(crate) fn routing_decision(response: &str) -> NextStep {
    let decision = response.trim().to_lowercase();

    let mut next = NextStep::Coder;
    for (name, step) in [
        ("planner", NextStep::Planner),
        ("researcher", NextStep::Researcher),
        ("coder", NextStep::Coder),
        ("reviewer", NextStep::Reviewer),
    ] {
        if decision.contains(name) {
            next = step;
            break;
        }
    }

    if decision.contains("finish") {
        next = NextStep::Finish;
    }

    next
}

/// Supervisor: analyze the run and route to the next specialist.
///
/// The iteration counter advances on every supervisor turn, including the
/// forced-FINISH and model-failure paths, so the run always makes progress
/// toward termination.
pub(crate) async fn supervisor_node(engine: &Engine, state: &RunState) -> StateUpdate {
    tracing::info!("supervisor: analyzing and routing");
    let iteration = state.iteration_count;

    if iteration >= state.max_iterations {
        tracing::warn!("max iterations ({iteration}) reached. Forcing FINISH");
        return StateUpdate {
            next_step: Some(NextStep::Finish),
            iteration_count: Some(iteration + 1),
            ..Default::default()
        };
    }

    // Context summary: current plan plus the three most recent tool results
    let mut context_parts = Vec::new();
    if let Some(plan) = &state.plan {
        context_parts.push(format!("Current Plan:\n{plan}"));
    }
    if !state.tool_results.is_empty() {
        let recent = state
            .tool_results
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|t| {
                format!(
                    "- {}: {}",
                    t.tool_name,
                    if t.success { "ok" } else { "failed" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        context_parts.push(format!("Recent Tool Results:\n{recent}"));
    }

    let context = if context_parts.is_empty() {
        Vec::new()
    } else {
        vec![ChatMessage::user(format!(
            "Context:\n{}",
            context_parts.join("\n\n")
        ))]
    };

    match engine.call_model(prompts::SUPERVISOR, context, state).await {
        Ok(response) => {
            let next = routing_decision(&response);
            tracing::info!("supervisor routing to: {}", next.as_str());
            StateUpdate {
                next_step: Some(next),
                iteration_count: Some(iteration + 1),
                ..Default::default()
            }
            .with_agent("supervisor")
        }
        Err(e) => {
            tracing::error!("supervisor error: {e}");
            StateUpdate {
                next_step: Some(NextStep::Finish),
                iteration_count: Some(iteration + 1),
                error_context: Some(ErrorContext {
                    agent: "supervisor".to_string(),
                    error: e.to_string(),
                    fatal: false,
                }),
                ..Default::default()
            }
        }
    }
}

/// Planner: produce an implementation plan and store it on the run
pub(crate) async fn planner_node(engine: &Engine, state: &RunState) -> StateUpdate {
    tracing::info!("planner: strategic planning");

    match engine.call_model(prompts::PLANNER, Vec::new(), state).await {
        Ok(plan) => StateUpdate {
            messages: vec![ChatMessage::assistant(plan.clone())],
            memory: vec![MemoryItem::new(
                "assistant",
                preview(&plan, MEMORY_PREVIEW_CHARS),
                Some("planner"),
            )],
            plan: Some(plan),
            next_step: Some(NextStep::Supervisor),
            ..Default::default()
        }
        .with_agent("planner"),
        Err(e) => worker_failure("planner", format!("Planning error: {e}")),
    }
}

/// Researcher: gather context, optionally loading files or querying search
pub(crate) async fn researcher_node(engine: &Engine, state: &RunState) -> StateUpdate {
    tracing::info!("researcher: gathering context");

    let context = if state.repo_map.is_empty() {
        Vec::new()
    } else {
        vec![ChatMessage::user(format!(
            "Repository Structure:\n{}",
            state.repo_map
        ))]
    };

    let content = match engine.call_model(prompts::RESEARCHER, context, state).await {
        Ok(content) => content,
        Err(e) => return worker_failure("researcher", format!("Research error: {e}")),
    };

    let mut messages = vec![ChatMessage::assistant(content.clone())];

    match parse_action(&content) {
        Some(Action::AnalyzeFile { path }) => {
            let result = file_ops::read_file(&path, engine.gateway.policy()).await;
            messages.push(ChatMessage::tool(format!("File Analysis Result:\n{result}")));
        }
        Some(Action::SearchCode { query }) => {
            // served by the external retrieval index once one is attached
            let result = format!("[Semantic search for: {query}]\n(retrieval index not connected)");
            messages.push(ChatMessage::tool(format!("Search Result:\n{result}")));
        }
        Some(Action::Finish { .. }) => {
            tracing::info!("researcher finished with findings");
        }
        _ => {}
    }

    StateUpdate {
        messages,
        memory: vec![MemoryItem::new(
            "assistant",
            preview(&content, MEMORY_PREVIEW_CHARS),
            Some("researcher"),
        )],
        next_step: Some(NextStep::Supervisor),
        ..Default::default()
    }
    .with_agent("researcher")
}

/// Coder: implement changes through the tool gateway
pub(crate) async fn coder_node(engine: &Engine, state: &RunState) -> StateUpdate {
    tracing::info!("coder: implementation");

    let context = match &state.plan {
        Some(plan) => vec![ChatMessage::user(format!("Implementation Plan:\n{plan}"))],
        None => Vec::new(),
    };

    let content = match engine.call_model(prompts::CODER, context, state).await {
        Ok(content) => content,
        Err(e) => {
            let mut update = worker_failure("coder", format!("Implementation error: {e}"));
            update.error_context = Some(ErrorContext {
                agent: "coder".to_string(),
                error: e.to_string(),
                fatal: false,
            });
            return update;
        }
    };

    let mut update = StateUpdate {
        messages: vec![ChatMessage::assistant(content.clone())],
        memory: vec![MemoryItem::new(
            "assistant",
            preview(&content, MEMORY_PREVIEW_CHARS),
            Some("coder"),
        )],
        next_step: Some(NextStep::Supervisor),
        ..Default::default()
    }
    .with_agent("coder");

    if let Some(value) = extract_json_object(&content) {
        if let Ok(action) = serde_json::from_value::<Action>(value.clone()) {
            if action.is_finish() {
                // finish executes no tool; the next routing decision decides
                // whether the run actually ends
                tracing::info!("coder signaled completion");
            } else if let Some(tool_name) = action.tool_name() {
                let outcome = engine.gateway.execute(tool_name, &value).await;
                update.messages.push(ChatMessage::tool(format!(
                    "Tool Result ({tool_name}):\n{}",
                    outcome.output
                )));
                update.tool_results.push(outcome.record);
            }
        }
    }

    update
}

/// Reviewer: critique the run's changes; a finish verdict lands in `reflection`
pub(crate) async fn reviewer_node(engine: &Engine, state: &RunState) -> StateUpdate {
    tracing::info!("reviewer: code review");

    let written = state.written_files();
    let context = if written.is_empty() {
        Vec::new()
    } else {
        let listing = written
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n");
        vec![ChatMessage::user(format!(
            "Files modified in this session:\n{listing}"
        ))]
    };

    let content = match engine.call_model(prompts::REVIEWER, context, state).await {
        Ok(content) => content,
        Err(e) => return worker_failure("reviewer", format!("Review error: {e}")),
    };

    let mut messages = vec![ChatMessage::assistant(content.clone())];
    let mut reflection = None;

    match parse_action(&content) {
        Some(Action::Finish {
            summary, verdict, ..
        }) => {
            let verdict = verdict.unwrap_or_else(|| "UNKNOWN".to_string());
            tracing::info!("review verdict: {verdict}");
            reflection = Some(format!("Review Verdict: {verdict}\n{summary}"));
        }
        Some(Action::ReviewFile { path }) => {
            let file_content = file_ops::read_file(&path, engine.gateway.policy()).await;
            messages.push(ChatMessage::tool(format!(
                "File for review ({path}):\n{}",
                preview(&file_content, REVIEW_FILE_CHARS)
            )));
        }
        _ => {}
    }

    StateUpdate {
        messages,
        memory: vec![MemoryItem::new(
            "assistant",
            preview(&content, MEMORY_PREVIEW_CHARS),
            Some("reviewer"),
        )],
        reflection,
        next_step: Some(NextStep::Supervisor),
        ..Default::default()
    }
    .with_agent("reviewer")
}

/// Shared failure shape: error message appended, control back to supervisor
fn worker_failure(agent: &str, message: String) -> StateUpdate {
    tracing::error!("{agent} error: {message}");
    StateUpdate {
        messages: vec![ChatMessage::assistant(message.clone())],
        error_context: Some(ErrorContext {
            agent: agent.to_string(),
            error: message,
            fatal: false,
        }),
        next_step: Some(NextStep::Supervisor),
        ..Default::default()
    }
    .with_agent(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_defaults_to_coder() {
        assert_eq!(
            routing_decision("I am not sure what to do next."),
            NextStep::Coder
        );
        assert_eq!(routing_decision(""), NextStep::Coder);
    }

    #[test]
    fn test_routing_matches_roles() {
        assert_eq!(routing_decision("planner"), NextStep::Planner);
        assert_eq!(
            routing_decision("The RESEARCHER should look into this."),
            NextStep::Researcher
        );
        assert_eq!(routing_decision("send it to the reviewer"), NextStep::Reviewer);
    }

    #[test]
    fn test_routing_first_match_in_fixed_order_wins() {
        // both names present: planner comes first in the scan order
        assert_eq!(
            routing_decision("reviewer first, then planner"),
            NextStep::Planner
        );
    }

    #[test]
    fn test_finish_overrides_any_role_match() {
        assert_eq!(
            routing_decision("the coder is done, so FINISH"),
            NextStep::Finish
        );
        assert_eq!(routing_decision("FINISH"), NextStep::Finish);
    }
}
