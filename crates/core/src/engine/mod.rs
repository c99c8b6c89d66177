//! # Orchestration Engine
//!
//! The supervisor-driven state machine. The supervisor is the entry node and
//! the only router; every worker edge returns to it. A run terminates when
//! the routing decision is FINISH, the iteration cap is reached, or a fatal
//! error is recorded - and since worker errors are always folded into
//! non-fatal state updates, every run reaches a terminal state.
//!
//! ## Modules
//!
//! - `events` - state deltas streamed to the caller
//! - `nodes` - supervisor and worker node implementations
//! - `prompts` - role prompts bundled at compile time

pub mod events;
pub mod nodes;
pub mod prompts;

pub use events::{NodeDelta, RunEvent, RunSummary};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::model::Model;
use crate::resilience::{
    retry_with_backoff, BreakerRegistry, CircuitConfig, CircuitError, RetryConfig,
};
use crate::state::{ChatMessage, NextStep, RunState, StateUpdate};
use crate::tools::ToolGateway;
use crate::session::SessionStore;

/// Dependency name of the model breaker in the registry
const MODEL_BREAKER: &str = "model";

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_iterations: u32,
    pub retry: RetryConfig,
    /// Breaker config for the model dependency; `call_timeout` bounds one
    /// full (retried) model invocation
    pub model_breaker: CircuitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: crate::state::run_state::DEFAULT_MAX_ITERATIONS,
            retry: RetryConfig::default(),
            model_breaker: CircuitConfig {
                call_timeout: std::time::Duration::from_secs(60),
                ..CircuitConfig::default()
            },
        }
    }
}

/// The orchestration engine.
///
/// Owns no per-run state; [`Engine::run`] threads a fresh [`RunState`]
/// through the node loop and streams deltas back to the caller.
pub struct Engine {
    model: Arc<dyn Model>,
    pub(crate) gateway: ToolGateway,
    breakers: Arc<BreakerRegistry>,
    store: Option<Arc<SessionStore>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        model: Arc<dyn Model>,
        gateway: ToolGateway,
        breakers: Arc<BreakerRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            model,
            gateway,
            breakers,
            store: None,
            config,
        }
    }

    /// Attach a session store; runs with a session id persist through it
    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Invoke the model through retry-with-backoff, guarded by the model
    /// circuit breaker. Context messages precede the full history.
    pub(crate) async fn call_model(
        &self,
        system_prompt: &str,
        context: Vec<ChatMessage>,
        state: &RunState,
    ) -> Result<String, CircuitError> {
        let breaker = self
            .breakers
            .get_with(MODEL_BREAKER, self.config.model_breaker.clone())
            .await;

        let mut messages = context;
        messages.extend(state.messages.iter().cloned());

        breaker
            .call(async {
                retry_with_backoff(
                    || self.model.invoke(system_prompt, &messages),
                    &self.config.retry,
                )
                .await
            })
            .await
    }

    /// Start a run and return its lazy event stream.
    ///
    /// The stream yields one [`RunEvent::Node`] per executed node and is
    /// terminated by a completion (or failure) marker. When `session_id` is
    /// supplied and a store is attached, the final conversation is persisted
    /// under that key.
    pub fn run(
        self: &Arc<Self>,
        initial_message: impl Into<String>,
        session_id: Option<String>,
    ) -> ReceiverStream<RunEvent> {
        let engine = Arc::clone(self);
        let initial_message = initial_message.into();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut state = RunState::new(&initial_message);
            state.max_iterations = engine.config.max_iterations;
            if let Some(id) = &session_id {
                state
                    .metadata
                    .insert("session_id".to_string(), id.clone());
            }

            tracing::info!(
                "starting run for: {}...",
                initial_message.chars().take(100).collect::<String>()
            );

            engine.drive(&mut state, &tx).await;

            if let (Some(store), Some(id)) = (&engine.store, &session_id) {
                if let Err(e) = store.save(id, &state.messages, &state.metadata).await {
                    tracing::error!("failed to persist session {id}: {e}");
                }
            }

            let summary = RunSummary {
                iterations: state.iteration_count,
                message_count: state.messages.len(),
                tool_calls: state.tool_results.len(),
                reflection: state.reflection.clone(),
                session_id,
            };
            let _ = tx.send(RunEvent::Completed(summary)).await;
        });

        ReceiverStream::new(rx)
    }

    /// The node loop. Supervisor turn, continuation check, worker turn,
    /// repeat. Each applied update is surfaced as a delta.
    async fn drive(&self, state: &mut RunState, tx: &mpsc::Sender<RunEvent>) {
        while state.should_continue() {
            let update = nodes::supervisor_node(self, state).await;
            self.step(state, "supervisor", update, tx).await;

            if !state.should_continue() {
                break;
            }

            let worker = state.next_step;
            let update = match worker {
                NextStep::Planner => nodes::planner_node(self, state).await,
                NextStep::Researcher => nodes::researcher_node(self, state).await,
                NextStep::Coder => nodes::coder_node(self, state).await,
                NextStep::Reviewer => nodes::reviewer_node(self, state).await,
                // supervisor never routes to itself, and FINISH was handled
                // by the continuation check above
                NextStep::Supervisor | NextStep::Finish => break,
            };
            self.step(state, worker.as_str(), update, tx).await;
        }

        tracing::info!(
            "run finished after {} iterations ({} messages, {} tool calls)",
            state.iteration_count,
            state.messages.len(),
            state.tool_results.len()
        );
    }

    /// Apply one node's update and emit the resulting delta
    async fn step(
        &self,
        state: &mut RunState,
        node: &str,
        update: StateUpdate,
        tx: &mpsc::Sender<RunEvent>,
    ) {
        let messages = update.messages.clone();
        state.apply(update);

        let delta = NodeDelta {
            node: node.to_string(),
            messages,
            iteration: state.iteration_count,
            next_step: state.next_step,
        };
        let _ = tx.send(RunEvent::Node(delta)).await;
    }
}
