//! # Model Collaborator
//!
//! Narrow seam to the generative model. The engine only ever needs "system
//! prompt plus history in, reply text out"; providers, transport, and
//! streaming live behind this trait. The production implementation speaks
//! the Gemini REST API; tests script replies with [`ScriptedModel`].

pub mod gemini;
pub mod mock;

use crate::state::ChatMessage;
use async_trait::async_trait;

pub use gemini::GeminiModel;
pub use mock::ScriptedModel;

/// A model that can be invoked with a system prompt and message history
#[async_trait]
pub trait Model: Send + Sync {
    /// Invoke the model and return the reply text.
    ///
    /// May fail on transport or provider errors; callers wrap invocations in
    /// the retry and circuit-breaker layers.
    async fn invoke(&self, system_prompt: &str, messages: &[ChatMessage]) -> anyhow::Result<String>;
}
