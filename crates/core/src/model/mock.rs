//! Scripted model for tests and offline runs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::Model;
use crate::state::ChatMessage;

/// Replays a fixed sequence of replies, one per invocation.
///
/// Errors once the script runs dry, which doubles as a failure injector for
/// retry and breaker paths.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicU32,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: AtomicU32::new(0),
        }
    }

    /// A model that fails every invocation
    pub fn always_failing() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Number of invocations so far
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Model for ScriptedModel {
    async fn invoke(&self, _system_prompt: &str, _messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = match self.replies.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(_) => None,
        };

        next.ok_or_else(|| anyhow!("scripted model has no reply left"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_fails() {
        let model = ScriptedModel::new(["planner", "coder"]);

        assert_eq!(model.invoke("sys", &[]).await.unwrap(), "planner");
        assert_eq!(model.invoke("sys", &[]).await.unwrap(), "coder");
        assert!(model.invoke("sys", &[]).await.is_err());
        assert_eq!(model.call_count(), 3);
    }
}
