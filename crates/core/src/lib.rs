//! # Conductor Core
//!
//! The "Brain" of the Conductor system - the orchestration engine that turns
//! a user request into file edits, analyses, and a reviewed outcome by
//! driving a team of specialist agents against a generative model.
//!
//! ## Architecture
//!
//! - `engine/` - supervisor-driven state machine, nodes, prompts, run events
//! - `state/` - the run record and its reducer
//! - `actions` - free-text action parser over a closed action set
//! - `tools/` - tool invocation gateway and tool collaborators
//! - `resilience/` - retry-with-backoff and per-dependency circuit breakers
//! - `limiter` - token-bucket rate limiting for the ingress boundary
//! - `model/` - narrow model-collaborator seam (Gemini REST + scripted mock)
//! - `session` - SQLite-backed conversation persistence with TTL
//! - `config` - environment-driven settings
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conductor_core::engine::{Engine, EngineConfig};
//!
//! let engine = Arc::new(Engine::new(model, gateway, breakers, EngineConfig::default()));
//! let mut events = engine.run("add error handling to the parser", None);
//! while let Some(event) = events.next().await { /* stream to client */ }
//! ```

pub mod actions;
pub mod config;
pub mod engine;
pub mod limiter;
pub mod model;
pub mod resilience;
pub mod session;
pub mod state;
pub mod tools;
