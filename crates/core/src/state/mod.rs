pub mod run_state;
pub mod update;

pub use run_state::{
    ChatMessage, ErrorContext, MemoryItem, NextStep, Role, RunState, ToolRecord,
};
pub use update::StateUpdate;
