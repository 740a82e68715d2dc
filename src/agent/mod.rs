//! Agent orchestration
//!
//! - `ExecutionEngine`: directive -> capability -> observation
//! - `TurnMachine`: AGENT_TURN / TOOL_TURN loop for one request
//! - `PromptBuilder`: system prompt rendered per agent turn
//! - `SessionManager`: per-session state, locking and persistence

mod engine;
mod prompt;
mod session;
mod turn;

pub use engine::{parse_failure_observation, Dispatch, ExecutionEngine, SKILL_DETAIL_ACTION};
pub use prompt::PromptBuilder;
pub use session::{
    MemoryStore, RequestError, SessionError, SessionManager, SessionStore, SharedState,
    SqliteStore,
};
pub use turn::{ToolRequest, TurnError, TurnMachine, TurnOutcome, TurnSettings, TurnState};
