//! skillforge - a turn-based agent core with hot-reloadable skills
//!
//! This crate provides:
//! - A skill registry that discovers capability packages on disk and
//!   rescans them when the agent extends itself
//! - A parser for the `Action:` / `Action Input:` directive protocol
//! - A model router over local (Ollama) and remote (OpenAI-compatible) backends
//! - The turn state machine that ties them together, plus a CLI/REPL

pub mod agent;
pub mod config;
pub mod directive;
pub mod events;
pub mod message;
pub mod provider;
pub mod skills;
pub mod telemetry;
pub mod templates;

pub use agent::{SessionManager, TurnError, TurnMachine, TurnOutcome};
pub use config::{AgentSettings, Config, ConfigurationError};
pub use directive::{Directive, DirectiveParseError, DirectiveParser};
pub use events::TurnEvent;
pub use message::{ConversationState, Message, Role};
pub use provider::{HttpClientFactory, ModelRouter, RouterError};
pub use skills::SkillRegistry;
pub use telemetry::Logging;
