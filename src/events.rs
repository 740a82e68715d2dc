//! Turn event types
//!
//! Emitted by the turn machine while a request runs and consumed by the
//! front end. Sending never blocks; a dropped receiver is ignored.

use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

/// Events emitted during a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Model is about to be invoked
    AgentTurnStart { model: String },
    /// Model reply, reasoning included
    AssistantMessage { text: String },
    CapabilityStart { action: String },
    CapabilityEnd {
        action: String,
        is_error: bool,
        duration_ms: u64,
    },
    /// A self-modifying capability ran and the registry was rescanned
    RegistryReloaded { packages: BTreeSet<String> },
    /// Request finished (answer or iteration limit)
    Done,
}

pub type EventSender = mpsc::UnboundedSender<TurnEvent>;

/// Send on an optional channel, ignoring a closed receiver
pub(crate) fn emit(events: Option<&EventSender>, event: TurnEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
