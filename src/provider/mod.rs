//! Model provider layer
//!
//! Profiles, HTTP clients for local (Ollama) and remote (OpenAI-compatible)
//! backends, and the router that picks one per turn.

mod client;
mod config;
mod router;

pub use client::*;
pub use config::*;
pub use router::*;
