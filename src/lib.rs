//! codeagent - a terminal coding agent
//!
//! The core is [`agent::AgentLoop`]: it drives a [`agent::Session`] through
//! model calls ([`agent::llm`]) and sandboxed tool executions ([`tools`])
//! until the model answers, the iteration cap is hit, the user cancels or the
//! provider fails.

pub mod agent;
pub mod config;
pub mod error;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
