//! Agent module: core agent logic.
//!
//! This module contains:
//! - Conversation types ([`Message`], [`ToolCall`], [`ToolResult`])
//! - LLM clients for the supported providers
//! - The [`Session`] and the [`AgentLoop`] that drives it
//! - The system prompt builder
//!
//! # Adding a New LLM Provider
//!
//! See [`llm`] for instructions.

mod loop_impl;
mod message;
mod prompt;
mod session;
mod sink;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use llm::{LlmClient, ModelReply, ProviderClient, Usage};
pub use loop_impl::{AgentLoop, LoopOutcome, LoopState, Progress, ToolRun};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use prompt::build_system_prompt;
pub use session::{CancelFlag, Session};
pub use sink::OutputSink;
