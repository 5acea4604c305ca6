//! Confirmation gate for destructive tool calls

use crate::agent::ToolCall;

/// Asked before a destructive call runs. Returning `false` declines it.
pub trait ConfirmationPrompt: Send + Sync {
    fn ask(&self, call: &ToolCall) -> bool;
}

/// Approves every call (`--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl ConfirmationPrompt for AutoApprove {
    fn ask(&self, _call: &ToolCall) -> bool {
        true
    }
}

/// Declines every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDeny;

impl ConfirmationPrompt for AutoDeny {
    fn ask(&self, _call: &ToolCall) -> bool {
        false
    }
}
