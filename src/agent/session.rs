//! Conversation session and cancellation flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Notify;
use tracing::debug;

use super::llm::Usage;
use super::loop_impl::LoopState;
use super::message::{Message, Role, ToolCall};

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// Shared cancellation signal.
///
/// Cloned into the Ctrl-C handler; the loop checks it between steps and races
/// it against in-flight model calls.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelFlag")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One interactive conversation: ordered history plus loop bookkeeping.
#[derive(Debug)]
pub struct Session {
    messages: Vec<Message>,
    iterations: usize,
    max_iterations: usize,
    state: LoopState,
    cancel: CancelFlag,
    usage: Usage,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(system_prompt: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            iterations: 0,
            max_iterations: max_iterations.max(1),
            state: LoopState::Idle,
            cancel: CancelFlag::new(),
            usage: Usage::default(),
            created_at: Utc::now(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Model calls made during the current turn
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn transition(&mut self, to: LoopState) {
        debug!(from = ?self.state, to = ?to, iteration = self.iterations, "loop transition");
        self.state = to;
    }

    /// Start a new turn: zero the iteration counter and clear a stale cancel.
    pub(crate) fn begin_turn(&mut self) {
        self.iterations = 0;
        self.cancel.reset();
    }

    /// Count one model call and return the new total.
    pub(crate) fn record_iteration(&mut self) -> usize {
        self.iterations += 1;
        self.iterations
    }

    pub(crate) fn add_usage(&mut self, usage: Usage) {
        self.usage.add(usage);
    }

    /// Drop everything but the system prompt.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
        self.iterations = 0;
        self.usage = Usage::default();
        self.state = LoopState::Idle;
    }

    /// Tool calls in the history that have no matching result yet.
    pub fn unanswered_calls(&self) -> Vec<&ToolCall> {
        let mut open: Vec<&ToolCall> = Vec::new();
        for message in &self.messages {
            match message.role {
                Role::Assistant => open.extend(message.tool_calls.iter()),
                Role::Tool => {
                    if let Some(id) = message.tool_call_id() {
                        open.retain(|call| call.id != id);
                    }
                }
                _ => {}
            }
        }
        open
    }

    /// Whole conversation as pretty JSON, for saving a transcript.
    pub fn transcript_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&json!({
            "created_at": self.created_at.to_rfc3339(),
            "usage": self.usage,
            "messages": self.messages,
        }))
    }
}
