//! Error types for codeagent
//!
//! Two families live here. [`ProviderError`] describes a failed model call and
//! drives the retry decision. [`ToolError`] describes a failed tool invocation;
//! it never aborts the loop and is turned into a failed tool result instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for codeagent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the agent loop (setup, config, CLI)
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("{0}")]
    Other(String),
}

impl From<inquire::InquireError> for Error {
    fn from(err: inquire::InquireError) -> Self {
        Error::Prompt(err.to_string())
    }
}

/// Classification of a failed model call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Timeout,
    Auth,
    RateLimit,
    ServerError,
    Network,
    /// Rejected request (unknown model, malformed payload). Not retried.
    BadRequest,
    /// The provider answered but the body could not be understood.
    Decode,
}

impl ProviderErrorKind {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// `Timeout` is deliberately absent: every attempt is already bounded by
    /// the configured timeout, so retrying would multiply the wait.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::Network | ProviderErrorKind::ServerError | ProviderErrorKind::RateLimit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Auth => "authentication failed",
            ProviderErrorKind::RateLimit => "rate limited",
            ProviderErrorKind::ServerError => "server error",
            ProviderErrorKind::Network => "network error",
            ProviderErrorKind::BadRequest => "bad request",
            ProviderErrorKind::Decode => "unreadable response",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to a model provider
#[derive(Error, Debug, Clone)]
#[error("{provider}: {kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub provider: String,
    pub message: String,
    pub status: Option<u16>,
    /// Server supplied `Retry-After`, if any.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.into(),
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::new(
            ProviderErrorKind::Timeout,
            provider,
            format!("no response within {}s", after.as_secs()),
        )
    }

    pub fn decode(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Decode, provider, message)
    }

    /// Map an HTTP status and body to an error.
    pub fn from_status(provider: impl Into<String>, status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            429 => ProviderErrorKind::RateLimit,
            500..=599 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::BadRequest,
        };
        let mut message = format!("HTTP {status}");
        let detail = extract_error_message(body);
        if !detail.is_empty() {
            message.push_str(": ");
            message.push_str(&detail);
        }
        Self {
            status: Some(status),
            ..Self::new(kind, provider, message)
        }
    }

    /// Map a transport-level failure.
    pub fn from_reqwest(provider: impl Into<String>, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_decode() {
            ProviderErrorKind::Decode
        } else if let Some(status) = err.status() {
            return Self::from_status(provider, status.as_u16(), "");
        } else {
            ProviderErrorKind::Network
        };
        Self::new(kind, provider, err.to_string())
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Short actionable suggestion for the user, when one exists.
    pub fn hint(&self) -> Option<String> {
        match self.kind {
            ProviderErrorKind::Auth => Some(format!(
                "Check the API key for {} with `codeagent config --api-key`.",
                self.provider
            )),
            ProviderErrorKind::Network if self.provider == "ollama" => {
                Some("Is Ollama running? Start it with `ollama serve`.".to_string())
            }
            ProviderErrorKind::Network => Some("Check your network connection and try again.".to_string()),
            ProviderErrorKind::RateLimit => Some("The provider is rate limiting; wait a moment and retry.".to_string()),
            ProviderErrorKind::BadRequest => {
                Some("Check the model name with `codeagent models`.".to_string())
            }
            ProviderErrorKind::Timeout => {
                Some("The model took too long; raise `timeout_secs` or pick a smaller model.".to_string())
            }
            ProviderErrorKind::ServerError | ProviderErrorKind::Decode => None,
        }
    }
}

/// Pull a human message out of a JSON error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    let body = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/error/message"),
            value.pointer("/error"),
            value.pointer("/message"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(text) = candidate.as_str() {
                return text.to_string();
            }
        }
    }
    body.chars().take(300).collect()
}

/// Classification of a failed tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidArgs,
    PathEscape,
    UserDeclined,
    ExecutionFailure,
    /// The call was skipped because the user cancelled the turn.
    Cancelled,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ToolErrorKind::UnknownTool => "unknown tool",
            ToolErrorKind::InvalidArgs => "invalid arguments",
            ToolErrorKind::PathEscape => "path outside workspace",
            ToolErrorKind::UserDeclined => "declined by user",
            ToolErrorKind::ExecutionFailure => "execution failed",
            ToolErrorKind::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// A failed tool invocation
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArgs, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ExecutionFailure, message)
    }

    pub fn path_escape(path: &str) -> Self {
        Self::new(
            ToolErrorKind::PathEscape,
            format!("'{path}' resolves outside the working directory"),
        )
    }
}
