//! Session Events
//!
//! Callbacks a session reports through, and what a finished session returns.

use crate::api::completion::{ToolCall, Usage};
use crate::error::GlmError;
use crate::session::cancel::{CancelHandle, CancelReason};
use chrono::{DateTime, Utc};

/// Receiver of session notifications. Every method defaults to a no-op.
///
/// After a cancellation only `on_cancelled` fires. Errors reach `on_error`
/// exactly once; cancellations never do.
pub trait ChatCallbacks: Send {
    /// The handle for this exchange, delivered before any I/O
    fn on_cancel_available(&mut self, _handle: CancelHandle) {}

    /// A piece of streamed text
    fn on_text_delta(&mut self, _delta: &str) {}

    /// The exchange completed
    fn on_finish(&mut self, _text: &str, _meta: &ResponseMeta) {}

    /// The exchange failed after dispatch
    fn on_error(&mut self, _error: &GlmError) {}

    /// The exchange was cancelled by the caller or timed out
    fn on_cancelled(&mut self, _reason: CancelReason, _partial_text: &str) {}
}

/// Metadata delivered with a completed exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMeta {
    /// HTTP status of the last response
    pub status: u16,

    pub id: Option<String>,

    pub model: Option<String>,

    pub finish_reason: Option<String>,

    pub usage: Option<Usage>,

    /// Tool rounds executed during the exchange
    pub rounds: usize,

    /// Calls left for the caller when no tool registry is attached
    pub tool_calls: Vec<ToolCall>,

    pub received_at: DateTime<Utc>,
}

/// Terminal result of a session
#[derive(Debug)]
pub enum SessionOutcome {
    Completed { text: String, meta: ResponseMeta },
    Cancelled { reason: CancelReason, partial_text: String },
    Failed(GlmError),
}

impl SessionOutcome {
    /// Text of a completed exchange
    pub fn text(&self) -> Option<&str> {
        match self {
            SessionOutcome::Completed { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            SessionOutcome::Cancelled { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&GlmError> {
        match self {
            SessionOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}
