//! glm-stream Error Types
//!
//! Error handling for the chat adapter. Input validation errors are raised
//! before anything is sent; everything after dispatch is reported once
//! through the session callbacks.

use crate::session::CancelReason;
use std::fmt;
use thiserror::Error;

/// Why a tool-call fragment could not be applied to the aggregated list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentViolation {
    /// A continuation arrived for an index that has no opened call
    ContinuationWithoutOpener,

    /// A second opener claimed an index that is already taken
    SlotAlreadyOpen { existing_id: String },

    /// An opener skipped ahead of the next free index
    IndexGap { expected: usize },
}

impl fmt::Display for FragmentViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentViolation::ContinuationWithoutOpener => {
                write!(f, "continuation arrived before its opener")
            }
            FragmentViolation::SlotAlreadyOpen { existing_id } => {
                write!(f, "slot already holds tool call '{}'", existing_id)
            }
            FragmentViolation::IndexGap { expected } => {
                write!(f, "opener skipped ahead, next free index is {}", expected)
            }
        }
    }
}

/// Main error type for glm-stream operations
#[derive(Debug, Error)]
pub enum GlmError {
    /// Image points at something that is not inline data (cache path or remote URL)
    #[error("Unsupported image source: {reason}")]
    UnsupportedImageSource { reason: String },

    /// A `data:` value that does not have the `data:<mime>;base64,<payload>` shape
    #[error("Malformed data URI: {reason}")]
    MalformedDataUri { reason: String },

    /// Image payload is not valid base64
    #[error("Invalid base64 image data: {reason}")]
    InvalidBase64 { reason: String },

    /// Tool-call fragment that does not fit the calls opened so far
    #[error("Dangling tool-call fragment at index {index}: {violation}")]
    DanglingFragment {
        index: u32,
        violation: FragmentViolation,
    },

    /// Network-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status from the provider
    #[error("Request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level timeout reported by the HTTP client
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Response body could not be parsed
    #[error("Response error: {0}")]
    Response(String),

    /// A streamed fragment could not be parsed
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Configuration errors (invalid JSON, unreadable files, bad header values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tool registry could not produce a round
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// The model kept requesting tools past the configured bound
    #[error("Tool round limit of {0} exceeded")]
    ToolRoundLimit(usize),

    /// The request was cancelled by the caller or by the request timeout
    #[error("Request cancelled ({0})")]
    Cancelled(CancelReason),
}

impl GlmError {
    /// True for the input-validation errors raised before any network call
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GlmError::UnsupportedImageSource { .. }
                | GlmError::MalformedDataUri { .. }
                | GlmError::InvalidBase64 { .. }
        )
    }

    /// The cancellation reason, if this error only reports a cancellation
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            GlmError::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GlmError::Timeout(err.to_string())
        } else if err.is_connect() {
            GlmError::Transport(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            GlmError::Response(format!("Failed to decode response: {}", err))
        } else {
            GlmError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GlmError {
    fn from(err: serde_json::Error) -> Self {
        GlmError::Response(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for GlmError {
    fn from(err: std::io::Error) -> Self {
        GlmError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for glm-stream operations
pub type Result<T> = std::result::Result<T, GlmError>;
