//! API Module
//!
//! Wire types, content normalization, payload assembly and streaming support.

pub mod completion;
pub mod content;
pub mod payload;
pub mod streaming;

pub use completion::{
    Choice, CompletionResponse, ContentPart, FunctionCall, ImageUrl, MessageContent,
    RequestPayload, ResponseMessage, Role, ToolCall, Usage, WireMessage,
};
pub use content::{normalize_image, normalize_message, normalize_messages, ChatMessage, ImageRef};
pub use payload::{build_payload, ToolRound};
pub use streaming::{
    parse_sse_data, FunctionDelta, SseData, SseDecoder, StreamChoice, StreamChunk, StreamDelta,
    ToolCallDelta,
};
