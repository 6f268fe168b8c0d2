//! Streaming Wire Types
//!
//! Shapes of streamed chat-completion fragments and Server-Sent Events
//! decoding for the byte stream that carries them.

use crate::api::completion::Usage;
use crate::error::{GlmError, Result};
use serde::{Deserialize, Serialize};

/// A streamed fragment. Fields default so partial or unusual shapes still parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub choices: Vec<StreamChoice>,

    /// Usage info (only in final chunk for some providers)
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// Delta of the first choice
    pub fn first_delta(&self) -> Option<&StreamDelta> {
        self.choices.first().map(|c| &c.delta)
    }

    /// Finish reason of the first choice
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

/// A choice in a streaming chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,

    #[serde(default)]
    pub delta: StreamDelta,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

impl StreamDelta {
    /// Text-only delta
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Tool-call-only delta
    pub fn tools(fragments: Vec<ToolCallDelta>) -> Self {
        Self {
            tool_calls: Some(fragments),
            ..Default::default()
        }
    }
}

/// One tool-call fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Index in the tool_calls array
    #[serde(default)]
    pub index: u32,

    /// Tool call ID (only on the fragment that opens a call)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

impl ToolCallDelta {
    /// Fragment opening a new call
    pub fn opener(index: u32, id: &str, name: &str, arguments: &str) -> Self {
        Self {
            index,
            id: Some(id.to_string()),
            call_type: Some("function".to_string()),
            function: Some(FunctionDelta {
                name: Some(name.to_string()),
                arguments: Some(arguments.to_string()),
            }),
        }
    }

    /// Fragment continuing the call at `index`
    pub fn continuation(index: u32, arguments: &str) -> Self {
        Self {
            index,
            id: None,
            call_type: None,
            function: Some(FunctionDelta {
                name: None,
                arguments: Some(arguments.to_string()),
            }),
        }
    }

    /// The opener id, treating an empty string as absent
    pub fn opener_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Arguments chunk carried by this fragment, empty if none
    pub fn arguments_chunk(&self) -> &str {
        self.function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or("")
    }
}

/// Function part of a tool-call fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// What one SSE `data:` payload amounts to
#[derive(Debug, Clone)]
pub enum SseData {
    /// A parsed fragment
    Chunk(StreamChunk),

    /// The `[DONE]` terminator
    Done,
}

/// Parse the payload of one `data:` field
pub fn parse_sse_data(data: &str) -> Result<SseData> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseData::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        GlmError::Stream(format!("Failed to parse SSE chunk: {}. Data: {}", e, data))
    })?;
    Ok(SseData::Chunk(chunk))
}

/// Splits a byte stream into SSE `data:` payloads. Bytes are buffered until a
/// full line is available, so fields split across network chunks survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event payload completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is left once the byte stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest);
            let line = rest.trim_end_matches(['\n', '\r']).to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comments and other fields (event:, id:, retry:) carry nothing we use
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}
