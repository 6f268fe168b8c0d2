//! Request Payload Assembly
//!
//! Combines normalized messages with the effective sampling configuration,
//! and splices tool rounds into a conversation between dispatches.

use crate::api::completion::{RequestPayload, WireMessage};
use crate::config::ResolvedModelConfig;
use crate::tools::Tool;
use tracing::debug;

/// One tool-execution round trip: the assistant announcement plus one
/// result message per call, in call order
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRound {
    pub announcement: WireMessage,
    pub results: Vec<WireMessage>,
}

impl ToolRound {
    /// Messages to append, announcement first
    pub fn messages(&self) -> impl Iterator<Item = &WireMessage> {
        std::iter::once(&self.announcement).chain(self.results.iter())
    }
}

/// Build the outbound request. Tools are advertised on streamed requests only.
pub fn build_payload(
    messages: Vec<WireMessage>,
    config: &ResolvedModelConfig,
    stream: bool,
    tools: Vec<Tool>,
) -> RequestPayload {
    let tools = if stream && !tools.is_empty() {
        Some(tools)
    } else {
        None
    };

    let payload = RequestPayload {
        messages,
        stream,
        model: config.model.clone(),
        temperature: config.temperature,
        presence_penalty: config.presence_penalty,
        frequency_penalty: config.frequency_penalty,
        top_p: config.top_p,
        max_tokens: config.max_tokens,
        tools,
    };

    debug!(
        model = %payload.model,
        messages = payload.messages.len(),
        stream = payload.stream,
        "built request payload"
    );
    payload
}

impl RequestPayload {
    /// A new payload whose conversation continues with `round`. The original
    /// is left untouched.
    pub fn with_tool_round(&self, round: &ToolRound) -> RequestPayload {
        let mut messages = Vec::with_capacity(self.messages.len() + 1 + round.results.len());
        messages.extend(self.messages.iter().cloned());
        messages.extend(round.messages().cloned());

        RequestPayload {
            messages,
            ..self.clone()
        }
    }
}
