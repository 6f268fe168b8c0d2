//! Transport Abstraction
//!
//! The seam between a session and the network. A transport sends one request
//! and hands back either a complete body or a stream of SSE data payloads.

use crate::api::completion::RequestPayload;
use crate::error::Result;
use crate::session::CancelHandle;
use async_trait::async_trait;
use futures::Stream;
use reqwest::header::HeaderMap;
use std::pin::Pin;

/// Ordered stream of raw `data:` payloads from a streamed response
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One outbound request
#[derive(Debug, Clone, Copy)]
pub struct TransportRequest<'a> {
    pub url: &'a str,
    pub headers: &'a HeaderMap,
    pub payload: &'a RequestPayload,
}

/// What the provider answered with
pub enum TransportResponse {
    /// A complete response body
    Body { status: u16, text: String },

    /// An open event stream
    Stream { status: u16, fragments: FragmentStream },
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportResponse::Body { status, text } => f
                .debug_struct("Body")
                .field("status", status)
                .field("text", text)
                .finish(),
            TransportResponse::Stream { status, .. } => {
                f.debug_struct("Stream").field("status", status).finish()
            }
        }
    }
}

/// Sends chat requests. Implementations must stop work once `cancel` fires
/// and report it as [`GlmError::Cancelled`](crate::error::GlmError::Cancelled).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest<'_>,
        cancel: &CancelHandle,
    ) -> Result<TransportResponse>;
}
