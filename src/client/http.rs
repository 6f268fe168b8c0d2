//! HTTP Transport
//!
//! reqwest-backed transport. Every await on the network is raced against the
//! cancel handle, so cancelling aborts the handshake as well as the stream.

use crate::api::streaming::SseDecoder;
use crate::client::transport::{FragmentStream, Transport, TransportRequest, TransportResponse};
use crate::error::{GlmError, Result};
use crate::session::CancelHandle;
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// HTTP transport for the chat endpoint
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new HTTP transport. Request deadlines are enforced by the
    /// session, so only the connect phase has a client-side timeout.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| GlmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest<'_>,
        cancel: &CancelHandle,
    ) -> Result<TransportResponse> {
        debug!(url = request.url, stream = request.payload.stream, "sending chat request");

        let pending = self
            .client
            .post(request.url)
            .headers(request.headers.clone())
            .json(request.payload)
            .send();
        let response = cancel
            .run_until(pending, None)
            .await
            .map_err(GlmError::Cancelled)??;

        let status = response.status();
        if !status.is_success() {
            let body = cancel
                .run_until(response.text(), None)
                .await
                .map_err(GlmError::Cancelled)?
                .unwrap_or_default();
            warn!(status = status.as_u16(), "chat request rejected");
            return Err(GlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with(EVENT_STREAM_CONTENT_TYPE))
            .unwrap_or(false);

        if request.payload.stream && is_event_stream {
            return Ok(TransportResponse::Stream {
                status: status.as_u16(),
                fragments: sse_fragments(response, cancel.clone()),
            });
        }

        let text = cancel
            .run_until(response.text(), None)
            .await
            .map_err(GlmError::Cancelled)??;

        Ok(TransportResponse::Body {
            status: status.as_u16(),
            text,
        })
    }
}

/// Decode an event-stream body into `data:` payloads
fn sse_fragments(response: reqwest::Response, cancel: CancelHandle) -> FragmentStream {
    let mut byte_stream = response.bytes_stream();

    let s = stream! {
        let mut decoder = SseDecoder::new();
        let mut interrupted = false;
        loop {
            match cancel.run_until(byte_stream.next(), None).await {
                Err(reason) => {
                    yield Err(GlmError::Cancelled(reason));
                    interrupted = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    yield Err(GlmError::Stream(format!("stream read error: {}", e)));
                    interrupted = true;
                    break;
                }
                Ok(Some(Ok(bytes))) => {
                    for event in decoder.feed(&bytes) {
                        yield Ok(event);
                    }
                }
            }
        }

        if !interrupted {
            if let Some(event) = decoder.finish() {
                yield Ok(event);
            }
        }
    };

    Box::pin(s)
}
