//! Message Content Normalization
//!
//! Turns caller-side chat messages (text plus optional images) into the wire
//! content the provider accepts. Vision messages carry images as raw inline
//! base64; anything that would need a fetch on the provider side is rejected.

use crate::api::completion::{ContentPart, MessageContent, Role, WireMessage};
use crate::error::{GlmError, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Path segment of images held in the local upload cache
const CACHE_PATH_MARKER: &str = "/api/cache/";

/// Accepts padded and unpadded input alike, and non-zero trailing bits
const FORGIVING_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// An image attached to a chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    /// Inline base64 bytes with an optional MIME type. `data` goes through
    /// the same source checks as a string value.
    Base64 {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },

    /// A string value as the UI hands it over: a data URI, raw base64,
    /// or (rejected) a cache path or remote URL
    Value(String),
}

impl ImageRef {
    /// Raw base64 payload
    pub fn base64(data: impl Into<String>, mime_type: Option<&str>) -> Self {
        ImageRef::Base64 {
            data: data.into(),
            mime_type: mime_type.map(str::to_string),
        }
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        ImageRef::Value(value.to_string())
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        ImageRef::Value(value)
    }
}

/// A logical chat message handed over by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub images: Vec<ImageRef>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Attach an image
    pub fn with_image(mut self, image: impl Into<ImageRef>) -> Self {
        self.images.push(image.into());
        self
    }
}

/// Normalize one message. With vision off, or with no images, the content
/// stays a plain string. Any failing image fails the whole message.
pub fn normalize_message(message: &ChatMessage, vision_enabled: bool) -> Result<WireMessage> {
    if !vision_enabled || message.images.is_empty() {
        return Ok(WireMessage::text(message.role, message.text.clone()));
    }

    debug!(count = message.images.len(), "processing message images");

    let mut parts = message
        .images
        .iter()
        .map(|image| normalize_image(image).map(ContentPart::image))
        .collect::<Result<Vec<_>>>()?;

    if !message.text.is_empty() {
        parts.push(ContentPart::text(message.text.clone()));
    }

    let content = if parts.is_empty() {
        MessageContent::Text(message.text.clone())
    } else {
        MessageContent::Parts(parts)
    };

    Ok(WireMessage {
        role: message.role,
        content,
        tool_calls: None,
        tool_call_id: None,
        name: None,
    })
}

/// Normalize a whole conversation, stopping at the first invalid message
pub fn normalize_messages(messages: &[ChatMessage], vision_enabled: bool) -> Result<Vec<WireMessage>> {
    messages
        .iter()
        .map(|m| normalize_message(m, vision_enabled))
        .collect()
}

/// Resolve an image to a sanitized inline base64 payload
pub fn normalize_image(image: &ImageRef) -> Result<String> {
    let result = match image {
        ImageRef::Base64 { data, mime_type } => normalize_inline(data, mime_type.as_deref()),
        ImageRef::Value(value) => normalize_value(value),
    };

    if let Err(e) = &result {
        warn!(error = %e, "rejected image");
    }
    result
}

fn normalize_inline(data: &str, mime_type: Option<&str>) -> Result<String> {
    reject_cache_path(data)?;
    reject_remote(data)?;

    if let Some(mime) = mime_type {
        if !is_valid_mime(mime) {
            return Err(GlmError::UnsupportedImageSource {
                reason: format!("invalid MIME type '{}'", mime),
            });
        }
    }

    debug!(mime_type = mime_type.unwrap_or("-"), "using inline base64 data");
    validated_base64(data)
}

fn normalize_value(value: &str) -> Result<String> {
    reject_cache_path(value)?;

    if let Some(rest) = value.strip_prefix("data:") {
        let payload = parse_data_uri(rest)?;
        debug!("using base64 data from data URI");
        return validated_base64(payload);
    }

    reject_remote(value)?;

    debug!("using raw base64 data");
    validated_base64(value)
}

fn reject_cache_path(value: &str) -> Result<()> {
    if value.contains(CACHE_PATH_MARKER) {
        return Err(GlmError::UnsupportedImageSource {
            reason: "cache URLs must be resolved to inline data before sending".to_string(),
        });
    }
    Ok(())
}

fn reject_remote(value: &str) -> Result<()> {
    if is_http_url(value.trim_start()) {
        return Err(GlmError::UnsupportedImageSource {
            reason: "only inline base64 image data is supported".to_string(),
        });
    }
    Ok(())
}

/// Split `<mime>;base64,<payload>` (the part after `data:`) and return the payload
fn parse_data_uri(rest: &str) -> Result<&str> {
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| GlmError::MalformedDataUri {
            reason: "expected data:<mime>;base64,<payload>".to_string(),
        })?;

    if !is_valid_mime(mime) {
        return Err(GlmError::MalformedDataUri {
            reason: format!("invalid MIME type '{}'", mime),
        });
    }

    if payload.trim().is_empty() {
        return Err(GlmError::MalformedDataUri {
            reason: "empty payload".to_string(),
        });
    }

    Ok(payload)
}

fn is_valid_mime(mime: &str) -> bool {
    !mime.is_empty()
        && mime
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '/' | '.'))
}

fn is_http_url(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Strip embedded whitespace and check the result decodes
fn validated_base64(raw: &str) -> Result<String> {
    let sanitized = sanitize_base64(raw);
    if sanitized.is_empty() {
        return Err(GlmError::InvalidBase64 {
            reason: "empty image payload".to_string(),
        });
    }

    FORGIVING_BASE64
        .decode(sanitized.as_bytes())
        .map_err(|e| GlmError::InvalidBase64 {
            reason: e.to_string(),
        })?;

    Ok(sanitized)
}

/// Remove whitespace and line breaks from a base64 payload
pub fn sanitize_base64(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}
