//! glm-stream - Streaming Chat Adapter for ChatGLM
//!
//! Turns a multimodal chat history into ChatGLM chat-completion requests,
//! streams the reply back as text deltas, reassembles streamed tool calls and
//! runs tool rounds until the model answers. Requests can be cancelled by the
//! caller and are bounded by a request timeout.

use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod tools;

pub use api::{ChatMessage, ImageRef, Role};
pub use config::{AppConfig, ConfigLoader, ModelConfig};
pub use error::{GlmError, Result};
pub use session::{
    CancelHandle, CancelReason, ChatCallbacks, ResponseMeta, SessionOutcome, StreamSession,
};
pub use tools::{FunctionDefinition, FunctionRegistry, Tool, ToolRegistry};

use api::{build_payload, normalize_messages};
use client::{BearerCredentials, CredentialProvider, HttpTransport, Transport};
use session::SessionSettings;

/// Per-call request options
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub messages: Vec<ChatMessage>,

    /// Stream the reply (default true)
    pub stream: bool,

    /// Send images as image parts; when false only text is sent
    pub vision: bool,

    /// Per-call sampling overrides, highest precedence
    pub overrides: ModelConfig,

    /// Persona-level overrides between app defaults and per-call values
    pub mask: ModelConfig,
}

impl ChatOptions {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            stream: true,
            vision: false,
            overrides: ModelConfig::default(),
            mask: ModelConfig::default(),
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_vision(mut self, vision: bool) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_overrides(mut self, overrides: ModelConfig) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_mask(mut self, mask: ModelConfig) -> Self {
        self.mask = mask;
        self
    }
}

/// The main chat client
pub struct GlmClient {
    config: AppConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    tools: Option<Arc<dyn ToolRegistry>>,
}

impl GlmClient {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self> {
        let loader = ConfigLoader::new()?;
        Self::from_config(loader.into_config()?)
    }

    /// Create a client with a custom config path
    pub fn with_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let loader = ConfigLoader::from_path(path)?;
        Self::from_config(loader.into_config()?)
    }

    /// Create a client from a config object, using the HTTP transport and
    /// bearer credentials from the provider settings
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let credentials = BearerCredentials::from_provider(&config.provider);
        Ok(Self {
            config,
            transport: Arc::new(HttpTransport::new()?),
            credentials: Arc::new(credentials),
            tools: None,
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Advertise and execute tools from `registry`
    pub fn with_tools(mut self, registry: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(registry);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Validate the input and assemble a session without sending anything.
    ///
    /// Image problems and bad credential headers are returned here, before
    /// any network call.
    pub fn prepare(&self, options: &ChatOptions) -> Result<StreamSession> {
        let messages = normalize_messages(&options.messages, options.vision)?;
        let model_config = ModelConfig::effective(
            &self.config.model_config,
            &options.mask,
            &options.overrides,
        );
        let tools = self
            .tools
            .as_ref()
            .map(|registry| registry.tools())
            .unwrap_or_default();

        let payload = build_payload(messages, &model_config, options.stream, tools);
        let settings = SessionSettings {
            url: self.config.provider.chat_url(),
            headers: self.credentials.headers()?,
            timeout: self.config.request_timeout(),
            max_tool_rounds: self.config.max_tool_rounds,
        };

        let session = StreamSession::new(payload, settings, self.transport.clone());
        Ok(match &self.tools {
            Some(registry) => session.with_tools(registry.clone()),
            None => session,
        })
    }

    /// Run one exchange. Validation errors come back as `Err`; everything
    /// after dispatch is reported through `callbacks` and the outcome.
    pub async fn chat<C>(&self, options: &ChatOptions, callbacks: &mut C) -> Result<SessionOutcome>
    where
        C: ChatCallbacks + ?Sized,
    {
        let session = self.prepare(options)?;
        Ok(session.run(callbacks).await)
    }
}
