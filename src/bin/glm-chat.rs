//! glm-chat: stream one prompt to stdout.
//!
//! ```text
//! glm-chat [--no-stream] [--model NAME] [--image PATH_OR_DATA_URI]... <prompt>...
//! ```
//!
//! The API key is read from `CHATGLM_API_KEY` (or the variable named in the
//! config). Ctrl-C cancels the request.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use glm_stream::{
    CancelReason, ChatCallbacks, ChatMessage, ChatOptions, FunctionDefinition, FunctionRegistry,
    GlmClient, GlmError, ImageRef, ModelConfig, ResponseMeta, SessionOutcome,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Printer {
    streamed: bool,
}

impl ChatCallbacks for Printer {
    fn on_text_delta(&mut self, delta: &str) {
        self.streamed = true;
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    }

    fn on_finish(&mut self, text: &str, meta: &ResponseMeta) {
        if !self.streamed {
            print!("{}", text);
        }
        println!();
        tracing::info!(
            model = meta.model.as_deref().unwrap_or("-"),
            finish_reason = meta.finish_reason.as_deref().unwrap_or("-"),
            rounds = meta.rounds,
            "done"
        );
    }

    fn on_error(&mut self, error: &GlmError) {
        eprintln!("\nerror: {}", error);
    }

    fn on_cancelled(&mut self, reason: CancelReason, _partial_text: &str) {
        eprintln!("\n[{}]", reason);
    }
}

#[derive(Parser, Debug)]
#[command(name = "glm-chat")]
#[command(about = "Stream one prompt through a ChatGLM model", long_about = None)]
struct Args {
    /// Wait for the full reply instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Model name, overriding the configured one
    #[arg(short, long)]
    model: Option<String>,

    /// Image file or data URI to attach (repeatable)
    #[arg(short, long = "image")]
    images: Vec<String>,

    /// Prompt text
    #[arg(required = true)]
    prompt: Vec<String>,
}

/// Data URIs pass through; anything else is read from disk and inlined
fn load_image(source: &str) -> anyhow::Result<ImageRef> {
    if source.starts_with("data:") {
        return Ok(ImageRef::from(source));
    }

    let path = Path::new(source);
    let bytes = std::fs::read(path).with_context(|| format!("reading image {}", source))?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    };

    Ok(ImageRef::base64(STANDARD.encode(bytes), Some(mime)))
}

fn clock_tool() -> FunctionRegistry {
    FunctionRegistry::new().register(
        FunctionDefinition {
            name: "current_time".to_string(),
            description: Some("Current UTC time in RFC 3339 format".to_string()),
            parameters: Some(serde_json::json!({"type": "object", "properties": {}})),
        },
        |_| async move { Ok(chrono::Utc::now().to_rfc3339()) },
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("glm_stream=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut message = ChatMessage::user(args.prompt.join(" "));
    for source in &args.images {
        message = message.with_image(load_image(source)?);
    }

    let mut options = ChatOptions::new(vec![message])
        .with_stream(!args.no_stream)
        .with_vision(!args.images.is_empty());
    if let Some(model) = args.model {
        options = options.with_overrides(ModelConfig::with_model(model));
    }

    let client = GlmClient::new()?.with_tools(Arc::new(clock_tool()));
    let session = client.prepare(&options)?;

    let handle = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let mut printer = Printer { streamed: false };
    match session.run(&mut printer).await {
        SessionOutcome::Failed(_) => std::process::exit(1),
        SessionOutcome::Cancelled { .. } => std::process::exit(130),
        SessionOutcome::Completed { .. } => Ok(()),
    }
}
