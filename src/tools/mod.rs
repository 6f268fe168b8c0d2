//! Tool Registry
//!
//! Tool definitions advertised to the model and the registry that turns a
//! finished batch of tool calls into a tool round.

use crate::api::completion::{ToolCall, WireMessage};
use crate::api::payload::ToolRound;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Type (usually "function")
    #[serde(rename = "type")]
    pub tool_type: String,

    /// Function definition
    pub function: FunctionDefinition,
}

impl Tool {
    pub fn function(function: FunctionDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function,
        }
    }
}

/// Function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,

    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Parameters schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Source of tool definitions and executor of finished tool calls
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Tools to advertise on streamed requests
    fn tools(&self) -> Vec<Tool>;

    /// Execute a batch and return the announcement plus one result per call
    async fn run(&self, calls: &[ToolCall]) -> Result<ToolRound>;
}

type Handler = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Registry of named async functions
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    definitions: Vec<FunctionDefinition>,
    handlers: HashMap<String, Handler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. A later registration under the same name replaces the earlier one.
    pub fn register<F, Fut>(mut self, definition: FunctionDefinition, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let name = definition.name.clone();
        self.definitions.retain(|d| d.name != name);
        self.definitions.push(definition);

        let handler: Handler = Arc::new(move |args| f(args).boxed());
        self.handlers.insert(name, handler);
        self
    }

    async fn call(&self, call: &ToolCall) -> String {
        let Some(handler) = self.handlers.get(&call.function.name) else {
            warn!(name = %call.function.name, "model called an unknown tool");
            return format!("error: unknown tool '{}'", call.function.name);
        };

        let args = if call.function.arguments.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(args) => args,
                Err(e) => return format!("error: invalid arguments: {}", e),
            }
        };

        match handler(args).await {
            Ok(output) => output,
            Err(e) => {
                warn!(name = %call.function.name, error = %e, "tool failed");
                format!("error: {}", e)
            }
        }
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("definitions", &self.definitions)
            .finish()
    }
}

#[async_trait]
impl ToolRegistry for FunctionRegistry {
    fn tools(&self) -> Vec<Tool> {
        self.definitions.iter().cloned().map(Tool::function).collect()
    }

    async fn run(&self, calls: &[ToolCall]) -> Result<ToolRound> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            debug!(id = %call.id, name = %call.function.name, "running tool");
            let output = self.call(call).await;
            results.push(WireMessage::tool_result(call, output));
        }

        Ok(ToolRound {
            announcement: WireMessage::tool_announcement("", calls.to_vec()),
            results,
        })
    }
}
