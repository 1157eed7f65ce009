//! Tool registry - manages and dispatches tool calls
//!
//! Central hub for registering tools, advertising their schemas and routing
//! tool calls to handlers. Invocation never fails outward: every problem ends
//! up as a [`ToolCallResult`] with an error status.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::core::{ToolCallRequest, ToolCallResult, ToolDefinition};
use crate::tools::descriptor::{ParamType, ToolArgs, ToolDescriptor, ToolHandler, ToolOutput};

/// Errors raised while registering or invoking tools
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required argument '{argument}' for tool '{tool}'")]
    MissingArgument { tool: String, argument: String },

    #[error("Argument '{argument}' for tool '{tool}' must be {expected}, got {found}")]
    InvalidArgument {
        tool: String,
        argument: String,
        expected: ParamType,
        found: String,
    },

    #[error("Arguments for tool '{tool}' must be a JSON object: {detail}")]
    MalformedArguments { tool: String, detail: String },

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Invalid tool definition: {0}")]
    InvalidDefinition(String),

    #[error("Tool '{tool}' failed: {detail}")]
    Execution { tool: String, detail: String },

    #[error("Tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
}

/// Registry of available tools
///
/// Built once, then shared read-only (typically behind an `Arc`) by every
/// run of the agents that use it.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    /// Descriptors in registration order
    tools: Vec<ToolDescriptor>,
    /// Position of each tool in `tools`
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from a set of descriptors
    pub fn with_tools(tools: impl IntoIterator<Item = ToolDescriptor>) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool descriptor
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        let name = descriptor.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    /// Get a descriptor by name
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get all tool definitions, in registration order
    pub fn describe_all(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// One line per tool, for system prompts
    pub fn summary(&self) -> String {
        self.tools
            .iter()
            .map(|t| {
                if t.description().is_empty() {
                    format!("- {}", t.name())
                } else {
                    format!("- {}: {}", t.name(), t.description())
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Validate arguments against a tool's schema
    ///
    /// Arguments may arrive as an object or as a JSON-encoded string. Primitive
    /// values are coerced to the declared type where that is lossless; unknown
    /// arguments are dropped.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<ToolArgs, ToolError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let raw = decode_arguments(name, arguments)?;
        let mut validated = Map::new();

        for param in descriptor.parameters() {
            match raw.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        return Err(ToolError::MissingArgument {
                            tool: name.to_string(),
                            argument: param.name.clone(),
                        });
                    }
                }
                Some(value) => {
                    let coerced = coerce(value, param.param_type).ok_or_else(|| {
                        ToolError::InvalidArgument {
                            tool: name.to_string(),
                            argument: param.name.clone(),
                            expected: param.param_type,
                            found: describe_value(value),
                        }
                    })?;
                    validated.insert(param.name.clone(), coerced);
                }
            }
        }

        Ok(ToolArgs::new(validated))
    }

    /// Validate and execute a tool, returning the rendered output
    pub async fn execute(
        &self,
        name: &str,
        arguments: &Value,
        timeout: Option<Duration>,
    ) -> Result<String, ToolError> {
        let args = self.validate(name, arguments)?;
        let descriptor = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let run = run_handler(descriptor.handler(), args);
        let output = match timeout {
            Some(after) => tokio::time::timeout(after, run)
                .await
                .map_err(|_| ToolError::Timeout {
                    tool: name.to_string(),
                    after,
                })?,
            None => run.await,
        };

        output.map(ToolOutput::into_text).map_err(|detail| ToolError::Execution {
            tool: name.to_string(),
            detail,
        })
    }

    /// Execute a tool call request with no time limit
    pub async fn invoke(&self, call: &ToolCallRequest) -> ToolCallResult {
        self.invoke_with_timeout(call, None).await
    }

    /// Execute a tool call request, containing every failure in the result
    pub async fn invoke_with_timeout(
        &self,
        call: &ToolCallRequest,
        timeout: Option<Duration>,
    ) -> ToolCallResult {
        let started = Instant::now();
        let result = self.execute(&call.tool_name, &call.arguments, timeout).await;

        match result {
            Ok(payload) => {
                tracing::debug!(
                    tool = %call.tool_name,
                    id = %call.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call succeeded"
                );
                ToolCallResult::ok(&call.id, &call.tool_name, payload)
            }
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, id = %call.id, "Tool call failed: {}", e);
                ToolCallResult::error(&call.id, &call.tool_name, e.to_string())
            }
        }
    }
}

/// Run a handler, turning errors and panics into a description
async fn run_handler(handler: &ToolHandler, args: ToolArgs) -> Result<ToolOutput, String> {
    let outcome = match handler {
        ToolHandler::Sync(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(&args))),
        ToolHandler::Async(f) => AssertUnwindSafe(f(args)).catch_unwind().await,
    };

    match outcome {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn decode_arguments(tool: &str, arguments: &Value) -> Result<Map<String, Value>, ToolError> {
    let malformed = |detail: String| ToolError::MalformedArguments {
        tool: tool.to_string(),
        detail,
    };

    match arguments {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) if s.trim().is_empty() => Ok(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(malformed(format!("decoded to {}", describe_value(&other)))),
            Err(e) => Err(malformed(e.to_string())),
        },
        other => Err(malformed(format!("got {}", describe_value(other)))),
    }
}

/// Coerce a value to the declared type, or `None` if it cannot be
fn coerce(value: &Value, expected: ParamType) -> Option<Value> {
    match (expected, value) {
        (ParamType::String, Value::String(_)) => Some(value.clone()),
        (ParamType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

        (ParamType::Integer, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Some(value.clone())
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| Value::from(f as i64))
            }
        }
        (ParamType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

        (ParamType::Number, Value::Number(_)) => Some(value.clone()),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),

        (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },

        (ParamType::Array, Value::Array(_)) => Some(value.clone()),
        (ParamType::Object, Value::Object(_)) => Some(value.clone()),
        (ParamType::Array | ParamType::Object, Value::String(s)) => {
            match (expected, serde_json::from_str::<Value>(s).ok()?) {
                (ParamType::Array, parsed @ Value::Array(_)) => Some(parsed),
                (ParamType::Object, parsed @ Value::Object(_)) => Some(parsed),
                _ => None,
            }
        }

        _ => None,
    }
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}
