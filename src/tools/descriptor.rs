//! Tool descriptors
//!
//! A [`ToolDescriptor`] binds a name, a parameter schema and a handler into one
//! immutable value. Descriptors are built with [`ToolBuilder`] or derived from
//! a typed argument struct with [`ToolDescriptor::from_typed`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ToolDefinition;
use crate::tools::registry::ToolError;

/// Primitive JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// JSON Schema type name
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn from_schema_type(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ParamType::String),
            "integer" => Some(ParamType::Integer),
            "number" => Some(ParamType::Number),
            "boolean" => Some(ParamType::Boolean),
            "array" => Some(ParamType::Array),
            "object" => Some(ParamType::Object),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of one tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
}

/// Validated tool arguments, keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Get an argument by name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string argument by key
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer argument by key
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(|v| v.as_i64())
    }

    /// Get a numeric argument by key
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| v.as_f64())
    }

    /// Get a boolean argument by key
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    /// Get a string argument, failing if it is absent
    pub fn require_str(&self, key: &str) -> anyhow::Result<&str> {
        self.get_str(key)
            .ok_or_else(|| anyhow::anyhow!("missing string argument '{}'", key))
    }

    /// Deserialize all arguments into a typed struct
    pub fn deserialize<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Value returned by a tool handler
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    /// Render as the text payload of a tool result
    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(text) => text,
            ToolOutput::Json(Value::String(text)) => text,
            ToolOutput::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Json(value)
    }
}

impl From<i64> for ToolOutput {
    fn from(value: i64) -> Self {
        ToolOutput::Json(value.into())
    }
}

impl From<f64> for ToolOutput {
    fn from(value: f64) -> Self {
        ToolOutput::Json(value.into())
    }
}

impl From<bool> for ToolOutput {
    fn from(value: bool) -> Self {
        ToolOutput::Json(value.into())
    }
}

/// Result returned by every handler
pub type HandlerResult = anyhow::Result<ToolOutput>;

type SyncHandlerFn = dyn Fn(&ToolArgs) -> HandlerResult + Send + Sync;
type AsyncHandlerFn = dyn Fn(ToolArgs) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// The invocable behind a tool
#[derive(Clone)]
pub enum ToolHandler {
    /// Runs to completion on the calling task
    Sync(Arc<SyncHandlerFn>),
    /// May suspend while waiting on I/O
    Async(Arc<AsyncHandlerFn>),
}

impl ToolHandler {
    pub fn from_fn<F, O>(f: F) -> Self
    where
        F: Fn(&ToolArgs) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<ToolOutput> + 'static,
    {
        ToolHandler::Sync(Arc::new(move |args: &ToolArgs| {
            f(args).map(Into::<ToolOutput>::into)
        }))
    }

    pub fn from_async_fn<F, Fut, O>(f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput> + 'static,
    {
        ToolHandler::Async(Arc::new(move |args: ToolArgs| {
            f(args)
                .map(|result| result.map(Into::<ToolOutput>::into))
                .boxed()
        }))
    }

    /// Whether invoking this handler can yield to the scheduler
    pub fn may_suspend(&self) -> bool {
        matches!(self, ToolHandler::Async(_))
    }
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolHandler::Sync(_) => f.write_str("ToolHandler::Sync"),
            ToolHandler::Async(_) => f.write_str("ToolHandler::Async"),
        }
    }
}

/// A named, schema-described invocable
#[derive(Debug)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    parameters: Vec<ParamSpec>,
    handler: ToolHandler,
}

impl ToolDescriptor {
    /// Start building a descriptor
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    /// Build a descriptor whose parameters are derived from the argument type
    ///
    /// Field names, primitive types, `Option` optionality and doc comments of
    /// `A` become the parameter schema, so the schema cannot drift from the
    /// handler signature.
    pub fn from_typed<A, F, O>(
        name: impl Into<String>,
        description: impl Into<String>,
        f: F,
    ) -> Result<Self, ToolError>
    where
        A: DeserializeOwned + JsonSchema + 'static,
        F: Fn(A) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<ToolOutput> + 'static,
    {
        let handler = ToolHandler::from_fn(move |args: &ToolArgs| {
            let typed: A = args.deserialize()?;
            f(typed)
        });

        let mut builder = ToolBuilder::new(name).description(description);
        builder.parameters = params_from_schema::<A>()?;
        builder.handler = Some(handler);
        builder.build()
    }

    /// Async variant of [`ToolDescriptor::from_typed`]
    pub fn from_typed_async<A, F, Fut, O>(
        name: impl Into<String>,
        description: impl Into<String>,
        f: F,
    ) -> Result<Self, ToolError>
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput> + 'static,
    {
        let f = Arc::new(f);
        let handler = ToolHandler::Async(Arc::new(move |args: ToolArgs| {
            let f = Arc::clone(&f);
            async move {
                let typed: A = args.deserialize()?;
                let output: O = f(typed).await?;
                Ok::<ToolOutput, anyhow::Error>(output.into())
            }
            .boxed()
        }));

        let mut builder = ToolBuilder::new(name).description(description);
        builder.parameters = params_from_schema::<A>()?;
        builder.handler = Some(handler);
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameters in declaration order
    pub fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn handler(&self) -> &ToolHandler {
        &self.handler
    }

    /// JSON Schema of the parameters
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".to_string(), Value::from(param.param_type.as_str()));
            if !param.description.is_empty() {
                prop.insert(
                    "description".to_string(),
                    Value::from(param.description.clone()),
                );
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }

        let required: Vec<Value> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| Value::from(p.name.clone()))
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Schema advertised to the completion gateway
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(&self.name, &self.description, self.parameters_schema())
    }
}

/// Builder for [`ToolDescriptor`]
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: Vec<ParamSpec>,
    handler: Option<ToolHandler>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            handler: None,
        }
    }

    /// Text shown to the model
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a required parameter
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            param_type,
            required: true,
            description: description.into(),
        });
        self
    }

    /// Add an optional parameter
    pub fn optional_param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            param_type,
            required: false,
            description: description.into(),
        });
        self
    }

    /// Set a handler that runs to completion without suspending
    pub fn handler<F, O>(mut self, f: F) -> Self
    where
        F: Fn(&ToolArgs) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<ToolOutput> + 'static,
    {
        self.handler = Some(ToolHandler::from_fn(f));
        self
    }

    /// Set a handler that may suspend
    pub fn async_handler<F, Fut, O>(mut self, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput> + 'static,
    {
        self.handler = Some(ToolHandler::from_async_fn(f));
        self
    }

    pub fn build(self) -> Result<ToolDescriptor, ToolError> {
        let name_ok = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !name_ok {
            return Err(ToolError::InvalidDefinition(format!(
                "tool name '{}' must be non-empty and use only [A-Za-z0-9_-]",
                self.name
            )));
        }

        for (i, param) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(ToolError::InvalidDefinition(format!(
                    "tool '{}' declares parameter '{}' twice",
                    self.name, param.name
                )));
            }
        }

        let handler = self.handler.ok_or_else(|| {
            ToolError::InvalidDefinition(format!("tool '{}' has no handler", self.name))
        })?;

        Ok(ToolDescriptor {
            name: self.name,
            description: self.description,
            parameters: self.parameters,
            handler,
        })
    }
}

/// Derive parameter specs from a type's JSON Schema
fn params_from_schema<A: JsonSchema>() -> Result<Vec<ParamSpec>, ToolError> {
    let root = schemars::gen::SchemaGenerator::default().into_root_schema_for::<A>();
    let schema = serde_json::to_value(&root)
        .map_err(|e| ToolError::InvalidDefinition(format!("unrenderable schema: {}", e)))?;

    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(ToolError::InvalidDefinition(
            "typed tool arguments must be a struct".to_string(),
        ));
    }

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let properties = match schema.get("properties").and_then(Value::as_object) {
        Some(properties) => properties,
        None => return Ok(Vec::new()),
    };

    Ok(properties
        .iter()
        .map(|(name, prop)| ParamSpec {
            name: name.clone(),
            param_type: schema_param_type(prop),
            required: required.contains(&name.as_str()),
            description: prop
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
        .collect())
}

/// `Option<T>` renders as `["T", "null"]`; references fall back to object
fn schema_param_type(prop: &Value) -> ParamType {
    match prop.get("type") {
        Some(Value::String(name)) => ParamType::from_schema_type(name),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .filter(|name| *name != "null")
            .find_map(ParamType::from_schema_type),
        _ => None,
    }
    .unwrap_or(ParamType::Object)
}
