//! Agent specifications
//!
//! An [`AgentSpec`] is the immutable description of one agent: who it is,
//! which tools it may call and how long it may run.

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::AgentConfig;
use crate::core::{AgentflowError, Result};
use crate::tools::ToolRegistry;

/// Immutable configuration of one agent
#[derive(Debug, Clone)]
pub struct AgentSpec {
    name: String,
    role: String,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
    model: String,
    system_prompt: Option<String>,
    gateway_timeout: Option<Duration>,
    tool_timeout: Option<Duration>,
}

/// Builder for creating AgentSpecs
#[derive(Debug)]
pub struct AgentSpecBuilder {
    name: String,
    role: String,
    tools: Option<Arc<ToolRegistry>>,
    max_iterations: usize,
    model: String,
    system_prompt: Option<String>,
    gateway_timeout: Option<Duration>,
    tool_timeout: Option<Duration>,
}

impl AgentSpecBuilder {
    /// Create a new builder with the given name and configured defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(name, &AgentConfig::default())
    }

    /// Create a builder seeded from the `[agent]` config section
    pub fn from_config(name: impl Into<String>, config: &AgentConfig) -> Self {
        Self {
            name: name.into(),
            role: String::new(),
            tools: None,
            max_iterations: config.max_iterations,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            gateway_timeout: config.gateway_timeout(),
            tool_timeout: config.tool_timeout(),
        }
    }

    /// Free-text role injected into the system prompt
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the tool registry
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the maximum number of completion calls per run
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the model to use
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the generated system prompt
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Time budget for each completion call (`None` = unbounded)
    pub fn gateway_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Time budget for each tool invocation (`None` = unbounded)
    pub fn tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Build the AgentSpec
    pub fn build(self) -> Result<AgentSpec> {
        if self.name.trim().is_empty() {
            return Err(AgentflowError::invalid_spec("agent name must not be empty"));
        }
        if self.max_iterations == 0 {
            return Err(AgentflowError::invalid_spec(format!(
                "agent '{}': max_iterations must be positive",
                self.name
            )));
        }
        if self.model.trim().is_empty() {
            return Err(AgentflowError::invalid_spec(format!(
                "agent '{}': model must not be empty",
                self.name
            )));
        }

        Ok(AgentSpec {
            name: self.name,
            role: self.role,
            tools: self.tools.unwrap_or_default(),
            max_iterations: self.max_iterations,
            model: self.model,
            system_prompt: self.system_prompt,
            gateway_timeout: self.gateway_timeout,
            tool_timeout: self.tool_timeout,
        })
    }
}

impl AgentSpec {
    /// Create a builder for more control
    pub fn builder(name: impl Into<String>) -> AgentSpecBuilder {
        AgentSpecBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn gateway_timeout(&self) -> Option<Duration> {
        self.gateway_timeout
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout
    }

    /// System prompt for a run of this agent
    pub fn system_prompt(&self) -> String {
        if let Some(ref prompt) = self.system_prompt {
            return prompt.clone();
        }

        let mut prompt = format!("You are {}, a helpful AI assistant.", self.name);
        if !self.role.is_empty() {
            prompt.push_str(&format!("\nYour role: {}", self.role));
        }
        if !self.tools.is_empty() {
            prompt.push_str("\n\nYou have access to the following tools:\n");
            prompt.push_str(&self.tools.summary());
            prompt.push_str("\n\nCall a tool when it helps; answer directly once the task is done.");
        }
        prompt
    }
}
