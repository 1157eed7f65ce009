//! Configuration management for agentflow
//!
//! Supports environment variables, config files, and runtime overrides.
//!
//! Config file location: ~/.config/agentflow/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::agent::AgentSpecBuilder;
use crate::core::error::{AgentflowError, Result};

/// Main configuration for agentflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Ollama configuration
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// Agent loop defaults
    #[serde(default)]
    pub agent: AgentConfig,
    /// Coordinator defaults
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Gateway retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Run trace persistence
    #[serde(default)]
    pub trace: TraceConfig,
}

/// Ollama server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Host address (default: localhost)
    pub host: String,
    /// Port number (default: 11434)
    pub port: u16,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier passed to the completion gateway
    pub model: String,
    /// Maximum completion calls per run
    /// Default: 10
    pub max_iterations: usize,
    /// Timeout for a single completion call
    pub gateway_timeout_secs: Option<u64>,
    /// Timeout for a single tool invocation
    pub tool_timeout_secs: Option<u64>,
    /// Replaces the generated system prompt when set
    pub system_prompt: Option<String>,
}

/// How the coordinator picks agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Ask the model which agents to delegate to
    Model,
    /// Send the task to every agent once
    Broadcast,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum routing rounds per run
    /// Default: 5
    pub max_rounds: usize,
    /// Routing strategy
    pub routing: RoutingMode,
}

/// Retry policy applied around the completion gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (only for retryable errors)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for the backoff delay
    pub max_delay_ms: u64,
}

/// Where finished runs are recorded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Append each finished run as a JSON line to this file
    pub jsonl_path: Option<PathBuf>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("OLLAMA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(11434),
            timeout_secs: 120,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: env::var("AGENTFLOW_MODEL").unwrap_or_else(|_| "llama3.1".to_string()),
            max_iterations: 10,
            gateway_timeout_secs: Some(120),
            tool_timeout_secs: Some(60),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn gateway_timeout(&self) -> Option<Duration> {
        self.gateway_timeout_secs.map(Duration::from_secs)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            routing: RoutingMode::Model,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agentflow")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load() -> Self {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        if !Self::config_exists() {
            tracing::debug!("No config file, using defaults");
            return Self::default();
        }

        match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %Self::config_file().display(),
                    "Ignoring config file: {}",
                    e
                );
                Self::default()
            }
        }
    }

    /// Load configuration from file only
    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_file();

        if !config_path.exists() {
            return Err(AgentflowError::config("Config file not found"));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| AgentflowError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AgentflowError::config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_file();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| {
                AgentflowError::config(format!("Failed to create config dir: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AgentflowError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, content)
            .map_err(|e| AgentflowError::config(format!("Failed to write config: {}", e)))?;

        Ok(config_path)
    }

    /// Check if a config file exists
    pub fn config_exists() -> bool {
        Self::config_file().exists()
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }

    /// Agent builder seeded with the `[agent]` section
    pub fn agent_spec_defaults(&self, name: impl Into<String>) -> AgentSpecBuilder {
        AgentSpecBuilder::from_config(name, &self.agent)
    }

    /// Get the Ollama API base URL
    pub fn ollama_url(&self) -> Result<Url> {
        let raw = format!("http://{}:{}/", self.ollama.host, self.ollama.port);
        Url::parse(&raw)
            .map_err(|e| AgentflowError::config(format!("Invalid Ollama address {}: {}", raw, e)))
    }
}
