//! Agentflow - Tool-Calling Agents and Multi-Agent Delegation
//!
//! Agents reason over a language model through a completion gateway, call
//! tools to gather information or act, and iterate until they produce a final
//! answer. A coordinator splits a task across a team of agents and merges
//! their results.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **LLM**: Completion gateway contract with Ollama, retry and scripted gateways
//! - **Tools**: Tool descriptors, the registry and built-in file, web and shell tools
//! - **Agent**: The tool-calling loop, outcomes, trace and run sinks
//! - **Coordinator**: Routing, aggregation and delegation across agents
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agentflow::agent::{Agent, AgentSpec};
//! use agentflow::llm::OllamaGateway;
//! use agentflow::tools::{file_tools, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tools = Arc::new(ToolRegistry::with_tools(file_tools()?)?);
//!     let spec = AgentSpec::builder("assistant")
//!         .role("Answers questions about local files")
//!         .tools(tools)
//!         .build()?;
//!
//!     let agent = Agent::new(spec, OllamaGateway::with_base_url("http://localhost:11434")?);
//!     let outcome = agent.run("What is in Cargo.toml?").await;
//!     println!("{}", outcome.final_text);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod coordinator;
pub mod core;
pub mod llm;
pub mod tools;

// Re-export commonly used items
pub use agent::{Agent, AgentSpec, ExecutionOutcome, TerminatedReason};
pub use coordinator::Coordinator;
pub use core::{AgentflowError, Config, Result};
