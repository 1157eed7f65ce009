//! Agentflow - Tool-Calling Agents and Multi-Agent Delegation
//!
//! Main entry point for the CLI application.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agentflow::agent::{Agent, ExecutionOutcome, JsonlSink, RunSink};
use agentflow::coordinator::CoordinatorBuilder;
use agentflow::llm::{CompletionGateway, OllamaGateway, RetryPolicy, RetryingGateway};
use agentflow::tools::{file_tools, shell_tools, web_tools, ToolRegistry};
use agentflow::Config;

/// Agentflow - tool-calling agents backed by a local Ollama server
#[derive(Parser, Debug)]
#[command(name = "agentflow")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single agent with the built-in file and web tools
    Run {
        /// Task for the agent
        task: String,

        /// Model to use
        #[arg(long, short = 'm')]
        model: Option<String>,

        /// Maximum completion calls
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Run without tools
        #[arg(long)]
        no_tools: bool,

        /// Also give the agent the `execute_shell` tool
        #[arg(long, conflicts_with = "no_tools")]
        allow_shell: bool,
    },

    /// Run a researcher and a writer under a coordinator
    Team {
        /// Task for the team
        task: String,

        /// Model to use for every agent and the coordinator
        #[arg(long, short = 'm')]
        model: Option<String>,

        /// Maximum coordination rounds
        #[arg(long)]
        rounds: Option<usize>,
    },

    /// Show or create the configuration file
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("agentflow=debug,info")
    } else {
        EnvFilter::try_from_env("AGENTFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_gateway(config: &Config) -> anyhow::Result<Arc<dyn CompletionGateway>> {
    let ollama = OllamaGateway::from_config(config).context("creating Ollama gateway")?;
    Ok(Arc::new(RetryingGateway::new(
        ollama,
        RetryPolicy::from(&config.retry),
    )))
}

fn trace_sink(config: &Config) -> Option<Arc<dyn RunSink>> {
    config
        .trace
        .jsonl_path
        .as_ref()
        .map(|path| Arc::new(JsonlSink::new(path)) as Arc<dyn RunSink>)
}

fn report(outcome: &ExecutionOutcome) -> anyhow::Result<()> {
    let metrics = outcome.metrics();
    tracing::info!(
        reason = %outcome.terminated_reason,
        iterations = outcome.iterations_used,
        gateway_calls = metrics.gateway_calls,
        tool_calls = metrics.tool_calls,
        tool_errors = metrics.tool_errors,
        delegations = metrics.delegations,
        "Run complete"
    );
    println!("{}", outcome.final_text);

    if outcome.terminated_reason.is_failure() {
        anyhow::bail!(
            "run ended with {}: {}",
            outcome.terminated_reason,
            outcome.error.as_deref().unwrap_or("no details")
        );
    }
    Ok(())
}

async fn run_agent(
    config: Config,
    task: String,
    model: Option<String>,
    max_iterations: Option<usize>,
    no_tools: bool,
    allow_shell: bool,
) -> anyhow::Result<()> {
    let mut builder = config.agent_spec_defaults("assistant").role(
        "Complete the user's task, using tools to inspect or change local files when needed",
    );
    if let Some(model) = model {
        builder = builder.model(model);
    }
    if let Some(max) = max_iterations {
        builder = builder.max_iterations(max);
    }
    if !no_tools {
        let mut tools = file_tools()?;
        tools.extend(web_tools()?);
        if allow_shell {
            tracing::warn!("Shell tool enabled; the model can run arbitrary commands");
            tools.extend(shell_tools()?);
        }
        builder = builder.tools(Arc::new(ToolRegistry::with_tools(tools)?));
    }

    let mut agent = Agent::with_shared_gateway(builder.build()?, build_gateway(&config)?);
    if let Some(sink) = trace_sink(&config) {
        agent = agent.with_sink(sink);
    }

    let outcome = agent.run(&task).await;
    report(&outcome)
}

async fn run_team(
    config: Config,
    task: String,
    model: Option<String>,
    rounds: Option<usize>,
) -> anyhow::Result<()> {
    let gateway = build_gateway(&config)?;
    let model = model.unwrap_or_else(|| config.agent.model.clone());

    let mut research_tools = file_tools()?;
    research_tools.extend(web_tools()?);
    let researcher = config
        .agent_spec_defaults("researcher")
        .role("Research topics and gather information from local files and the web")
        .model(&model)
        .tools(Arc::new(ToolRegistry::with_tools(research_tools)?))
        .build()?;
    let writer = config
        .agent_spec_defaults("writer")
        .role("Write clear, well-structured content based on the research")
        .model(&model)
        .build()?;

    let mut builder = CoordinatorBuilder::from_config(&config)
        .agent(Agent::with_shared_gateway(researcher, Arc::clone(&gateway)))
        .agent(Agent::with_shared_gateway(writer, Arc::clone(&gateway)))
        .gateway(gateway)
        .model(model);
    if let Some(rounds) = rounds {
        builder = builder.max_rounds(rounds);
    }
    if let Some(sink) = trace_sink(&config) {
        builder = builder.sink(sink);
    }

    let outcome = builder.build()?.run(&task).await;
    report(&outcome)
}

fn show_config(init: bool) -> anyhow::Result<()> {
    if init {
        if Config::config_exists() {
            println!("Config already exists at {}", Config::config_file().display());
        } else {
            let path = Config::default().save()?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    println!("# {}", Config::config_file().display());
    println!("{}", Config::default_config_toml());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = Config::load();

    match args.command {
        Command::Run {
            task,
            model,
            max_iterations,
            no_tools,
            allow_shell,
        } => run_agent(config, task, model, max_iterations, no_tools, allow_shell).await,
        Command::Team {
            task,
            model,
            rounds,
        } => run_team(config, task, model, rounds).await,
        Command::Config { init } => show_config(init),
    }
}
