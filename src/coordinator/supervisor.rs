//! Delegation coordinator
//!
//! Routes a task across a fixed team of agents, runs each round's agents
//! concurrently, and aggregates their results until the task is answered,
//! the round budget runs out, or routing starts repeating itself.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::agent::outcome::{TraceEvent, TraceRecorder};
use crate::agent::{
    Agent, Conversation, ExecutionOutcome, RunSink, TerminatedReason, TraceEventKind,
};
use crate::coordinator::aggregation::{
    aggregation_instruction, parse_aggregation, Aggregation, CONTINUE_PROMPT,
};
use crate::coordinator::routing::{
    supervisor_prompt, AgentProfile, Assignment, FixedRouter, ModelRouter, RoutingContext,
    RoutingDecision, RoutingStrategy,
};
use crate::core::config::{Config, RoutingMode};
use crate::core::{AgentflowError, Message, Result, ToolDefinition};
use crate::llm::{CompletionGateway, CompletionRequest, ProviderError};

/// Multi-agent coordinator
pub struct Coordinator {
    name: String,
    agents: Vec<Agent>,
    profiles: Vec<AgentProfile>,
    gateway: Arc<dyn CompletionGateway>,
    model: String,
    router: Arc<dyn RoutingStrategy>,
    max_rounds: usize,
    gateway_timeout: Option<Duration>,
    sink: Option<Arc<dyn RunSink>>,
}

/// Builder for creating a Coordinator
pub struct CoordinatorBuilder {
    name: String,
    agents: Vec<Agent>,
    gateway: Option<Arc<dyn CompletionGateway>>,
    model: String,
    router: Arc<dyn RoutingStrategy>,
    max_rounds: usize,
    gateway_timeout: Option<Duration>,
    sink: Option<Arc<dyn RunSink>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Seed model, round budget, timeout and routing mode from configuration
    pub fn from_config(config: &Config) -> Self {
        let router: Arc<dyn RoutingStrategy> = match config.coordinator.routing {
            RoutingMode::Model => Arc::new(ModelRouter),
            RoutingMode::Broadcast => Arc::new(FixedRouter::broadcast()),
        };

        Self {
            name: "coordinator".to_string(),
            agents: Vec::new(),
            gateway: None,
            model: config.agent.model.clone(),
            router,
            max_rounds: config.coordinator.max_rounds,
            gateway_timeout: config.agent.gateway_timeout(),
            sink: None,
        }
    }

    /// Name used in trace events
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add an agent to the team
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(mut self, agents: impl IntoIterator<Item = Agent>) -> Self {
        self.agents.extend(agents);
        self
    }

    /// Gateway for routing and aggregation calls
    pub fn gateway(mut self, gateway: Arc<dyn CompletionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Model for routing and aggregation calls
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn router(mut self, router: impl RoutingStrategy + 'static) -> Self {
        self.router = Arc::new(router);
        self
    }

    pub fn max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max;
        self
    }

    pub fn gateway_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        if self.agents.is_empty() {
            return Err(AgentflowError::invalid_spec("coordinator needs at least one agent"));
        }
        if self.max_rounds == 0 {
            return Err(AgentflowError::invalid_spec("max_rounds must be positive"));
        }
        let gateway = self
            .gateway
            .ok_or_else(|| AgentflowError::invalid_spec("coordinator needs a gateway"))?;

        let mut names = HashSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name()) {
                return Err(AgentflowError::invalid_spec(format!(
                    "duplicate agent name '{}'",
                    agent.name()
                )));
            }
        }

        let profiles = self
            .agents
            .iter()
            .map(|agent| AgentProfile {
                name: agent.name().to_string(),
                role: agent.spec().role().to_string(),
                tools: agent.spec().tools().names().map(String::from).collect(),
            })
            .collect();

        Ok(Coordinator {
            name: self.name,
            agents: self.agents,
            profiles,
            gateway,
            model: self.model,
            router: self.router,
            max_rounds: self.max_rounds,
            gateway_timeout: self.gateway_timeout,
            sink: self.sink,
        })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run state of the coordinator
struct Round {
    conversation: Conversation,
    trace: TraceRecorder,
    /// Events from delegated agent runs, in completion order of rounds
    agent_events: Vec<TraceEvent>,
    /// (agent, subtask) pairs already issued in this run
    issued: HashSet<Assignment>,
    rounds: usize,
    last_aggregation: Option<String>,
}

struct Termination {
    reason: TerminatedReason,
    final_text: String,
    error: Option<String>,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Run a task across the team
    pub async fn run(&self, task: &str) -> ExecutionOutcome {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    /// Run a task, stopping early if `cancel` fires
    ///
    /// Delegated agents receive child tokens, so cancelling the coordinator
    /// cancels every agent of the current round.
    pub async fn run_with_cancel(&self, task: &str, cancel: CancellationToken) -> ExecutionOutcome {
        let mut state = Round {
            conversation: Conversation::with_task(supervisor_prompt(&self.profiles), task),
            trace: TraceRecorder::new(&self.name),
            agent_events: Vec::new(),
            issued: HashSet::new(),
            rounds: 0,
            last_aggregation: None,
        };
        state.trace.record(TraceEventKind::RunStarted {
            task: task.to_string(),
        });
        tracing::debug!(
            coordinator = %self.name,
            agents = self.agents.len(),
            max_rounds = self.max_rounds,
            "Starting coordinator run"
        );

        let termination = self.drive(task, &mut state, &cancel).await;
        let outcome = self.finish(state, termination);

        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.record(&outcome.trace, &outcome).await {
                tracing::warn!(coordinator = %self.name, "Failed to record run: {}", e);
            }
        }
        outcome
    }

    async fn drive(&self, task: &str, state: &mut Round, cancel: &CancellationToken) -> Termination {
        let by_name: HashMap<&str, &Agent> =
            self.agents.iter().map(|agent| (agent.name(), agent)).collect();

        while state.rounds < self.max_rounds {
            if cancel.is_cancelled() {
                return self.stop(state, TerminatedReason::Cancelled, None);
            }
            state.rounds += 1;
            let round = state.rounds;
            tracing::debug!(coordinator = %self.name, round, "Routing");

            let (decision, routing_calls) = {
                let ctx = RoutingContext {
                    task,
                    round,
                    agents: &self.profiles,
                    conversation: state.conversation.messages(),
                    last_aggregation: state.last_aggregation.as_deref(),
                    gateway: self.gateway.as_ref(),
                    model: &self.model,
                    timeout: self.gateway_timeout,
                    calls: AtomicUsize::new(0),
                };
                let decision = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    decision = self.router.route(&ctx) => Some(decision),
                };
                (decision, ctx.completions())
            };
            for _ in 0..routing_calls {
                state.trace.record(TraceEventKind::GatewayCall { iteration: round });
            }

            let assignments = match decision {
                None => return self.stop(state, TerminatedReason::Cancelled, None),
                Some(Err(e)) => return self.provider_failure(state, e),
                Some(Ok(RoutingDecision::Finish(answer))) => {
                    state.conversation.push(Message::assistant(answer.clone()));
                    return Termination {
                        reason: TerminatedReason::Completed,
                        final_text: answer,
                        error: None,
                    };
                }
                Some(Ok(RoutingDecision::Delegate(assignments))) => assignments,
            };

            if assignments.is_empty() {
                tracing::error!(coordinator = %self.name, round, "Routing produced no assignments");
                return self.stop(
                    state,
                    TerminatedReason::FatalError,
                    Some("routing produced no assignments".to_string()),
                );
            }

            // Check the whole decision before running any of it
            let mut runnable = Vec::new();
            let mut pending = HashSet::new();
            for assignment in assignments {
                let Some(agent) = by_name.get(assignment.agent.as_str()).copied() else {
                    tracing::warn!(coordinator = %self.name, agent = %assignment.agent, "Unknown agent");
                    state.trace.record(TraceEventKind::DelegationFailed {
                        agent: assignment.agent.clone(),
                        reason: "agent not found".to_string(),
                    });
                    state
                        .conversation
                        .push(Message::user(format!("Agent {} not found", assignment.agent)));
                    continue;
                };

                if state.issued.contains(&assignment) || !pending.insert(assignment.clone()) {
                    tracing::warn!(
                        coordinator = %self.name,
                        agent = %assignment.agent,
                        round,
                        "Delegation cycle detected"
                    );
                    return self.stop(state, TerminatedReason::DelegationCycle, None);
                }
                runnable.push((agent, assignment));
            }

            if runnable.is_empty() {
                continue;
            }

            for (_, assignment) in &runnable {
                state.issued.insert(assignment.clone());
                state.trace.record(TraceEventKind::Delegation {
                    agent: assignment.agent.clone(),
                    subtask: assignment.subtask.clone(),
                    round,
                });
                state.conversation.push(Message::assistant(format!(
                    "Delegated to {}: {}",
                    assignment.agent, assignment.subtask
                )));
            }

            // Join barrier: every agent of the round finishes before aggregation
            let outcomes = join_all(runnable.iter().map(|(agent, assignment)| {
                agent.run_with_cancel(&assignment.subtask, cancel.child_token())
            }))
            .await;

            let mut failures = 0;
            for ((_, assignment), outcome) in runnable.iter().zip(outcomes) {
                state.agent_events.extend(outcome.events.iter().cloned());
                if outcome.terminated_reason.is_failure() {
                    failures += 1;
                    let reason = outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| outcome.terminated_reason.to_string());
                    tracing::warn!(
                        coordinator = %self.name,
                        agent = %assignment.agent,
                        "Delegated agent failed: {}",
                        reason
                    );
                    state.trace.record(TraceEventKind::DelegationFailed {
                        agent: assignment.agent.clone(),
                        reason: reason.clone(),
                    });
                    state.conversation.push(Message::user(format!(
                        "Agent {} failed ({}): {}",
                        assignment.agent, outcome.terminated_reason, reason
                    )));
                } else {
                    state.conversation.push(Message::user(format!(
                        "Result from {}: {}",
                        assignment.agent, outcome.final_text
                    )));
                }
            }

            if failures == runnable.len() {
                tracing::error!(coordinator = %self.name, round, "Every delegated agent failed");
                return self.stop(
                    state,
                    TerminatedReason::FatalError,
                    Some("every delegated agent failed".to_string()),
                );
            }

            if cancel.is_cancelled() {
                return self.stop(state, TerminatedReason::Cancelled, None);
            }

            state
                .conversation
                .push(Message::user(aggregation_instruction(task)));
            state.trace.record(TraceEventKind::GatewayCall { iteration: round });
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                reply = self.complete(state.conversation.messages()) => Some(reply),
            };
            let reply = match reply {
                None => return self.stop(state, TerminatedReason::Cancelled, None),
                Some(Err(e)) => return self.provider_failure(state, e),
                Some(Ok(reply)) => reply,
            };

            let aggregation = parse_aggregation(&reply.content);
            state.conversation.push(Message::assistant(reply.content));
            state.trace.record(TraceEventKind::Aggregation {
                round,
                complete: aggregation.is_complete(),
            });

            match aggregation {
                Aggregation::Complete(answer) => {
                    return Termination {
                        reason: TerminatedReason::Completed,
                        final_text: answer,
                        error: None,
                    };
                }
                Aggregation::Incomplete(progress) => {
                    tracing::debug!(coordinator = %self.name, round, "Aggregation incomplete");
                    state.last_aggregation = Some(progress);
                    state.conversation.push(Message::user(CONTINUE_PROMPT));
                }
            }
        }

        self.stop(state, TerminatedReason::IterationLimit, None)
    }

    /// Aggregation call, bounded by the gateway timeout
    async fn complete(&self, messages: &[Message]) -> std::result::Result<Message, ProviderError> {
        let tools: &[ToolDefinition] = &[];
        let request = CompletionRequest::new(&self.model, messages, tools);
        match self.gateway_timeout {
            Some(after) => tokio::time::timeout(after, self.gateway.complete(request))
                .await
                .map_err(|_| ProviderError::timeout(after))?,
            None => self.gateway.complete(request).await,
        }
    }

    fn provider_failure(&self, state: &mut Round, e: ProviderError) -> Termination {
        tracing::warn!(coordinator = %self.name, "Provider error: {}", e);
        state.trace.record(TraceEventKind::GatewayError {
            detail: e.detail.clone(),
            retryable: e.retryable,
        });
        self.stop(state, TerminatedReason::ProviderError, Some(e.detail))
    }

    /// Terminate with the last aggregation as the answer
    fn stop(
        &self,
        state: &Round,
        reason: TerminatedReason,
        error: Option<String>,
    ) -> Termination {
        Termination {
            reason,
            final_text: state.last_aggregation.clone().unwrap_or_default(),
            error,
        }
    }

    fn finish(&self, state: Round, termination: Termination) -> ExecutionOutcome {
        let Round {
            conversation,
            mut trace,
            agent_events,
            rounds,
            ..
        } = state;

        trace.record(TraceEventKind::Terminal {
            reason: termination.reason,
        });
        tracing::info!(
            coordinator = %self.name,
            reason = %termination.reason,
            rounds,
            "Coordinator run finished"
        );

        let mut events = trace.into_events();
        events.extend(agent_events);

        ExecutionOutcome {
            final_text: termination.final_text,
            iterations_used: rounds,
            terminated_reason: termination.reason,
            trace: conversation.into_messages(),
            events,
            error: termination.error,
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("name", &self.name)
            .field("agents", &self.profiles)
            .field("model", &self.model)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}
