//! Agent runner
//!
//! The tool-calling loop: submit the conversation to the completion gateway,
//! execute any requested tool calls, append their results and repeat until
//! the model answers without tool calls or the iteration budget runs out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::agent::conversation::Conversation;
use crate::agent::loop_state::{AgentLoopState, InvalidTransition, LoopPhase};
use crate::agent::outcome::{ExecutionOutcome, TerminatedReason, TraceEventKind, TraceRecorder};
use crate::agent::sink::RunSink;
use crate::agent::spec::AgentSpec;
use crate::core::{
    AgentflowError, Message, Result, Role, ToolCallRequest, ToolCallResult, ToolDefinition,
};
use crate::llm::{CompletionGateway, CompletionRequest, ProviderError};

/// How a run ended, before the outcome is assembled
struct Termination {
    reason: TerminatedReason,
    error: Option<String>,
}

impl Termination {
    fn new(reason: TerminatedReason) -> Self {
        Self {
            reason,
            error: None,
        }
    }

    fn failed(reason: TerminatedReason, error: impl Into<String>) -> Self {
        Self {
            reason,
            error: Some(error.into()),
        }
    }
}

/// Per-run mutable state; never shared between runs
struct Run {
    conversation: Conversation,
    state: AgentLoopState,
    trace: TraceRecorder,
}

/// One agent: an [`AgentSpec`] bound to a completion gateway
///
/// Cloning is cheap; clones share the spec, gateway and sink. Each call to
/// [`Agent::run`] owns an independent conversation.
#[derive(Clone)]
pub struct Agent {
    spec: Arc<AgentSpec>,
    gateway: Arc<dyn CompletionGateway>,
    sink: Option<Arc<dyn RunSink>>,
}

impl Agent {
    /// Create an agent from a spec and a gateway
    pub fn new(spec: AgentSpec, gateway: impl CompletionGateway + 'static) -> Self {
        Self::with_shared_gateway(spec, Arc::new(gateway))
    }

    /// Create an agent that shares a gateway with others
    pub fn with_shared_gateway(spec: AgentSpec, gateway: Arc<dyn CompletionGateway>) -> Self {
        Self {
            spec: Arc::new(spec),
            gateway,
            sink: None,
        }
    }

    /// Record every finished run in the given sink
    pub fn with_sink(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    /// Run the agent on a task
    pub async fn run(&self, task: &str) -> ExecutionOutcome {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    /// Run the agent on a task, stopping early if `cancel` fires
    ///
    /// Cancellation is observed before each completion call and while one is
    /// in flight. Tool calls that already started are allowed to finish.
    pub async fn run_with_cancel(&self, task: &str, cancel: CancellationToken) -> ExecutionOutcome {
        let tool_defs = self.spec.tools().describe_all();
        let mut run = Run {
            conversation: Conversation::with_task(self.spec.system_prompt(), task),
            state: AgentLoopState::new(self.spec.max_iterations()),
            trace: TraceRecorder::new(self.spec.name()),
        };
        run.trace.record(TraceEventKind::RunStarted {
            task: task.to_string(),
        });
        tracing::debug!(
            agent = self.spec.name(),
            max_iterations = self.spec.max_iterations(),
            tools = tool_defs.len(),
            "Starting agent run"
        );

        let termination = match self.drive(&mut run, &tool_defs, &cancel).await {
            Ok(termination) => termination,
            Err(violation) => {
                tracing::error!(agent = self.spec.name(), "Loop invariant violated: {}", violation);
                Termination::failed(TerminatedReason::FatalError, violation.to_string())
            }
        };

        let outcome = self.finish(run, termination);
        self.record(&outcome).await;
        outcome
    }

    /// Run the agent on the calling thread
    ///
    /// Builds a single-threaded runtime for the duration of the run, so it
    /// must not be called from within an async context.
    pub fn run_blocking(&self, task: &str) -> Result<ExecutionOutcome> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(AgentflowError::Other(
                "run_blocking called from within an async runtime; use run() instead".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.run(task)))
    }

    /// The loop itself
    async fn drive(
        &self,
        run: &mut Run,
        tool_defs: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> std::result::Result<Termination, InvalidTransition> {
        loop {
            if cancel.is_cancelled() {
                run.state.advance(LoopPhase::Failed)?;
                return Ok(Termination::new(TerminatedReason::Cancelled));
            }

            run.state.advance(LoopPhase::AwaitingCompletion)?;
            let iteration = run.state.iterations();
            run.trace.record(TraceEventKind::GatewayCall { iteration });
            tracing::debug!(
                agent = self.spec.name(),
                iteration,
                max = run.state.max_iterations(),
                "Calling completion gateway"
            );

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    run.state.advance(LoopPhase::Failed)?;
                    return Ok(Termination::new(TerminatedReason::Cancelled));
                }
                reply = self.complete(run.conversation.messages(), tool_defs) => reply,
            };

            let mut message = match reply {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(agent = self.spec.name(), iteration, "Provider error: {}", e);
                    run.trace.record(TraceEventKind::GatewayError {
                        detail: e.detail.clone(),
                        retryable: e.retryable,
                    });
                    run.state.advance(LoopPhase::Failed)?;
                    return Ok(Termination::failed(TerminatedReason::ProviderError, e.detail));
                }
            };

            if let Err(detail) = normalize_reply(&mut message, iteration) {
                tracing::error!(agent = self.spec.name(), iteration, "{}", detail);
                run.state.advance(LoopPhase::Failed)?;
                return Ok(Termination::failed(TerminatedReason::FatalError, detail));
            }

            let calls = message.tool_calls.clone();
            run.conversation.push(message);

            if calls.is_empty() {
                run.state.advance(LoopPhase::Done)?;
                return Ok(Termination::new(TerminatedReason::Completed));
            }

            run.state.advance(LoopPhase::HasToolCalls)?;
            run.state.advance(LoopPhase::ExecutingTools)?;
            let results = self.execute_tools(&calls, &mut run.trace).await;
            run.conversation
                .extend(results.iter().map(ToolCallResult::to_message));

            if run.state.check_limit()? {
                return Ok(Termination::new(TerminatedReason::IterationLimit));
            }
        }
    }

    /// One completion call, bounded by the spec's gateway timeout
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> std::result::Result<Message, ProviderError> {
        let request = CompletionRequest::new(self.spec.model(), messages, tools);
        match self.spec.gateway_timeout() {
            Some(after) => tokio::time::timeout(after, self.gateway.complete(request))
                .await
                .map_err(|_| ProviderError::timeout(after))?,
            None => self.gateway.complete(request).await,
        }
    }

    /// Execute tool calls concurrently; results come back in request order
    async fn execute_tools(
        &self,
        calls: &[ToolCallRequest],
        trace: &mut TraceRecorder,
    ) -> Vec<ToolCallResult> {
        for call in calls {
            trace.record(TraceEventKind::ToolCall {
                id: call.id.clone(),
                tool: call.tool_name.clone(),
            });
        }

        let registry = self.spec.tools();
        let timeout = self.spec.tool_timeout();
        let pending = calls.iter().map(|call| async move {
            let started = Instant::now();
            let result = registry.invoke_with_timeout(call, timeout).await;
            (result, started.elapsed())
        });
        let finished = join_all(pending).await;

        finished
            .into_iter()
            .map(|(result, elapsed)| {
                trace.record(TraceEventKind::ToolResult {
                    id: result.tool_call_id.clone(),
                    tool: result.tool_name.clone(),
                    status: result.status,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                result
            })
            .collect()
    }

    fn finish(&self, run: Run, termination: Termination) -> ExecutionOutcome {
        let Run {
            conversation,
            state,
            mut trace,
        } = run;

        trace.record(TraceEventKind::Terminal {
            reason: termination.reason,
        });
        tracing::info!(
            agent = self.spec.name(),
            reason = %termination.reason,
            iterations = state.iterations(),
            "Agent run finished"
        );

        ExecutionOutcome {
            final_text: conversation.last_assistant_text(),
            iterations_used: state.iterations(),
            terminated_reason: termination.reason,
            trace: conversation.into_messages(),
            events: trace.into_events(),
            error: termination.error,
        }
    }

    async fn record(&self, outcome: &ExecutionOutcome) {
        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.record(&outcome.trace, outcome).await {
                tracing::warn!(agent = self.spec.name(), "Failed to record run: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("spec", &self.spec)
            .field("gateway", &self.gateway.name())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Check a gateway reply and give every tool call a unique id
fn normalize_reply(message: &mut Message, iteration: usize) -> std::result::Result<(), String> {
    if message.role != Role::Assistant {
        return Err(format!(
            "completion gateway returned a '{}' message instead of an assistant message",
            message.role
        ));
    }

    let mut seen = HashSet::new();
    for (index, call) in message.tool_calls.iter_mut().enumerate() {
        if call.id.is_empty() {
            call.id = format!("call_{}_{}", iteration, index);
        }
        if !seen.insert(call.id.clone()) {
            return Err(format!(
                "tool call id '{}' appears more than once in one assistant message",
                call.id
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGateway;
    use crate::tools::{ParamType, ToolArgs, ToolDescriptor, ToolRegistry};
    use serde_json::json;

    fn double_spec(max_iterations: usize) -> AgentSpec {
        let double = ToolDescriptor::builder("double")
            .description("Double a number")
            .param("x", ParamType::Integer, "Number to double")
            .handler(|args: &ToolArgs| Ok(args.get_i64("x").unwrap_or(0) * 2))
            .build()
            .unwrap();

        AgentSpec::builder("calc")
            .model("test-model")
            .max_iterations(max_iterations)
            .tools(Arc::new(ToolRegistry::with_tools(vec![double]).unwrap()))
            .build()
            .unwrap()
    }

    fn double_call(id: &str, x: i64) -> Message {
        Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new(id, "double", json!({ "x": x }))],
        )
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            double_call("c1", 21),
            Message::assistant("42"),
        ]));
        let agent = Agent::new(double_spec(5), Arc::clone(&gateway));

        let outcome = agent.run("double 21").await;
        assert_eq!(outcome.terminated_reason, TerminatedReason::Completed);
        assert_eq!(outcome.final_text, "42");
        assert_eq!(outcome.iterations_used, 2);

        // system, user, assistant(call), tool, assistant
        assert_eq!(outcome.trace.len(), 5);
        assert_eq!(outcome.trace[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(outcome.trace[3].content, "42");

        let requests = gateway.requests();
        assert_eq!(requests[0].model, "test-model");
        assert_eq!(requests[0].tools, vec!["double"]);
        assert_eq!(requests[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_ids_are_filled() {
        let gateway = ScriptedGateway::new(vec![
            Message::assistant_with_tool_calls(
                "",
                vec![
                    ToolCallRequest::new("", "double", json!({"x": 1})),
                    ToolCallRequest::new("", "double", json!({"x": 2})),
                ],
            ),
            Message::assistant("done"),
        ]);
        let outcome = Agent::new(double_spec(3), gateway).run("go").await;

        assert_eq!(outcome.trace[2].tool_calls[0].id, "call_1_0");
        assert_eq!(outcome.trace[3].tool_call_id.as_deref(), Some("call_1_0"));
        assert_eq!(outcome.trace[4].tool_call_id.as_deref(), Some("call_1_1"));
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_fatal() {
        let gateway = ScriptedGateway::new(vec![Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCallRequest::new("same", "double", json!({"x": 1})),
                ToolCallRequest::new("same", "double", json!({"x": 2})),
            ],
        )]);
        let outcome = Agent::new(double_spec(3), gateway).run("go").await;

        assert_eq!(outcome.terminated_reason, TerminatedReason::FatalError);
        assert!(outcome.error.unwrap().contains("same"));
        // The offending message is never appended
        assert_eq!(outcome.trace.len(), 2);
    }

    #[tokio::test]
    async fn test_non_assistant_reply_is_fatal() {
        let gateway = ScriptedGateway::new(vec![Message::user("I am not the model")]);
        let outcome = Agent::new(double_spec(3), gateway).run("go").await;
        assert_eq!(outcome.terminated_reason, TerminatedReason::FatalError);
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_provider_error() {
        let gateway = ScriptedGateway::repeating(Message::assistant("late"))
            .with_delay(std::time::Duration::from_millis(200));
        let spec = AgentSpec::builder("slow")
            .gateway_timeout(Some(std::time::Duration::from_millis(10)))
            .build()
            .unwrap();

        let outcome = Agent::new(spec, gateway).run("go").await;
        assert_eq!(outcome.terminated_reason, TerminatedReason::ProviderError);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_run_blocking() {
        let gateway = ScriptedGateway::new(vec![double_call("c1", 2), Message::assistant("4")]);
        let outcome = Agent::new(double_spec(3), gateway)
            .run_blocking("double 2")
            .unwrap();
        assert_eq!(outcome.final_text, "4");
    }

    #[tokio::test]
    async fn test_run_blocking_refuses_inside_runtime() {
        let agent = Agent::new(double_spec(1), ScriptedGateway::new(vec![]));
        assert!(agent.run_blocking("x").is_err());
    }
}
