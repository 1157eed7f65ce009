//! Agent loop integration tests
//!
//! Drives full agent runs against scripted gateways and checks termination,
//! ordering and containment guarantees.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentflow::agent::{Agent, AgentSpec, MemorySink, RunSink, TerminatedReason, TraceEventKind};
use agentflow::core::{Message, Role, ToolCallRequest, ToolDefinition};
use agentflow::llm::{
    BlockingAdapter, BlockingGateway, ProviderError, RetryPolicy, RetryingGateway,
    ScriptedGateway,
};
use agentflow::tools::{ParamType, ToolArgs, ToolDescriptor, ToolRegistry};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn double_tool() -> ToolDescriptor {
    ToolDescriptor::builder("double")
        .description("Double a number")
        .param("x", ParamType::Integer, "Number to double")
        .handler(|args: &ToolArgs| Ok(args.get_i64("x").unwrap_or(0) * 2))
        .build()
        .unwrap()
}

fn spec_with(tools: Vec<ToolDescriptor>, max_iterations: usize) -> AgentSpec {
    AgentSpec::builder("tester")
        .role("Runs test tasks")
        .model("stub")
        .max_iterations(max_iterations)
        .tools(Arc::new(ToolRegistry::with_tools(tools).unwrap()))
        .build()
        .unwrap()
}

fn call(id: &str, tool: &str, args: serde_json::Value) -> Message {
    Message::assistant_with_tool_calls("", vec![ToolCallRequest::new(id, tool, args)])
}

fn tool_messages(trace: &[Message]) -> Vec<&Message> {
    trace.iter().filter(|m| m.role == Role::Tool).collect()
}

#[tokio::test]
async fn test_double_then_final_answer() {
    let gateway = ScriptedGateway::new(vec![
        call("c1", "double", json!({"x": 21})),
        Message::assistant("42"),
    ]);
    let agent = Agent::new(spec_with(vec![double_tool()], 10), gateway);

    let outcome = agent.run("What is 21 doubled?").await;
    assert_eq!(outcome.final_text, "42");
    assert_eq!(outcome.iterations_used, 2);
    assert_eq!(outcome.terminated_reason, TerminatedReason::Completed);
    assert!(outcome.is_success());

    let tools = tool_messages(&outcome.trace);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].content, "42");
    assert_eq!(tools[0].tool_call_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_single_iteration_budget_stops_after_one_call() {
    let gateway = Arc::new(ScriptedGateway::repeating(call(
        "c1",
        "double",
        json!({"x": 1}),
    )));
    let agent = Agent::new(spec_with(vec![double_tool()], 1), Arc::clone(&gateway));

    let outcome = agent.run("loop forever").await;
    assert_eq!(outcome.terminated_reason, TerminatedReason::IterationLimit);
    assert_eq!(outcome.iterations_used, 1);
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_never_exceeds_iteration_budget() {
    for max in 1..=6 {
        let gateway = Arc::new(ScriptedGateway::repeating(call(
            "c",
            "double",
            json!({"x": 2}),
        )));
        let agent = Agent::new(spec_with(vec![double_tool()], max), Arc::clone(&gateway));

        let outcome = agent.run("keep going").await;
        assert_eq!(outcome.terminated_reason, TerminatedReason::IterationLimit);
        assert_eq!(gateway.calls(), max, "budget {}", max);
        assert_eq!(outcome.metrics().gateway_calls, max);

        // system + user + (assistant + tool) per iteration
        assert_eq!(outcome.trace.len(), 2 + 2 * max);
    }
}

#[tokio::test]
async fn test_tool_results_keep_request_order() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&finished);
    let sleep_tool = ToolDescriptor::builder("sleep")
        .param("ms", ParamType::Integer, "Milliseconds to wait")
        .param("tag", ParamType::String, "Label echoed back")
        .async_handler(move |args: ToolArgs| {
            let log = Arc::clone(&log);
            async move {
                let ms = args.get_i64("ms").unwrap_or(0) as u64;
                let tag = args.require_str("tag")?.to_string();
                tokio::time::sleep(Duration::from_millis(ms)).await;
                log.lock().unwrap().push(tag.clone());
                Ok::<_, anyhow::Error>(tag)
            }
        })
        .build()
        .unwrap();

    let delays = [120u64, 10, 70, 0, 40];
    let calls = delays
        .iter()
        .enumerate()
        .map(|(i, ms)| {
            ToolCallRequest::new(
                format!("c{}", i),
                "sleep",
                json!({"ms": ms, "tag": format!("t{}", i)}),
            )
        })
        .collect();
    let gateway = ScriptedGateway::new(vec![
        Message::assistant_with_tool_calls("", calls),
        Message::assistant("all done"),
    ]);
    let agent = Agent::new(spec_with(vec![sleep_tool], 5), gateway);

    let outcome = agent.run("sleep a bit").await;
    assert_eq!(outcome.terminated_reason, TerminatedReason::Completed);

    let tools = tool_messages(&outcome.trace);
    let ids: Vec<&str> = tools
        .iter()
        .map(|m| m.tool_call_id.as_deref().unwrap())
        .collect();
    assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4"]);
    let payloads: Vec<&str> = tools.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(payloads, vec!["t0", "t1", "t2", "t3", "t4"]);

    // Handlers ran concurrently, so they did not finish in request order
    let finish_order = finished.lock().unwrap().clone();
    assert_eq!(finish_order.len(), 5);
    assert_ne!(finish_order[0], "t0");
}

#[tokio::test]
async fn test_failing_tool_is_fed_back_to_model() {
    let flaky = ToolDescriptor::builder("fetch")
        .param("url", ParamType::String, "Address to fetch")
        .handler(|args: &ToolArgs| -> anyhow::Result<String> {
            anyhow::bail!("connection refused for {}", args.get_str("url").unwrap_or("?"))
        })
        .build()
        .unwrap();
    let gateway = Arc::new(ScriptedGateway::new(vec![
        call("c1", "fetch", json!({"url": "http://example.invalid"})),
        Message::assistant("The site is unreachable."),
    ]));
    let agent = Agent::new(spec_with(vec![flaky], 5), Arc::clone(&gateway));

    let outcome = agent.run("fetch the page").await;
    assert_eq!(outcome.terminated_reason, TerminatedReason::Completed);
    assert_eq!(outcome.final_text, "The site is unreachable.");

    let tools = tool_messages(&outcome.trace);
    assert!(tools[0].content.starts_with("Error: "));
    assert!(tools[0].content.contains("connection refused"));

    // The model saw the error before answering
    let requests = gateway.requests();
    assert!(requests[1]
        .messages
        .iter()
        .any(|m| m.role == Role::Tool && m.content.contains("connection refused")));

    let metrics = outcome.metrics();
    assert_eq!(metrics.tool_calls, 1);
    assert_eq!(metrics.tool_errors, 1);
}

#[tokio::test]
async fn test_bad_requests_become_tool_errors() {
    let gateway = ScriptedGateway::new(vec![
        Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCallRequest::new("a", "triple", json!({"x": 1})),
                ToolCallRequest::new("b", "double", json!({})),
                ToolCallRequest::new("c", "double", json!({"x": "seven"})),
                ToolCallRequest::new("d", "double", json!("{\"x\": \"4\"}")),
            ],
        ),
        Message::assistant("recovered"),
    ]);
    let agent = Agent::new(spec_with(vec![double_tool()], 5), gateway);

    let outcome = agent.run("try things").await;
    assert_eq!(outcome.terminated_reason, TerminatedReason::Completed);

    let tools = tool_messages(&outcome.trace);
    assert!(tools[0].content.contains("Unknown tool: triple"));
    assert!(tools[1].content.contains("Missing required argument 'x'"));
    assert!(tools[2].content.contains("must be integer"));
    assert_eq!(tools[3].content, "8");
}

#[tokio::test]
async fn test_slow_tool_hits_its_timeout() {
    let slow = ToolDescriptor::builder("slow")
        .async_handler(|_args: ToolArgs| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("never")
        })
        .build()
        .unwrap();
    let spec = AgentSpec::builder("timer")
        .max_iterations(3)
        .tool_timeout(Some(Duration::from_millis(20)))
        .tools(Arc::new(ToolRegistry::with_tools(vec![slow]).unwrap()))
        .build()
        .unwrap();
    let gateway = ScriptedGateway::new(vec![
        call("c1", "slow", json!({})),
        Message::assistant("gave up waiting"),
    ]);

    let outcome = Agent::new(spec, gateway).run("wait").await;
    assert_eq!(outcome.terminated_reason, TerminatedReason::Completed);
    assert!(tool_messages(&outcome.trace)[0].content.contains("timed out"));
}

#[tokio::test]
async fn test_provider_error_ends_run() {
    let gateway = ScriptedGateway::from_replies(vec![
        Ok(Message::assistant_with_tool_calls(
            "Let me check.",
            vec![ToolCallRequest::new("c1", "double", json!({"x": 3}))],
        )),
        Err(ProviderError::retryable("service overloaded")),
    ]);
    let agent = Agent::new(spec_with(vec![double_tool()], 5), gateway);

    let outcome = agent.run("double 3").await;
    assert_eq!(outcome.terminated_reason, TerminatedReason::ProviderError);
    assert_eq!(outcome.final_text, "Let me check.");
    assert_eq!(outcome.error.as_deref(), Some("service overloaded"));
    assert_eq!(outcome.iterations_used, 2);
    assert!(outcome
        .events
        .iter()
        .any(|e| matches!(e.kind, TraceEventKind::GatewayError { retryable: true, .. })));
}

#[tokio::test]
async fn test_retrying_gateway_hides_transient_errors() {
    let scripted = ScriptedGateway::from_replies(vec![
        Err(ProviderError::retryable("busy")),
        Ok(Message::assistant("fine now")),
    ]);
    let policy = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    let agent = Agent::new(
        spec_with(vec![], 3),
        RetryingGateway::new(scripted, policy),
    );

    let outcome = agent.run("hello").await;
    assert_eq!(outcome.terminated_reason, TerminatedReason::Completed);
    assert_eq!(outcome.iterations_used, 1);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let gateway = Arc::new(ScriptedGateway::repeating(Message::assistant("hi")));
    let agent = Agent::new(spec_with(vec![], 3), Arc::clone(&gateway));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = agent.run_with_cancel("hello", cancel).await;
    assert_eq!(outcome.terminated_reason, TerminatedReason::Cancelled);
    assert_eq!(outcome.iterations_used, 0);
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn test_cancel_interrupts_pending_completion() {
    let gateway = ScriptedGateway::repeating(Message::assistant("too late"))
        .with_delay(Duration::from_secs(10));
    let spec = AgentSpec::builder("patient")
        .gateway_timeout(None)
        .build()
        .unwrap();
    let agent = Agent::new(spec, gateway);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        agent.run_with_cancel("hello", cancel),
    )
    .await
    .expect("cancellation should stop the run promptly");
    assert_eq!(outcome.terminated_reason, TerminatedReason::Cancelled);
    assert_eq!(outcome.final_text, "");
}

#[tokio::test]
async fn test_sink_records_each_run_once() {
    let sink = Arc::new(MemorySink::new(10));
    let gateway = ScriptedGateway::new(vec![
        call("c1", "double", json!({"x": 5})),
        Message::assistant("10"),
        call("c2", "double", json!({"x": 1})),
    ]);
    let agent = Agent::new(spec_with(vec![double_tool()], 3), gateway)
        .with_sink(Arc::clone(&sink) as Arc<dyn RunSink>);

    let first = agent.run("first").await;
    assert_eq!(sink.len(), 1);
    let second = agent.run("second").await;
    assert_eq!(sink.len(), 2);

    let records = sink.records();
    assert_eq!(records[0].outcome, first);
    assert_eq!(records[0].conversation(), first.trace.as_slice());
    assert_eq!(records[1].outcome.terminated_reason, second.terminated_reason);
}

#[tokio::test]
async fn test_parallel_runs_do_not_share_conversations() {
    let gateway = ScriptedGateway::repeating(Message::assistant("ok"))
        .with_delay(Duration::from_millis(10));
    let agent = Agent::new(spec_with(vec![double_tool()], 2), gateway);

    let (a, b) = tokio::join!(agent.run("task A"), agent.run("task B"));
    assert_eq!(a.trace.len(), 3);
    assert_eq!(b.trace.len(), 3);
    assert_eq!(a.trace[1].content, "task A");
    assert_eq!(b.trace[1].content, "task B");
}

/// Blocking provider that answers after one tool round
struct CountingProvider {
    calls: Mutex<usize>,
}

impl BlockingGateway for CountingProvider {
    fn complete_blocking(
        &self,
        _model: &str,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<Message, ProviderError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls == 1 {
            Ok(call("c1", "double", json!({"x": 4})))
        } else {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Message::assistant(format!("result was {}", last)))
        }
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[test]
fn test_blocking_mode_matches_async_mode() {
    let provider = CountingProvider {
        calls: Mutex::new(0),
    };
    let agent = Agent::new(
        spec_with(vec![double_tool()], 4),
        BlockingAdapter::new(provider),
    );

    let outcome = agent.run_blocking("double 4").unwrap();
    assert_eq!(outcome.terminated_reason, TerminatedReason::Completed);
    assert_eq!(outcome.final_text, "result was 8");
    assert_eq!(outcome.iterations_used, 2);
}

/// Live run against a local Ollama server
#[tokio::test]
#[ignore] // Requires a running Ollama server with a tool-capable model
async fn test_live_ollama_double() {
    use agentflow::llm::OllamaGateway;
    use agentflow::Config;

    let config = Config::load();
    let gateway = OllamaGateway::from_config(&config).unwrap();
    let spec = config
        .agent_spec_defaults("calculator")
        .role("Uses the double tool for arithmetic")
        .tools(Arc::new(ToolRegistry::with_tools(vec![double_tool()]).unwrap()))
        .build()
        .unwrap();

    let outcome = Agent::new(spec, gateway)
        .run("Use the double tool to double 21, then reply with only the number.")
        .await;
    assert!(outcome.final_text.contains("42"), "got {:?}", outcome);
}
