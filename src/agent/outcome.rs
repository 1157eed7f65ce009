//! Run outcomes and the structured trace
//!
//! Every run, agent or coordinator, ends in an [`ExecutionOutcome`]. Running
//! out of budget or detecting a cycle are ordinary outcomes, not errors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Message, ToolStatus};

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatedReason {
    Completed,
    IterationLimit,
    ProviderError,
    FatalError,
    DelegationCycle,
    Cancelled,
}

impl TerminatedReason {
    /// Whether the run failed in the control plane
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TerminatedReason::ProviderError | TerminatedReason::FatalError
        )
    }
}

impl fmt::Display for TerminatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminatedReason::Completed => "completed",
            TerminatedReason::IterationLimit => "iteration_limit",
            TerminatedReason::ProviderError => "provider_error",
            TerminatedReason::FatalError => "fatal_error",
            TerminatedReason::DelegationCycle => "delegation_cycle",
            TerminatedReason::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One entry of the structured trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub at: DateTime<Utc>,
    /// Agent or coordinator that emitted the event
    pub agent: String,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    RunStarted {
        task: String,
    },
    GatewayCall {
        iteration: usize,
    },
    GatewayError {
        detail: String,
        retryable: bool,
    },
    ToolCall {
        id: String,
        tool: String,
    },
    ToolResult {
        id: String,
        tool: String,
        status: ToolStatus,
        elapsed_ms: u64,
    },
    Delegation {
        agent: String,
        subtask: String,
        round: usize,
    },
    DelegationFailed {
        agent: String,
        reason: String,
    },
    Aggregation {
        round: usize,
        complete: bool,
    },
    Terminal {
        reason: TerminatedReason,
    },
}

/// Collects trace events for one run
#[derive(Debug, Clone)]
pub(crate) struct TraceRecorder {
    agent: String,
    events: Vec<TraceEvent>,
}

impl TraceRecorder {
    pub(crate) fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            events: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, kind: TraceEventKind) {
        self.events.push(TraceEvent {
            at: Utc::now(),
            agent: self.agent.clone(),
            kind,
        });
    }

    pub(crate) fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

/// Counters derived from a run's trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub gateway_calls: usize,
    pub tool_calls: usize,
    pub tool_errors: usize,
    pub delegations: usize,
    pub delegation_failures: usize,
    pub total_tool_ms: u64,
}

/// Terminal result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub final_text: String,
    pub iterations_used: usize,
    pub terminated_reason: TerminatedReason,
    /// Full conversation of the run
    pub trace: Vec<Message>,
    /// Structured events, in emission order
    pub events: Vec<TraceEvent>,
    /// Error description for `provider_error` and `fatal_error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.terminated_reason == TerminatedReason::Completed
    }

    /// Aggregate counters over the trace events
    pub fn metrics(&self) -> RunMetrics {
        self.events
            .iter()
            .fold(RunMetrics::default(), |mut metrics, event| {
                match &event.kind {
                    TraceEventKind::GatewayCall { .. } => metrics.gateway_calls += 1,
                    TraceEventKind::ToolResult {
                        status, elapsed_ms, ..
                    } => {
                        metrics.tool_calls += 1;
                        metrics.total_tool_ms += elapsed_ms;
                        if *status == ToolStatus::Error {
                            metrics.tool_errors += 1;
                        }
                    }
                    TraceEventKind::Delegation { .. } => metrics.delegations += 1,
                    TraceEventKind::DelegationFailed { .. } => metrics.delegation_failures += 1,
                    _ => {}
                }
                metrics
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: TraceEventKind) -> TraceEvent {
        TraceEvent {
            at: Utc::now(),
            agent: "a".to_string(),
            kind,
        }
    }

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&TerminatedReason::IterationLimit).unwrap(),
            "\"iteration_limit\""
        );
        assert_eq!(TerminatedReason::DelegationCycle.to_string(), "delegation_cycle");
        assert!(TerminatedReason::FatalError.is_failure());
        assert!(!TerminatedReason::Cancelled.is_failure());
    }

    #[test]
    fn test_metrics_from_events() {
        let outcome = ExecutionOutcome {
            final_text: String::new(),
            iterations_used: 2,
            terminated_reason: TerminatedReason::Completed,
            trace: Vec::new(),
            events: vec![
                event(TraceEventKind::GatewayCall { iteration: 1 }),
                event(TraceEventKind::ToolResult {
                    id: "1".into(),
                    tool: "t".into(),
                    status: ToolStatus::Ok,
                    elapsed_ms: 5,
                }),
                event(TraceEventKind::ToolResult {
                    id: "2".into(),
                    tool: "t".into(),
                    status: ToolStatus::Error,
                    elapsed_ms: 7,
                }),
                event(TraceEventKind::GatewayCall { iteration: 2 }),
            ],
            error: None,
        };

        let metrics = outcome.metrics();
        assert_eq!(metrics.gateway_calls, 2);
        assert_eq!(metrics.tool_calls, 2);
        assert_eq!(metrics.tool_errors, 1);
        assert_eq!(metrics.total_tool_ms, 12);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(TraceEventKind::Terminal {
            reason: TerminatedReason::Cancelled,
        })
        .unwrap();
        assert_eq!(json["event"], "terminal");
        assert_eq!(json["reason"], "cancelled");
    }
}
