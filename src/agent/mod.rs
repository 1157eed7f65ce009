//! Agent module - the tool-calling loop and its supporting types
//!
//! An [`Agent`] runs one [`AgentSpec`] against a completion gateway and
//! reports an [`ExecutionOutcome`] for every run.

pub mod conversation;
pub mod loop_state;
pub mod outcome;
pub mod runner;
pub mod sink;
pub mod spec;

pub use conversation::Conversation;
pub use loop_state::{AgentLoopState, InvalidTransition, LoopPhase};
pub use outcome::{ExecutionOutcome, RunMetrics, TerminatedReason, TraceEvent, TraceEventKind};
pub use runner::Agent;
pub use sink::{JsonlSink, MemorySink, RunRecord, RunSink};
pub use spec::{AgentSpec, AgentSpecBuilder};
