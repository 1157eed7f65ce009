//! Coordinator module - multi-agent delegation
//!
//! A [`Coordinator`] owns a team of agents, routes subtasks to them each round
//! and aggregates their results into one [`crate::agent::ExecutionOutcome`].

pub mod aggregation;
pub mod routing;
pub mod supervisor;

pub use aggregation::{aggregation_instruction, parse_aggregation, Aggregation};
pub use routing::{
    parse_decision, supervisor_prompt, AgentProfile, Assignment, FixedRouter, ModelRouter,
    RoutingContext, RoutingDecision, RoutingStrategy,
};
pub use supervisor::{Coordinator, CoordinatorBuilder};
