//! Agent loop state management
//!
//! Tracks the phase of the tool-calling loop and its iteration budget. Phase
//! changes go through [`AgentLoopState::advance`], which rejects transitions
//! the loop is never supposed to make.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the agent loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    AwaitingCompletion,
    HasToolCalls,
    ExecutingTools,
    Done,
    Failed,
    IterationLimitReached,
}

impl LoopPhase {
    /// Whether the loop has stopped
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopPhase::Done | LoopPhase::Failed | LoopPhase::IterationLimitReached
        )
    }

    fn can_advance_to(self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        match (self, next) {
            // Failure (provider error, cancellation) is reachable from any live phase
            (from, Failed) => !from.is_terminal(),
            (Idle, AwaitingCompletion) => true,
            (AwaitingCompletion, HasToolCalls) | (AwaitingCompletion, Done) => true,
            (HasToolCalls, ExecutingTools) => true,
            (ExecutingTools, AwaitingCompletion) | (ExecutingTools, IterationLimitReached) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Idle => "idle",
            LoopPhase::AwaitingCompletion => "awaiting_completion",
            LoopPhase::HasToolCalls => "has_tool_calls",
            LoopPhase::ExecutingTools => "executing_tools",
            LoopPhase::Done => "done",
            LoopPhase::Failed => "failed",
            LoopPhase::IterationLimitReached => "iteration_limit_reached",
        };
        f.write_str(name)
    }
}

/// An attempted phase change the loop does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: LoopPhase,
    pub to: LoopPhase,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid loop transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// State of the agent loop
#[derive(Debug, Clone)]
pub struct AgentLoopState {
    phase: LoopPhase,
    /// Completion calls issued so far
    iterations: usize,
    /// Maximum allowed completion calls
    max_iterations: usize,
}

impl AgentLoopState {
    /// Create a new loop state with the given iteration budget
    pub fn new(max_iterations: usize) -> Self {
        Self {
            phase: LoopPhase::Idle,
            iterations: 0,
            max_iterations,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Whether another completion call fits in the budget
    pub fn has_budget(&self) -> bool {
        self.iterations < self.max_iterations
    }

    /// Move to the next phase
    ///
    /// Entering `AwaitingCompletion` consumes one iteration.
    pub fn advance(&mut self, next: LoopPhase) -> Result<(), InvalidTransition> {
        if !self.phase.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        if next == LoopPhase::AwaitingCompletion {
            self.iterations += 1;
        }
        self.phase = next;
        Ok(())
    }

    /// After tool execution: stop if the budget is spent
    ///
    /// Returns `true` when the loop moved to `IterationLimitReached`.
    pub fn check_limit(&mut self) -> Result<bool, InvalidTransition> {
        if self.has_budget() {
            return Ok(false);
        }
        self.advance(LoopPhase::IterationLimitReached)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_state_new() {
        let state = AgentLoopState::new(10);
        assert_eq!(state.phase(), LoopPhase::Idle);
        assert_eq!(state.iterations(), 0);
        assert!(state.has_budget());
    }

    #[test]
    fn test_full_cycle_counts_iterations() {
        let mut state = AgentLoopState::new(2);
        state.advance(LoopPhase::AwaitingCompletion).unwrap();
        state.advance(LoopPhase::HasToolCalls).unwrap();
        state.advance(LoopPhase::ExecutingTools).unwrap();
        assert!(!state.check_limit().unwrap());
        state.advance(LoopPhase::AwaitingCompletion).unwrap();
        state.advance(LoopPhase::HasToolCalls).unwrap();
        state.advance(LoopPhase::ExecutingTools).unwrap();

        // Reached max iterations
        assert!(state.check_limit().unwrap());
        assert_eq!(state.phase(), LoopPhase::IterationLimitReached);
        assert_eq!(state.iterations(), 2);
        assert!(state.phase().is_terminal());
    }

    #[test]
    fn test_rejects_invalid_transitions() {
        let mut state = AgentLoopState::new(3);
        assert!(state.advance(LoopPhase::ExecutingTools).is_err());

        state.advance(LoopPhase::AwaitingCompletion).unwrap();
        state.advance(LoopPhase::Done).unwrap();
        let err = state.advance(LoopPhase::Failed).unwrap_err();
        assert_eq!(err.from, LoopPhase::Done);
    }
}
