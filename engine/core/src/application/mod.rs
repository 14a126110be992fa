// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

pub mod circuit_breaker;
pub mod cascade_guard;
pub mod budget_manager;
pub mod execution_runner;
pub mod agentic_runner;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the runner surface for convenience
pub use execution_runner::{
    ExecutionOptions, ExecutionOutcome, ExecutionRequest, ExecutionRunner, StandardExecutionRunner,
};
pub use agentic_runner::{AgenticRunner, StandardAgenticRunner};
pub use budget_manager::{BudgetDecision, BudgetReservation, TokenBudgetManager};
pub use cascade_guard::{CascadeCheckInput, CascadeDecision, CascadeGuard};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
