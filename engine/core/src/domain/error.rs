// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::provider::ProviderError;
use crate::domain::repository::StoreError;

/// Everything a runner can fail with. A closed set so callers branch on
/// structure — policy rejections, provider faults and store faults are
/// distinct variants, never distinguished by message text.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A pre-flight gate said no. Raised before any Job exists and never
    /// counted against the circuit breaker. `reason` is operator-readable
    /// and surfaced verbatim.
    #[error("{reason}")]
    PolicyRejected { stage: PolicyStage, reason: String },

    #[error("model provider call failed: {0}")]
    Provider(#[from] ProviderError),

    /// The iteration ceiling was hit and the forced synthesis call itself
    /// failed. The graceful ceiling path (synthesis succeeds, or yields a
    /// placeholder) completes normally and never produces this.
    #[error("tool loop exhausted after {iterations} iterations: {source}")]
    ToolLoopExhausted {
        iterations: u32,
        source: ProviderError,
    },

    #[error("persona '{0}' is not registered")]
    UnknownPersona(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Which gate rejected the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyStage {
    CircuitBreaker,
    Cascade,
    Budget,
}

impl EngineError {
    /// True for pre-flight rejections (as opposed to execution faults)
    pub fn is_rejection(&self) -> bool {
        matches!(self, EngineError::PolicyRejected { .. })
    }
}

impl std::fmt::Display for PolicyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyStage::CircuitBreaker => "circuit_breaker",
            PolicyStage::Cascade => "cascade",
            PolicyStage::Budget => "budget",
        };
        f.write_str(s)
    }
}
