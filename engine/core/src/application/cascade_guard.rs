// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! # Cascade Guard — Automation Loop Containment (ADR-011)
//!
//! Stops runaway persona automation before a job is ever created: a persona
//! re-triggering on content it already processed, chains of personas
//! triggering each other past the allowed depth, and per-persona bursts.
//!
//! Checks run sequentially and short-circuit on the first rejection. A
//! rejection here is a policy outcome — it happens pre-admission and never
//! counts against the circuit breaker.

use std::sync::Arc;

use crate::domain::engine_config::CascadeSettings;
use crate::domain::job::JobId;
use crate::domain::persona::Persona;
use crate::domain::repository::{CascadeStore, StoreError};

#[derive(Debug, Clone, Default)]
pub struct CascadeCheckInput {
    /// Entity the action targets (tag check is skipped when absent)
    pub target_id: Option<String>,

    /// Job whose output triggered this request, if any
    pub parent_job_id: Option<JobId>,
}

#[derive(Debug, Clone)]
pub struct CascadeDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Cascade depth the new job will carry (parent depth + 1)
    pub depth: u32,
}

impl CascadeDecision {
    fn allow(depth: u32) -> Self {
        Self {
            allowed: true,
            reason: None,
            depth,
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            depth: 0,
        }
    }
}

pub struct CascadeGuard {
    store: Arc<dyn CascadeStore>,
    settings: CascadeSettings,
}

impl CascadeGuard {
    pub fn new(store: Arc<dyn CascadeStore>, settings: CascadeSettings) -> Self {
        Self { store, settings }
    }

    /// Run the three checks in order: self-trigger tag, depth, hourly rate.
    pub async fn check(
        &self,
        persona: &Persona,
        input: &CascadeCheckInput,
    ) -> Result<CascadeDecision, StoreError> {
        // 1. Self-trigger: the persona's own tag on the target means it
        //    already acted there; acting again would loop.
        if let Some(target_id) = &input.target_id {
            let tag = persona.trigger_tag();
            let tags = self.store.trigger_tags(target_id).await?;
            if tags.iter().any(|t| t == &tag) {
                tracing::debug!(
                    persona = %persona.name,
                    target = %target_id,
                    "cascade check rejected: self-trigger tag present"
                );
                return Ok(CascadeDecision::reject(format!(
                    "target '{}' was already processed by persona '{}' (tag '{}' present)",
                    target_id, persona.name, tag
                )));
            }
        }

        // 2. Depth: every engine job sits one hop below its parent; the
        //    default limit of 1 allows exactly one automatic hop.
        let parent_depth = self.store.parent_job_depth(input.parent_job_id).await?;
        let depth = parent_depth + 1;
        if depth > self.settings.max_depth {
            tracing::debug!(
                persona = %persona.name,
                depth,
                max_depth = self.settings.max_depth,
                "cascade check rejected: depth limit"
            );
            return Ok(CascadeDecision::reject(format!(
                "cascade depth {} exceeds the maximum of {}",
                depth, self.settings.max_depth
            )));
        }

        // 3. Hourly rate: trailing-window job count for the persona.
        let recent = self
            .store
            .count_recent_jobs(&persona.name, self.settings.rate_window_hours)
            .await?;
        if recent >= u64::from(persona.rate_limit_per_hour) {
            tracing::debug!(
                persona = %persona.name,
                recent,
                limit = persona.rate_limit_per_hour,
                "cascade check rejected: hourly rate limit"
            );
            return Ok(CascadeDecision::reject(format!(
                "persona '{}' already ran {} jobs in the last {} hour(s) (limit {})",
                persona.name, recent, self.settings.rate_window_hours, persona.rate_limit_per_hour
            )));
        }

        Ok(CascadeDecision::allow(depth))
    }
}
