// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! # Token Budget Manager — Spend Guardrails
//!
//! Enforces three ceilings before any model call is admitted: a per-feature
//! token cap on the persona, the persona's daily token allowance per
//! workspace, and the workspace's monthly dollar budget.
//!
//! Approval hands back a [`BudgetReservation`] that pins the estimated
//! tokens and cost in an in-process pending ledger until it is dropped.
//! Concurrent admissions therefore see each other's holds and cannot
//! jointly overshoot a limit that neither would exceed alone. Callers
//! record actual usage before releasing the reservation, so a budget can
//! briefly double-count a job but never lose track of one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::engine_config::BudgetSettings;
use crate::domain::job::WorkspaceId;
use crate::domain::persona::Persona;
use crate::domain::repository::{StoreError, UsageStore};

#[derive(Debug)]
pub enum BudgetDecision {
    Approved(BudgetReservation),
    Rejected { reason: String },
}

/// A hold on the pending ledger, released on drop.
#[derive(Debug)]
pub struct BudgetReservation {
    ledger: Arc<Mutex<PendingLedger>>,
    workspace: WorkspaceId,
    persona: String,
    tokens: u64,
    cost_usd: f64,
}

impl Drop for BudgetReservation {
    fn drop(&mut self) {
        self.ledger
            .lock()
            .release(self.workspace, &self.persona, self.tokens, self.cost_usd);
    }
}

#[derive(Debug, Default)]
struct PendingLedger {
    tokens: HashMap<(WorkspaceId, String), u64>,
    cost_usd: HashMap<WorkspaceId, f64>,
}

impl PendingLedger {
    fn tokens_for(&self, workspace: WorkspaceId, persona: &str) -> u64 {
        self.tokens
            .get(&(workspace, persona.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn cost_for(&self, workspace: WorkspaceId) -> f64 {
        self.cost_usd.get(&workspace).copied().unwrap_or(0.0)
    }

    fn reserve(&mut self, workspace: WorkspaceId, persona: &str, tokens: u64, cost: f64) {
        *self
            .tokens
            .entry((workspace, persona.to_string()))
            .or_insert(0) += tokens;
        *self.cost_usd.entry(workspace).or_insert(0.0) += cost;
    }

    fn release(&mut self, workspace: WorkspaceId, persona: &str, tokens: u64, cost: f64) {
        let key = (workspace, persona.to_string());
        if let Some(held) = self.tokens.get_mut(&key) {
            *held = held.saturating_sub(tokens);
            if *held == 0 {
                self.tokens.remove(&key);
            }
        }
        if let Some(held) = self.cost_usd.get_mut(&workspace) {
            *held = (*held - cost).max(0.0);
            if *held <= f64::EPSILON {
                self.cost_usd.remove(&workspace);
            }
        }
    }
}

pub struct TokenBudgetManager {
    usage: Arc<dyn UsageStore>,
    settings: BudgetSettings,
    pending: Arc<Mutex<PendingLedger>>,
}

impl TokenBudgetManager {
    pub fn new(usage: Arc<dyn UsageStore>, settings: BudgetSettings) -> Self {
        Self {
            usage,
            settings,
            pending: Arc::new(Mutex::new(PendingLedger::default())),
        }
    }

    /// Check all three ceilings and, if the job fits, reserve its estimated
    /// usage. The stored usage is read first; the ledger check and the
    /// reservation then happen under one lock.
    pub async fn check_and_reserve(
        &self,
        workspace: WorkspaceId,
        persona: &Persona,
        feature: &str,
        requested_tokens: u32,
        model: &str,
        skip_feature_ceiling: bool,
    ) -> Result<BudgetDecision, StoreError> {
        // 1. Feature ceiling. An explicit caller override skips this check
        //    entirely; a feature without a configured ceiling has none.
        if !skip_feature_ceiling {
            if let Some(budget) = persona.feature_budget(feature) {
                if requested_tokens > budget.max_tokens {
                    tracing::debug!(
                        persona = %persona.name,
                        feature,
                        requested_tokens,
                        ceiling = budget.max_tokens,
                        "budget check rejected: feature ceiling"
                    );
                    return Ok(BudgetDecision::Rejected {
                        reason: format!(
                            "feature '{}' allows at most {} tokens per job (requested {})",
                            feature, budget.max_tokens, requested_tokens
                        ),
                    });
                }
            }
        }

        let estimate = u64::from(requested_tokens);
        // Preflight has no real split, so price the estimate as both input
        // and output.
        let estimated_cost = self.estimate_cost(model, requested_tokens, requested_tokens);

        let used_today = self
            .usage
            .daily_token_usage(workspace, &persona.name)
            .await?;
        let config = self.usage.workspace_config(workspace).await?;
        let spent_this_month = self.usage.monthly_spend(workspace).await?;

        let mut ledger = self.pending.lock();

        // 2. Daily per-persona tokens, including holds from in-flight jobs.
        let pending_tokens = ledger.tokens_for(workspace, &persona.name);
        if used_today + pending_tokens + estimate > persona.daily_token_limit {
            tracing::debug!(
                persona = %persona.name,
                used_today,
                pending_tokens,
                estimate,
                limit = persona.daily_token_limit,
                "budget check rejected: daily token limit"
            );
            return Ok(BudgetDecision::Rejected {
                reason: format!(
                    "persona '{}' would exceed its daily limit of {} tokens (used {}, reserved {}, requested {})",
                    persona.name, persona.daily_token_limit, used_today, pending_tokens, estimate
                ),
            });
        }

        // 3. Monthly workspace spend. No config, or a disabled one, rejects
        //    regardless of the numbers.
        let config = match config {
            Some(config) if config.enabled => config,
            _ => {
                tracing::debug!(workspace = %workspace, "budget check rejected: AI not enabled");
                return Ok(BudgetDecision::Rejected {
                    reason: format!("AI features are not enabled for workspace {}", workspace),
                });
            }
        };
        let pending_cost = ledger.cost_for(workspace);
        if spent_this_month + pending_cost + estimated_cost > config.monthly_budget_usd {
            tracing::debug!(
                workspace = %workspace,
                spent_this_month,
                pending_cost,
                estimated_cost,
                budget = config.monthly_budget_usd,
                "budget check rejected: monthly budget"
            );
            return Ok(BudgetDecision::Rejected {
                reason: format!(
                    "workspace {} would exceed its monthly budget of ${:.2} (spent ${:.2}, reserved ${:.2}, estimated ${:.2})",
                    workspace, config.monthly_budget_usd, spent_this_month, pending_cost, estimated_cost
                ),
            });
        }

        ledger.reserve(workspace, &persona.name, estimate, estimated_cost);
        drop(ledger);

        Ok(BudgetDecision::Approved(BudgetReservation {
            ledger: Arc::clone(&self.pending),
            workspace,
            persona: persona.name.clone(),
            tokens: estimate,
            cost_usd: estimated_cost,
        }))
    }

    /// Price a token count against the configured per-model rates. Unknown
    /// models fall back to a deliberately high flat rate on both sides.
    pub fn estimate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        match self
            .settings
            .model_rates
            .iter()
            .find(|rate| rate.model == model)
        {
            Some(rate) => {
                f64::from(input_tokens) / 1000.0 * rate.input_per_1k
                    + f64::from(output_tokens) / 1000.0 * rate.output_per_1k
            }
            None => {
                (f64::from(input_tokens) + f64::from(output_tokens)) / 1000.0
                    * self.settings.fallback_cost_per_1k
            }
        }
    }
}
