// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::provider::ReasoningEffort;

/// A configured AI persona: the unit everything in the engine is keyed on.
/// Gates (rate limits, daily budgets, feature ceilings) and call defaults
/// all come from here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    /// Unique persona name (also the self-trigger tag suffix, `persona:<name>`)
    pub name: String,

    pub system_prompt: String,

    pub default_model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_reasoning_effort: Option<ReasoningEffort>,

    pub default_max_tokens: u32,

    /// Jobs allowed per trailing hour (cascade guard)
    pub rate_limit_per_hour: u32,

    /// Input + output tokens allowed per UTC day (budget manager)
    pub daily_token_limit: u64,

    /// Per-feature call ceilings, keyed by feature name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub features: HashMap<String, FeatureBudget>,
}

/// Token ceiling for a single feature of a persona
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureBudget {
    pub max_tokens: u32,
}

impl Persona {
    /// Ceiling for a feature, when the persona defines one
    pub fn feature_budget(&self, feature: &str) -> Option<FeatureBudget> {
        self.features.get(feature).copied()
    }

    /// Tag that marks content this persona already acted on
    pub fn trigger_tag(&self) -> String {
        format!("persona:{}", self.name)
    }
}

/// Name-keyed lookup of persona definitions. The engine ships a
/// manifest-backed implementation; hosts may bring their own.
pub trait PersonaRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Persona>;

    fn names(&self) -> Vec<String>;
}
