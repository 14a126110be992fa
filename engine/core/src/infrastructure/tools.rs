// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! Tool Registry
//!
//! Provides the tool catalogue offered to the model during agentic runs.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Name-keyed registry of [`Tool`] implementations

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::provider::ToolSpec;
use crate::domain::tool::Tool;

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name; a later registration with the
    /// same name replaces the earlier one.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, "registering tool");
        self.tools.write().unwrap().insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Catalogue advertised to the model, sorted by tool name
    pub fn catalogue(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read().unwrap();
        let mut specs: Vec<ToolSpec> = tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }
}
