// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! Manifest-backed persona registry. Personas are loaded once from the
//! engine configuration; hosts needing dynamic personas implement
//! [`PersonaRegistry`] themselves.

use std::collections::HashMap;

use crate::domain::engine_config::PersonaConfig;
use crate::domain::persona::{Persona, PersonaRegistry};

pub struct StaticPersonaRegistry {
    personas: HashMap<String, Persona>,
}

impl StaticPersonaRegistry {
    pub fn new(personas: Vec<Persona>) -> Self {
        Self {
            personas: personas
                .into_iter()
                .map(|persona| (persona.name.clone(), persona))
                .collect(),
        }
    }

    pub fn from_configs(configs: Vec<PersonaConfig>) -> Self {
        Self::new(configs.into_iter().map(Persona::from).collect())
    }
}

impl PersonaRegistry for StaticPersonaRegistry {
    fn get(&self, name: &str) -> Option<Persona> {
        self.personas.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.personas.keys().cloned().collect();
        names.sort();
        names
    }
}
