// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod db;
pub mod llm;
pub mod personas;
pub mod tools;

pub use personas::StaticPersonaRegistry;
pub use tools::ToolRegistry;
