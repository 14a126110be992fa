// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

// Model Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Each adapter translates between the domain provider interface and one
// vendor's wire format. The registry routes by model name so the runners
// stay adapter-agnostic.

pub mod openai;
pub mod anthropic;
pub mod registry;

pub use registry::ProviderRegistry;
