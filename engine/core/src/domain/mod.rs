// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements mod

pub mod conversation;
pub mod engine_config;
pub mod error;
pub mod job;
pub mod persona;
pub mod provider;
pub mod repository;
pub mod tool;
