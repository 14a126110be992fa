// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! Tool
//!
//! Provides the tool contract for agentic execution.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements the tool port and call/result records

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Preview length for trace entries (arguments and results).
pub const TRACE_PREVIEW_LEN: usize = 200;

/// A capability the model can invoke during the agentic loop.
///
/// Timeout contract: a call that outlives its deadline has its future
/// dropped, which cancels it at the next await point. Implementations must
/// tolerate being abandoned mid-flight — no external state may be left
/// half-committed across an await.
///
/// `execute` should return `Err` only for genuine failures; expected domain
/// outcomes ("no results found") belong in the returned text. Either way the
/// loop absorbs failures into error-flagged results and keeps going.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the tool's arguments
    fn parameters(&self) -> serde_json::Value;

    async fn execute(&self, arguments: serde_json::Value) -> anyhow::Result<String>;
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back with the result
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Outcome of one tool call. Failures (tool errors, timeouts, unknown
/// tools) are carried as error-flagged results, never as exceptions.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub content: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

/// One entry of the optional execution trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Loop iteration (1-based) that issued the call
    pub iteration: u32,
    pub tool: String,
    /// Arguments preview, truncated to [`TRACE_PREVIEW_LEN`]
    pub arguments: String,
    /// Result preview, truncated to [`TRACE_PREVIEW_LEN`]
    pub result: String,
    pub duration_ms: u64,
    pub is_error: bool,
}

/// Truncate to `max_len` bytes on a char boundary, marking the cut.
pub fn preview(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        // Find a safe char boundary
        let mut end = max_len;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_passes_short_text_through() {
        assert_eq!(preview("hello", 200), "hello");
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(500);
        let cut = preview(&long, TRACE_PREVIEW_LEN);
        assert_eq!(cut.len(), TRACE_PREVIEW_LEN + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        // Multibyte content must not be split inside a code point
        let emoji = "🦀".repeat(100);
        let cut = preview(&emoji, 10);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 13);
    }
}
