// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! Provider
//!
//! Provides the model provider interface for the engine.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements the model provider port

// Model Provider Domain Interface (Anti-Corruption Layer)
//
// Defines the domain interface for chat-completion providers following DDD
// principles. Prevents vendor lock-in by abstracting external model APIs,
// including tool calling.
//
// Implementations in infrastructure/llm/ directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationMessage;
use crate::domain::tool::ToolCall;

/// Domain interface for model providers
/// Anti-Corruption Layer that isolates the runners from vendor APIs
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run one chat completion
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is healthy and accessible
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// One chat-completion call, fully resolved (model, limits, catalogue)
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier (e.g. "gpt-4o", "claude-sonnet-4-5")
    pub model: String,

    /// System prompt, sent out-of-band from the message list
    pub system: Option<String>,

    /// Ordered conversation history, oldest first
    pub messages: Vec<ConversationMessage>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Reasoning effort hint for models that support it
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Tool catalogue offered to the model (empty = plain completion)
    pub tools: Vec<ToolSpec>,

    /// Whether the model may pick tools from the catalogue
    pub tool_choice: ToolChoice,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ConversationMessage>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            max_tokens: 4096,
            reasoning_effort: None,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }
}

/// Catalogue entry advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides whether to call tools
    Auto,
    /// Tool calls are disallowed (used for the synthesis pass)
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text (may be empty when the model only requests tools)
    pub content: String,

    /// Tool calls requested by the model, in the order it issued them
    pub tool_calls: Vec<ToolCall>,

    pub input_tokens: u32,
    pub output_tokens: u32,

    /// Model that actually served the call
    pub model: String,

    /// Why generation stopped
    pub finish_reason: FinishReason,
}

impl CompletionResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Transient degenerate response: nothing to say, nothing to do.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Reason why generation stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural completion (model decided to stop)
    Stop,

    /// Model requested tool execution
    ToolCalls,

    /// Hit max_tokens limit
    Length,

    /// Provider-specific reason passed through verbatim
    Other(String),
}

/// Running input/output token sums across every call of one job.
/// Totals only ever grow; retries and the synthesis pass all count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub input: u32,
    pub output: u32,
}

impl TokenTotals {
    pub fn add(&mut self, response: &CompletionResponse) {
        self.input = self.input.saturating_add(response.input_tokens);
        self.output = self.output.saturating_add(response.output_tokens);
    }

    pub fn combined(&self) -> u64 {
        u64::from(self.input) + u64::from(self.output)
    }
}

/// Errors that can occur during provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
