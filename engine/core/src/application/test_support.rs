//! Shared fixtures for the application-layer tests: a scripted provider in
//! place of a real model API, in-memory stores, and a stock persona.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::budget_manager::TokenBudgetManager;
use crate::application::cascade_guard::CascadeGuard;
use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::execution_runner::StandardExecutionRunner;
use crate::domain::engine_config::{BreakerSettings, BudgetSettings, CascadeSettings};
use crate::domain::job::WorkspaceId;
use crate::domain::persona::{FeatureBudget, Persona};
use crate::domain::provider::{
    CompletionRequest, CompletionResponse, FinishReason, ModelProvider, ProviderError,
};
use crate::domain::repository::WorkspaceAiConfig;
use crate::domain::tool::ToolCall;
use crate::infrastructure::personas::StaticPersonaRegistry;
use crate::infrastructure::repositories::{
    InMemoryCascadeStore, InMemoryJobStore, InMemoryUsageStore,
};

/// Provider double that replays a fixed script of responses and captures
/// every request it sees.
pub(crate) struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(responses: Vec<Result<CompletionResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of completion calls made so far
    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request seen, in call order
    pub(crate) fn captured(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Api("scripted provider ran dry".to_string())))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

pub(crate) fn scripted(
    responses: Vec<Result<CompletionResponse, ProviderError>>,
) -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::new(responses))
}

pub(crate) fn text_response(content: &str, input: u32, output: u32) -> CompletionResponse {
    CompletionResponse {
        content: content.to_string(),
        tool_calls: Vec::new(),
        input_tokens: input,
        output_tokens: output,
        model: "gpt-4o-mini".to_string(),
        finish_reason: FinishReason::Stop,
    }
}

pub(crate) fn tool_calls_response(
    content: &str,
    tool_calls: Vec<ToolCall>,
    input: u32,
    output: u32,
) -> CompletionResponse {
    CompletionResponse {
        content: content.to_string(),
        tool_calls,
        input_tokens: input,
        output_tokens: output,
        model: "gpt-4o-mini".to_string(),
        finish_reason: FinishReason::ToolCalls,
    }
}

pub(crate) fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

pub(crate) fn provider_failure(message: &str) -> ProviderError {
    ProviderError::Api(message.to_string())
}

pub(crate) fn curator() -> Persona {
    let mut features = HashMap::new();
    features.insert("digest".to_string(), FeatureBudget { max_tokens: 2000 });
    Persona {
        name: "curator".to_string(),
        system_prompt: "You curate the archive.".to_string(),
        default_model: "gpt-4o-mini".to_string(),
        default_reasoning_effort: None,
        default_max_tokens: 4096,
        rate_limit_per_hour: 12,
        daily_token_limit: 50_000,
        features,
    }
}

/// Fully wired runner plus handles on everything worth asserting against.
pub(crate) struct EngineFixture {
    pub(crate) runner: Arc<StandardExecutionRunner>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) jobs: Arc<InMemoryJobStore>,
    pub(crate) usage: Arc<InMemoryUsageStore>,
    pub(crate) cascade_store: Arc<InMemoryCascadeStore>,
    pub(crate) workspace: WorkspaceId,
}

/// Build a runner around the given provider: in-memory stores, the
/// `curator` persona, and a workspace with AI enabled and $100 of monthly
/// headroom.
pub(crate) fn fixture(provider: Arc<ScriptedProvider>) -> EngineFixture {
    let jobs = Arc::new(InMemoryJobStore::new());
    let usage = Arc::new(InMemoryUsageStore::new());
    let cascade_store = Arc::new(InMemoryCascadeStore::new());
    let breaker = Arc::new(CircuitBreaker::new((&BreakerSettings::default()).into()));

    let workspace = WorkspaceId::new();
    usage.set_workspace_config(
        workspace,
        WorkspaceAiConfig {
            enabled: true,
            monthly_budget_usd: 100.0,
        },
    );

    let cascade = Arc::new(CascadeGuard::new(
        cascade_store.clone(),
        CascadeSettings::default(),
    ));
    let budget = Arc::new(TokenBudgetManager::new(
        usage.clone(),
        BudgetSettings::default(),
    ));
    let personas = Arc::new(StaticPersonaRegistry::new(vec![curator()]));

    let runner = Arc::new(StandardExecutionRunner::new(
        breaker.clone(),
        cascade,
        budget,
        personas,
        provider,
        jobs.clone(),
        usage.clone(),
    ));

    EngineFixture {
        runner,
        breaker,
        jobs,
        usage,
        cascade_store,
        workspace,
    }
}
