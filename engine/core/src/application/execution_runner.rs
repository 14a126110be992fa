use crate::application::budget_manager::{BudgetDecision, BudgetReservation, TokenBudgetManager};
use crate::application::cascade_guard::{CascadeCheckInput, CascadeGuard};
use crate::application::circuit_breaker::CircuitBreaker;
use crate::domain::conversation::ConversationMessage;
use crate::domain::error::{EngineError, PolicyStage};
use crate::domain::job::{JobId, JobInput, JobOutput, JobStatus, WorkspaceId};
use crate::domain::persona::{Persona, PersonaRegistry};
use crate::domain::provider::{
    CompletionRequest, CompletionResponse, ModelProvider, ProviderError, ReasoningEffort,
    TokenTotals,
};
use crate::domain::repository::{JobStore, JobUpdate, StoreError, UsageRecord, UsageStore};
use crate::domain::tool::TraceEntry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// One persona invocation as submitted by the host application.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub workspace_id: WorkspaceId,
    pub persona: String,
    pub feature: String,
    pub prompt: String,
    /// Prior conversation turns sent ahead of the prompt
    pub context: Vec<ConversationMessage>,
    /// Entity the action targets (drives the self-trigger check)
    pub target_id: Option<String>,
    /// Job whose output triggered this request, if any
    pub parent_job_id: Option<JobId>,
    pub options: ExecutionOptions,
}

impl ExecutionRequest {
    pub fn new(
        workspace_id: WorkspaceId,
        persona: impl Into<String>,
        feature: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id,
            persona: persona.into(),
            feature: feature.into(),
            prompt: prompt.into(),
            context: Vec::new(),
            target_id: None,
            parent_job_id: None,
            options: ExecutionOptions::default(),
        }
    }
}

/// Caller overrides; anything unset falls back to the persona.
/// An explicit `max_tokens` also waives the per-feature ceiling.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Capture a per-tool-call trace in the job output (agentic runs only)
    pub trace: bool,
}

/// What the caller gets back from a finished job
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub job_id: JobId,
    pub content: String,
    pub iterations: u32,
    pub max_iterations_reached: bool,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    /// Model the job was resolved to at admission
    pub model: String,
    pub trace: Option<Vec<TraceEntry>>,
}

#[async_trait]
pub trait ExecutionRunner: Send + Sync {
    /// Run a single-shot completion (no tools) through the full pipeline:
    /// gates, job record, model call, usage accounting.
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, EngineError>;
}

/// An admitted request: every gate passed, the job row exists, and the
/// estimated usage is held in the budget ledger until `reservation` drops.
pub(crate) struct Admission {
    pub(crate) job_id: JobId,
    pub(crate) persona: Persona,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    pub(crate) reasoning_effort: Option<ReasoningEffort>,
    #[allow(dead_code)]
    pub(crate) reservation: BudgetReservation,
}

pub struct StandardExecutionRunner {
    breaker: Arc<CircuitBreaker>,
    cascade: Arc<CascadeGuard>,
    budget: Arc<TokenBudgetManager>,
    personas: Arc<dyn PersonaRegistry>,
    provider: Arc<dyn ModelProvider>,
    jobs: Arc<dyn JobStore>,
    usage: Arc<dyn UsageStore>,
}

impl StandardExecutionRunner {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        cascade: Arc<CascadeGuard>,
        budget: Arc<TokenBudgetManager>,
        personas: Arc<dyn PersonaRegistry>,
        provider: Arc<dyn ModelProvider>,
        jobs: Arc<dyn JobStore>,
        usage: Arc<dyn UsageStore>,
    ) -> Self {
        Self {
            breaker,
            cascade,
            budget,
            personas,
            provider,
            jobs,
            usage,
        }
    }

    /// Run the admission pipeline: breaker, cascade guard, budget, then the
    /// job record. Rejections raise [`EngineError::PolicyRejected`] and are
    /// invisible to the circuit breaker.
    pub(crate) async fn admit(&self, request: &ExecutionRequest) -> Result<Admission, EngineError> {
        // 1. Resolve the persona
        let persona = self
            .personas
            .get(&request.persona)
            .ok_or_else(|| EngineError::UnknownPersona(request.persona.clone()))?;

        // 2. Circuit breaker
        if !self.breaker.can_execute() {
            tracing::warn!(
                persona = %persona.name,
                feature = %request.feature,
                "request rejected: circuit breaker is open"
            );
            return Err(EngineError::PolicyRejected {
                stage: PolicyStage::CircuitBreaker,
                reason: "Circuit breaker is open".to_string(),
            });
        }

        // 3. Cascade guard
        let cascade_input = CascadeCheckInput {
            target_id: request.target_id.clone(),
            parent_job_id: request.parent_job_id,
        };
        let decision = self.cascade.check(&persona, &cascade_input).await?;
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "cascade check rejected the request".to_string());
            tracing::warn!(persona = %persona.name, %reason, "request rejected by cascade guard");
            return Err(EngineError::PolicyRejected {
                stage: PolicyStage::Cascade,
                reason,
            });
        }

        // 4. Resolve call parameters: explicit option, then feature ceiling,
        //    then persona default
        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| persona.default_model.clone());
        let max_tokens = request
            .options
            .max_tokens
            .or_else(|| {
                persona
                    .feature_budget(&request.feature)
                    .map(|budget| budget.max_tokens)
            })
            .unwrap_or(persona.default_max_tokens);
        let reasoning_effort = request
            .options
            .reasoning_effort
            .or(persona.default_reasoning_effort);

        // 5. Budget check; approval holds the estimate until the job settles
        let skip_feature_ceiling = request.options.max_tokens.is_some();
        let budget_decision = self
            .budget
            .check_and_reserve(
                request.workspace_id,
                &persona,
                &request.feature,
                max_tokens,
                &model,
                skip_feature_ceiling,
            )
            .await?;
        let reservation = match budget_decision {
            BudgetDecision::Approved(reservation) => reservation,
            BudgetDecision::Rejected { reason } => {
                tracing::warn!(persona = %persona.name, %reason, "request rejected by budget manager");
                return Err(EngineError::PolicyRejected {
                    stage: PolicyStage::Budget,
                    reason,
                });
            }
        };

        // 6. Create the job record
        let input = JobInput {
            prompt: request.prompt.clone(),
            model: model.clone(),
            max_tokens,
            reasoning_effort,
            context_messages: request.context.len() as u32,
        };
        let job_id = self
            .jobs
            .create_job(
                request.workspace_id,
                &persona.name,
                &request.feature,
                decision.depth,
                input,
            )
            .await?;

        tracing::info!(
            job_id = %job_id,
            persona = %persona.name,
            feature = %request.feature,
            %model,
            depth = decision.depth,
            "job admitted"
        );

        Ok(Admission {
            job_id,
            persona,
            model,
            max_tokens,
            reasoning_effort,
            reservation,
        })
    }

    pub(crate) async fn mark_running(&self, job_id: JobId) -> Result<(), StoreError> {
        self.jobs
            .update_job_status(
                job_id,
                JobStatus::Running,
                JobUpdate {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
    }

    /// One provider call with the shared degenerate-response retry: an empty
    /// response (no text, no tool calls) is retried once, and both attempts
    /// count toward the totals.
    pub(crate) async fn call_model(
        &self,
        request: CompletionRequest,
        totals: &mut TokenTotals,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.provider.complete(request.clone()).await?;
        totals.add(&response);
        if !response.is_empty() {
            return Ok(response);
        }

        tracing::warn!(model = %request.model, "provider returned an empty response, retrying once");
        let retry = self.provider.complete(request).await?;
        totals.add(&retry);
        Ok(retry)
    }

    /// Settle a finished job: persist the usage row, complete the job record,
    /// then clear the breaker. Store failures here flow into the uniform
    /// failure path, so the breaker is only touched on a fully settled job.
    pub(crate) async fn finish_success(
        &self,
        request: &ExecutionRequest,
        admission: &Admission,
        output: JobOutput,
        totals: TokenTotals,
    ) -> Result<ExecutionOutcome, EngineError> {
        let cost_usd = self
            .budget
            .estimate_cost(&admission.model, totals.input, totals.output);

        self.usage
            .record_usage(UsageRecord {
                workspace: request.workspace_id,
                persona: admission.persona.name.clone(),
                feature: request.feature.clone(),
                job_id: admission.job_id,
                model: admission.model.clone(),
                input_tokens: totals.input,
                output_tokens: totals.output,
                cost_usd,
                recorded_at: Utc::now(),
            })
            .await?;

        self.jobs
            .update_job_status(
                admission.job_id,
                JobStatus::Completed,
                JobUpdate {
                    output: Some(output.clone()),
                    input_tokens: Some(totals.input),
                    output_tokens: Some(totals.output),
                    cost_usd: Some(cost_usd),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        self.breaker.record_success();

        tracing::info!(
            job_id = %admission.job_id,
            input_tokens = totals.input,
            output_tokens = totals.output,
            cost_usd,
            iterations = output.iterations,
            "job completed"
        );

        Ok(ExecutionOutcome {
            job_id: admission.job_id,
            content: output.content,
            iterations: output.iterations,
            max_iterations_reached: output.max_iterations_reached,
            input_tokens: totals.input,
            output_tokens: totals.output,
            cost_usd,
            model: admission.model.clone(),
            trace: output.trace,
        })
    }

    /// Uniform post-admission failure handling: count the failure against
    /// the breaker and mark the job failed. A store failure while writing
    /// the terminal state is logged, never allowed to mask the original
    /// error.
    pub(crate) async fn finish_failure(&self, job_id: JobId, error: &EngineError) {
        self.breaker.record_failure();

        let update = JobUpdate {
            error: Some(error.to_string()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(store_error) = self
            .jobs
            .update_job_status(job_id, JobStatus::Failed, update)
            .await
        {
            tracing::warn!(
                job_id = %job_id,
                %store_error,
                "could not persist job failure"
            );
        }

        tracing::warn!(job_id = %job_id, %error, "job failed");
    }

    async fn drive_single(
        &self,
        request: &ExecutionRequest,
        admission: &Admission,
        totals: &mut TokenTotals,
    ) -> Result<JobOutput, EngineError> {
        self.mark_running(admission.job_id).await?;

        let mut messages = request.context.clone();
        messages.push(ConversationMessage::user(request.prompt.clone()));

        let mut completion = CompletionRequest::new(admission.model.clone(), messages);
        completion.system = Some(admission.persona.system_prompt.clone());
        completion.max_tokens = admission.max_tokens;
        completion.reasoning_effort = admission.reasoning_effort;

        let response = self.call_model(completion, totals).await?;

        Ok(JobOutput {
            content: response.content,
            iterations: 1,
            max_iterations_reached: false,
            trace: None,
        })
    }
}

#[async_trait]
impl ExecutionRunner for StandardExecutionRunner {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, EngineError> {
        let admission = self.admit(&request).await?;

        let mut totals = TokenTotals::default();
        let driven = self.drive_single(&request, &admission, &mut totals).await;

        let settled = match driven {
            Ok(output) => {
                self.finish_success(&request, &admission, output, totals)
                    .await
            }
            Err(error) => Err(error),
        };

        match settled {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.finish_failure(admission.job_id, &error).await;
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{
        fixture, provider_failure, scripted, text_response, EngineFixture,
    };
    use crate::domain::provider::FinishReason;

    fn request(fixture: &EngineFixture) -> ExecutionRequest {
        ExecutionRequest::new(fixture.workspace, "curator", "ad_hoc", "Summarise the thread")
    }

    #[tokio::test]
    async fn completes_a_job_and_records_usage() {
        let provider = scripted(vec![Ok(text_response("All set.", 120, 48))]);
        let env = fixture(provider.clone());

        let outcome = env.runner.run(request(&env)).await.unwrap();

        assert_eq!(outcome.content, "All set.");
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.max_iterations_reached);
        assert_eq!(outcome.input_tokens, 120);
        assert_eq!(outcome.output_tokens, 48);
        assert_eq!(outcome.model, "gpt-4o-mini");
        assert!(outcome.trace.is_none());

        let job = env.jobs.get_job(outcome.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert_eq!(job.input_tokens, 120);
        assert_eq!(job.output_tokens, 48);
        assert_eq!(job.depth, 1);

        assert_eq!(env.usage.recorded().len(), 1);
        assert_eq!(env.breaker.snapshot().total_successes, 1);
    }

    #[tokio::test]
    async fn unknown_persona_fails_before_any_gate() {
        let provider = scripted(vec![]);
        let env = fixture(provider.clone());

        let mut req = request(&env);
        req.persona = "ghost".to_string();
        let error = env.runner.run(req).await.unwrap_err();

        assert!(matches!(error, EngineError::UnknownPersona(ref name) if name == "ghost"));
        assert_eq!(provider.calls(), 0);
        assert_eq!(env.jobs.job_count(), 0);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_creating_a_job() {
        let provider = scripted(vec![]);
        let env = fixture(provider.clone());
        for _ in 0..3 {
            env.breaker.record_failure();
        }

        let error = env.runner.run(request(&env)).await.unwrap_err();

        match error {
            EngineError::PolicyRejected { stage, reason } => {
                assert_eq!(stage, PolicyStage::CircuitBreaker);
                assert_eq!(reason, "Circuit breaker is open");
            }
            other => panic!("expected a breaker rejection, got {other:?}"),
        }
        assert_eq!(provider.calls(), 0);
        assert_eq!(env.jobs.job_count(), 0);
    }

    #[tokio::test]
    async fn cascade_rejection_never_touches_the_breaker() {
        let provider = scripted(vec![]);
        let env = fixture(provider.clone());
        env.cascade_store
            .set_tags("doc-42", vec!["persona:curator".to_string()]);

        let mut req = request(&env);
        req.target_id = Some("doc-42".to_string());
        let error = env.runner.run(req).await.unwrap_err();

        assert!(error.is_rejection());
        assert!(matches!(
            error,
            EngineError::PolicyRejected {
                stage: PolicyStage::Cascade,
                ..
            }
        ));
        let snapshot = env.breaker.snapshot();
        assert_eq!(snapshot.total_failures, 0);
        assert_eq!(env.jobs.job_count(), 0);
    }

    #[tokio::test]
    async fn budget_rejection_reports_its_stage() {
        let provider = scripted(vec![]);
        let env = fixture(provider.clone());
        // Wipe the workspace config so the monthly check rejects
        env.usage.clear_workspace_config(env.workspace);

        let error = env.runner.run(request(&env)).await.unwrap_err();

        match error {
            EngineError::PolicyRejected { stage, reason } => {
                assert_eq!(stage, PolicyStage::Budget);
                assert!(reason.contains("not enabled"));
            }
            other => panic!("expected a budget rejection, got {other:?}"),
        }
        assert_eq!(env.jobs.job_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_marks_the_job_failed_and_trips_the_breaker() {
        let provider = scripted(vec![Err(provider_failure("upstream exploded"))]);
        let env = fixture(provider.clone());

        let error = env.runner.run(request(&env)).await.unwrap_err();

        assert!(matches!(error, EngineError::Provider(_)));
        assert_eq!(env.breaker.snapshot().consecutive_failures, 1);

        let job = env.jobs.latest_job().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("upstream exploded"));
        // Nothing settled, so no usage row
        assert!(env.usage.recorded().is_empty());
    }

    #[tokio::test]
    async fn empty_response_is_retried_once() {
        let provider = scripted(vec![
            Ok(text_response("", 10, 0)),
            Ok(text_response("Hello again", 10, 5)),
        ]);
        let env = fixture(provider.clone());

        let outcome = env.runner.run(request(&env)).await.unwrap();

        assert_eq!(outcome.content, "Hello again");
        assert_eq!(provider.calls(), 2);
        // Both attempts count toward the job's totals
        assert_eq!(outcome.input_tokens, 20);
        assert_eq!(outcome.output_tokens, 5);
    }

    #[tokio::test]
    async fn explicit_options_override_persona_defaults() {
        let provider = scripted(vec![Ok(text_response("ok", 5, 5))]);
        let env = fixture(provider.clone());

        let mut req = request(&env);
        req.feature = "digest".to_string();
        req.options.model = Some("claude-sonnet-4-5".to_string());
        req.options.max_tokens = Some(8192);

        env.runner.run(req).await.unwrap();

        let seen = provider.captured();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, "claude-sonnet-4-5");
        // The digest feature caps at 2000, but an explicit limit waives it
        assert_eq!(seen[0].max_tokens, 8192);
    }

    #[tokio::test]
    async fn feature_ceiling_caps_the_default_limit() {
        let provider = scripted(vec![Ok(text_response("ok", 5, 5))]);
        let env = fixture(provider.clone());

        let mut req = request(&env);
        req.feature = "digest".to_string();

        env.runner.run(req).await.unwrap();

        let seen = provider.captured();
        assert_eq!(seen[0].max_tokens, 2000);
        assert_eq!(seen[0].system.as_deref(), Some("You curate the archive."));
        assert!(seen[0].reasoning_effort.is_none());
    }

    #[tokio::test]
    async fn context_messages_precede_the_prompt() {
        let provider = scripted(vec![Ok(text_response("ok", 5, 5))]);
        let env = fixture(provider.clone());

        let mut req = request(&env);
        req.context = vec![
            ConversationMessage::user("earlier question"),
            ConversationMessage::assistant("earlier answer"),
        ];

        let outcome = env.runner.run(req).await.unwrap();

        let seen = provider.captured();
        assert_eq!(seen[0].messages.len(), 3);
        assert_eq!(seen[0].messages[2].content, "Summarise the thread");

        let job = env.jobs.get_job(outcome.job_id).await.unwrap().unwrap();
        assert_eq!(job.input.context_messages, 2);
    }

    // Sanity check on the response fixture itself
    #[test]
    fn text_response_fixture_is_a_plain_stop() {
        let response = text_response("hi", 1, 2);
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert!(!response.has_tool_calls());
    }
}
