//! # Agentic Runner — Bounded Tool Loop
//!
//! Drives the model/tool conversation for one job: offer the tool
//! catalogue, execute whatever the model calls, feed the results back, and
//! repeat until the model answers in plain text or the iteration ceiling
//! is hit. At the ceiling the runner makes exactly one more call with
//! tools withheld so the model has to synthesise a final answer from what
//! it gathered.
//!
//! Tool calls within an iteration run concurrently, each under its own
//! deadline. A failing, timed-out or unknown tool never aborts the job;
//! the failure is flagged and returned to the model, which decides what to
//! do about it.

use crate::application::execution_runner::{
    Admission, ExecutionOutcome, ExecutionRequest, StandardExecutionRunner,
};
use crate::domain::conversation::ConversationMessage;
use crate::domain::engine_config::AgenticSettings;
use crate::domain::error::EngineError;
use crate::domain::job::JobOutput;
use crate::domain::provider::{CompletionRequest, TokenTotals, ToolChoice};
use crate::domain::tool::{preview, ToolCall, ToolResult, TraceEntry, TRACE_PREVIEW_LEN};
use crate::infrastructure::tools::ToolRegistry;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;

/// Instruction appended for the forced synthesis pass
const SYNTHESIS_INSTRUCTION: &str = "You have reached the maximum number of tool iterations. \
     Provide your final response based on the information gathered so far.";

/// Stand-in content when even the synthesis pass comes back blank
const EXHAUSTED_PLACEHOLDER: &str =
    "Reached the tool iteration limit before a final response could be produced.";

#[async_trait]
pub trait AgenticRunner: Send + Sync {
    /// Run a tool-enabled job through the full pipeline. Same gates and
    /// settlement as the single-shot runner; the model call in the middle
    /// becomes the bounded tool loop.
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, EngineError>;
}

pub struct StandardAgenticRunner {
    pipeline: Arc<StandardExecutionRunner>,
    tools: Arc<ToolRegistry>,
    settings: AgenticSettings,
}

impl StandardAgenticRunner {
    pub fn new(
        pipeline: Arc<StandardExecutionRunner>,
        tools: Arc<ToolRegistry>,
        settings: AgenticSettings,
    ) -> Self {
        Self {
            pipeline,
            tools,
            settings,
        }
    }

    async fn drive_loop(
        &self,
        request: &ExecutionRequest,
        admission: &Admission,
        totals: &mut TokenTotals,
    ) -> Result<JobOutput, EngineError> {
        self.pipeline.mark_running(admission.job_id).await?;

        let catalogue = self.tools.catalogue();
        let mut messages = request.context.clone();
        messages.push(ConversationMessage::user(request.prompt.clone()));
        let collect_trace = request.options.trace;
        let mut trace: Vec<TraceEntry> = Vec::new();

        for iteration in 1..=self.settings.max_iterations {
            let mut completion =
                CompletionRequest::new(admission.model.clone(), messages.clone());
            completion.system = Some(admission.persona.system_prompt.clone());
            completion.max_tokens = admission.max_tokens;
            completion.reasoning_effort = admission.reasoning_effort;
            completion.tools = catalogue.clone();

            let response = self.pipeline.call_model(completion, totals).await?;

            if !response.has_tool_calls() {
                tracing::debug!(
                    job_id = %admission.job_id,
                    iteration,
                    "model answered without tool calls"
                );
                return Ok(JobOutput {
                    content: response.content,
                    iterations: iteration,
                    max_iterations_reached: false,
                    trace: collect_trace.then_some(trace),
                });
            }

            tracing::debug!(
                job_id = %admission.job_id,
                iteration,
                calls = response.tool_calls.len(),
                "executing tool calls"
            );

            messages.push(ConversationMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            let results = self.execute_calls(&response.tool_calls).await;
            if collect_trace {
                for (call, result) in response.tool_calls.iter().zip(&results) {
                    trace.push(TraceEntry {
                        iteration,
                        tool: call.name.clone(),
                        arguments: preview(&call.arguments.to_string(), TRACE_PREVIEW_LEN),
                        result: preview(&result.content, TRACE_PREVIEW_LEN),
                        duration_ms: result.duration_ms,
                        is_error: result.is_error,
                    });
                }
            }
            for result in results {
                messages.push(ConversationMessage::tool_result(
                    result.call_id,
                    result.content,
                    result.is_error,
                ));
            }
        }

        // Ceiling reached: one last call, tools withheld, so the model must
        // answer with what it has.
        tracing::info!(
            job_id = %admission.job_id,
            iterations = self.settings.max_iterations,
            "iteration ceiling reached, forcing synthesis"
        );
        messages.push(ConversationMessage::user(SYNTHESIS_INSTRUCTION));

        let mut synthesis = CompletionRequest::new(admission.model.clone(), messages);
        synthesis.system = Some(admission.persona.system_prompt.clone());
        synthesis.max_tokens = admission.max_tokens;
        synthesis.reasoning_effort = admission.reasoning_effort;
        synthesis.tool_choice = ToolChoice::None;

        match self.pipeline.call_model(synthesis, totals).await {
            Ok(response) => {
                let content = if response.content.trim().is_empty() {
                    EXHAUSTED_PLACEHOLDER.to_string()
                } else {
                    response.content
                };
                Ok(JobOutput {
                    content,
                    iterations: self.settings.max_iterations + 1,
                    max_iterations_reached: true,
                    trace: collect_trace.then_some(trace),
                })
            }
            Err(source) => Err(EngineError::ToolLoopExhausted {
                iterations: self.settings.max_iterations,
                source,
            }),
        }
    }

    /// Execute one iteration's calls concurrently. Results come back in the
    /// order the model issued the calls, regardless of which finished first.
    async fn execute_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.execute_one(call))).await
    }

    async fn execute_one(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();

        let outcome = match self.tools.get(&call.name) {
            None => Err(format!(
                "Unknown tool '{}'. Available tools: {}",
                call.name,
                self.tools.names().join(", ")
            )),
            Some(tool) => {
                let deadline = self.settings.tool_timeout();
                match tokio::time::timeout(deadline, tool.execute(call.arguments.clone())).await {
                    Ok(Ok(content)) => Ok(content),
                    Ok(Err(error)) => Err(format!("Tool '{}' failed: {}", call.name, error)),
                    Err(_) => Err(format!(
                        "Tool '{}' timed out after {}ms",
                        call.name, self.settings.tool_timeout_ms
                    )),
                }
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(content) => ToolResult {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                content,
                is_error: false,
                duration_ms,
            },
            Err(message) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, %message, "tool call failed");
                ToolResult {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    content: message,
                    is_error: true,
                    duration_ms,
                }
            }
        }
    }
}

#[async_trait]
impl AgenticRunner for StandardAgenticRunner {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, EngineError> {
        let admission = self.pipeline.admit(&request).await?;

        let mut totals = TokenTotals::default();
        let driven = self.drive_loop(&request, &admission, &mut totals).await;

        let settled = match driven {
            Ok(output) => {
                self.pipeline
                    .finish_success(&request, &admission, output, totals)
                    .await
            }
            Err(error) => Err(error),
        };

        match settled {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.pipeline.finish_failure(admission.job_id, &error).await;
                Err(error)
            }
        }
    }
}
