// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Store Interfaces
//!
//! Persistence contracts the engine depends on, following the DDD Repository
//! pattern: interfaces defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Concern | Implementations |
//! |-------|---------|----------------|
//! | `JobStore` | Job lifecycle | `InMemoryJobStore`, `PostgresJobStore` |
//! | `CascadeStore` | Cascade-guard lookups | `InMemoryCascadeStore`, `PostgresCascadeStore` |
//! | `UsageStore` | Token/spend accounting | `InMemoryUsageStore`, `PostgresUsageStore` |
//!
//! ## Storage Backend Abstraction
//!
//! In-memory implementations are used for development and testing;
//! PostgreSQL implementations for production. Hosts may substitute their own
//! implementations — the runners only see these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::job::{Job, JobId, JobInput, JobOutput, JobStatus, WorkspaceId};

/// Store interface for the Job lifecycle
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job with status `queued`; returns its id
    async fn create_job(
        &self,
        workspace: WorkspaceId,
        persona: &str,
        feature: &str,
        depth: u32,
        input: JobInput,
    ) -> Result<JobId, StoreError>;

    /// Apply a status transition plus the given field updates.
    /// Terminal statuses are write-once: a second terminal write fails with
    /// [`StoreError::Conflict`].
    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<(), StoreError>;

    /// Fetch a job by id
    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;
}

/// Field updates accompanying a status transition
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub output: Option<JobOutput>,
    pub error: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cost_usd: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Store interface for cascade-guard lookups
#[async_trait]
pub trait CascadeStore: Send + Sync {
    /// Tags on the action's target entity (empty when untagged)
    async fn trigger_tags(&self, target_id: &str) -> Result<Vec<String>, StoreError>;

    /// Cascade depth of the parent job; 0 when there is no parent
    async fn parent_job_depth(&self, job_id: Option<JobId>) -> Result<u32, StoreError>;

    /// Jobs the persona ran in the trailing window
    async fn count_recent_jobs(&self, persona: &str, window_hours: u32) -> Result<u64, StoreError>;
}

/// Store interface for token/spend accounting
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Input + output tokens the persona used in this workspace today (UTC day)
    async fn daily_token_usage(
        &self,
        workspace: WorkspaceId,
        persona: &str,
    ) -> Result<u64, StoreError>;

    /// USD spent in this workspace in the current calendar month (UTC)
    async fn monthly_spend(&self, workspace: WorkspaceId) -> Result<f64, StoreError>;

    /// Workspace AI configuration; `None` when the workspace never enabled AI
    async fn workspace_config(
        &self,
        workspace: WorkspaceId,
    ) -> Result<Option<WorkspaceAiConfig>, StoreError>;

    /// Append one usage record (called once per finished job)
    async fn record_usage(&self, record: UsageRecord) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkspaceAiConfig {
    pub enabled: bool,
    pub monthly_budget_usd: f64,
}

/// One row of the usage ledger
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub workspace: WorkspaceId,
    pub persona: String,
    pub feature: String,
    pub job_id: JobId,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Row not found".to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
