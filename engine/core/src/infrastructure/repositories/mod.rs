// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

//! Store Implementations
//!
//! Infrastructure implementations of the store abstractions defined in the
//! domain layer, following the Repository pattern from DDD.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve jobs, cascade lookups and usage
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Stores
//!
//! Production implementations backed by PostgreSQL:
//! - **PostgresJobStore** - Job lifecycle with write-once terminal states
//! - **PostgresCascadeStore** - Tag, depth and rate lookups
//! - **PostgresUsageStore** - Usage ledger and workspace AI configuration
//!
//! ## In-Memory Stores
//!
//! Thread-safe HashMap-backed implementations for testing and development.
//! The in-memory stores expose seeding methods (`set_tags`, `set_daily_usage`
//! and friends) so tests can arrange state directly.

pub mod postgres_cascade;
pub mod postgres_job;
pub mod postgres_usage;

pub use postgres_cascade::PostgresCascadeStore;
pub use postgres_job::PostgresJobStore;
pub use postgres_usage::PostgresUsageStore;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Datelike, Utc};

use crate::domain::job::{Job, JobId, JobInput, JobStatus, WorkspaceId};
use crate::domain::repository::{
    CascadeStore, JobStore, JobUpdate, StoreError, UsageRecord, UsageStore, WorkspaceAiConfig,
};

#[derive(Default)]
struct JobState {
    jobs: HashMap<JobId, Job>,
    order: Vec<JobId>,
}

#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<RwLock<JobState>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.state.read().unwrap().jobs.len()
    }

    /// Most recently created job, if any
    pub fn latest_job(&self) -> Option<Job> {
        let state = self.state.read().unwrap();
        state
            .order
            .last()
            .and_then(|id| state.jobs.get(id))
            .cloned()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(
        &self,
        workspace: WorkspaceId,
        persona: &str,
        feature: &str,
        depth: u32,
        input: JobInput,
    ) -> Result<JobId, StoreError> {
        let job = Job::new(workspace, persona, feature, depth, input);
        let id = job.id;
        let mut state = self.state.write().unwrap();
        state.jobs.insert(id, job);
        state.order.push(id);
        Ok(id)
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;

        if job.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "job {} is already {}",
                id,
                job.status.as_str()
            )));
        }

        job.status = status;
        if let Some(output) = update.output {
            job.output = Some(output);
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(tokens) = update.input_tokens {
            job.input_tokens = tokens;
        }
        if let Some(tokens) = update.output_tokens {
            job.output_tokens = tokens;
        }
        if let Some(cost) = update.cost_usd {
            job.cost_usd = cost;
        }
        if let Some(at) = update.started_at {
            job.started_at = Some(at);
        }
        if let Some(at) = update.completed_at {
            job.completed_at = Some(at);
        }
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.state.read().unwrap().jobs.get(&id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCascadeStore {
    tags: Arc<RwLock<HashMap<String, Vec<String>>>>,
    depths: Arc<RwLock<HashMap<JobId, u32>>>,
    recent: Arc<RwLock<HashMap<String, u64>>>,
}

impl InMemoryCascadeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tags(&self, target_id: &str, tags: Vec<String>) {
        self.tags.write().unwrap().insert(target_id.to_string(), tags);
    }

    pub fn set_depth(&self, job_id: JobId, depth: u32) {
        self.depths.write().unwrap().insert(job_id, depth);
    }

    pub fn set_recent_count(&self, persona: &str, count: u64) {
        self.recent.write().unwrap().insert(persona.to_string(), count);
    }
}

#[async_trait]
impl CascadeStore for InMemoryCascadeStore {
    async fn trigger_tags(&self, target_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tags
            .read()
            .unwrap()
            .get(target_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn parent_job_depth(&self, job_id: Option<JobId>) -> Result<u32, StoreError> {
        let Some(id) = job_id else {
            return Ok(0);
        };
        Ok(self.depths.read().unwrap().get(&id).copied().unwrap_or(0))
    }

    async fn count_recent_jobs(&self, persona: &str, _window_hours: u32) -> Result<u64, StoreError> {
        Ok(self
            .recent
            .read()
            .unwrap()
            .get(persona)
            .copied()
            .unwrap_or(0))
    }
}

#[derive(Default)]
struct UsageState {
    configs: HashMap<WorkspaceId, WorkspaceAiConfig>,
    daily_base: HashMap<(WorkspaceId, String), u64>,
    monthly_base: HashMap<WorkspaceId, f64>,
    records: Vec<UsageRecord>,
}

#[derive(Clone, Default)]
pub struct InMemoryUsageStore {
    state: Arc<RwLock<UsageState>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_workspace_config(&self, workspace: WorkspaceId, config: WorkspaceAiConfig) {
        self.state.write().unwrap().configs.insert(workspace, config);
    }

    pub fn clear_workspace_config(&self, workspace: WorkspaceId) {
        self.state.write().unwrap().configs.remove(&workspace);
    }

    /// Seed today's token usage ahead of whatever gets recorded
    pub fn set_daily_usage(&self, workspace: WorkspaceId, persona: &str, tokens: u64) {
        self.state
            .write()
            .unwrap()
            .daily_base
            .insert((workspace, persona.to_string()), tokens);
    }

    /// Seed this month's spend ahead of whatever gets recorded
    pub fn set_monthly_spend(&self, workspace: WorkspaceId, spend_usd: f64) {
        self.state
            .write()
            .unwrap()
            .monthly_base
            .insert(workspace, spend_usd);
    }

    pub fn recorded(&self) -> Vec<UsageRecord> {
        self.state.read().unwrap().records.clone()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn daily_token_usage(
        &self,
        workspace: WorkspaceId,
        persona: &str,
    ) -> Result<u64, StoreError> {
        let state = self.state.read().unwrap();
        let base = state
            .daily_base
            .get(&(workspace, persona.to_string()))
            .copied()
            .unwrap_or(0);
        let today = Utc::now().date_naive();
        let recorded: u64 = state
            .records
            .iter()
            .filter(|record| {
                record.workspace == workspace
                    && record.persona == persona
                    && record.recorded_at.date_naive() == today
            })
            .map(|record| u64::from(record.input_tokens) + u64::from(record.output_tokens))
            .sum();
        Ok(base + recorded)
    }

    async fn monthly_spend(&self, workspace: WorkspaceId) -> Result<f64, StoreError> {
        let state = self.state.read().unwrap();
        let base = state.monthly_base.get(&workspace).copied().unwrap_or(0.0);
        let now = Utc::now();
        let recorded: f64 = state
            .records
            .iter()
            .filter(|record| {
                record.workspace == workspace
                    && record.recorded_at.year() == now.year()
                    && record.recorded_at.month() == now.month()
            })
            .map(|record| record.cost_usd)
            .sum();
        Ok(base + recorded)
    }

    async fn workspace_config(
        &self,
        workspace: WorkspaceId,
    ) -> Result<Option<WorkspaceAiConfig>, StoreError> {
        Ok(self.state.read().unwrap().configs.get(&workspace).copied())
    }

    async fn record_usage(&self, record: UsageRecord) -> Result<(), StoreError> {
        self.state.write().unwrap().records.push(record);
        Ok(())
    }
}
