// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::job::{Job, JobId, JobInput, JobOutput, JobStatus, WorkspaceId};
use crate::domain::repository::{JobStore, JobUpdate, StoreError};

/// Job lifecycle on the `jobs` table. The update guard excludes terminal
/// rows, so a completed or failed job can never be rewritten.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create_job(
        &self,
        workspace: WorkspaceId,
        persona: &str,
        feature: &str,
        depth: u32,
        input: JobInput,
    ) -> Result<JobId, StoreError> {
        let job = Job::new(workspace, persona, feature, depth, input);
        let input_json = serde_json::to_value(&job.input)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, workspace_id, persona, feature, status, depth, input,
                input_tokens, output_tokens, cost_usd, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id.0)
        .bind(job.workspace_id.0)
        .bind(&job.persona)
        .bind(&job.feature)
        .bind(job.status.as_str())
        .bind(job.depth as i32)
        .bind(input_json)
        .bind(job.input_tokens as i32)
        .bind(job.output_tokens as i32)
        .bind(job.cost_usd)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(job.id)
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<(), StoreError> {
        let output_json = match &update.output {
            Some(output) => Some(serde_json::to_value(output)?),
            None => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = $2,
                output = COALESCE($3, output),
                error_message = COALESCE($4, error_message),
                input_tokens = COALESCE($5, input_tokens),
                output_tokens = COALESCE($6, output_tokens),
                cost_usd = COALESCE($7, cost_usd),
                started_at = COALESCE($8, started_at),
                completed_at = COALESCE($9, completed_at)
            WHERE id = $1
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(output_json)
        .bind(update.error)
        .bind(update.input_tokens.map(|t| t as i32))
        .bind(update.output_tokens.map(|t| t as i32))
        .bind(update.cost_usd)
        .bind(update.started_at)
        .bind(update.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the job does not exist or it already settled
            let existing = sqlx::query("SELECT status FROM jobs WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
            return match existing {
                Some(row) => {
                    let current: String = row.get("status");
                    Err(StoreError::Conflict(format!(
                        "job {id} is already {current}"
                    )))
                }
                None => Err(StoreError::NotFound(format!("job {id}"))),
            };
        }

        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, workspace_id, persona, feature, status, depth, input,
                output, error_message, input_tokens, output_tokens, cost_usd,
                created_at, started_at, completed_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_str: String = row.get("status");
        let status = JobStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Serialization(format!("unknown job status '{status_str}'")))?;

        let input: JobInput = serde_json::from_value(row.get("input"))?;
        let output: Option<JobOutput> = match row.get::<Option<serde_json::Value>, _>("output") {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };

        let depth: i32 = row.get("depth");
        let input_tokens: i32 = row.get("input_tokens");
        let output_tokens: i32 = row.get("output_tokens");

        Ok(Some(Job {
            id: JobId(row.get("id")),
            workspace_id: WorkspaceId(row.get("workspace_id")),
            persona: row.get("persona"),
            feature: row.get("feature"),
            status,
            depth: depth as u32,
            input,
            output,
            error: row.get("error_message"),
            input_tokens: input_tokens as u32,
            output_tokens: output_tokens as u32,
            cost_usd: row.get("cost_usd"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }))
    }
}
