// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::job::WorkspaceId;
use crate::domain::repository::{StoreError, UsageRecord, UsageStore, WorkspaceAiConfig};

/// Usage accounting on the `ai_usage` ledger and `workspace_ai_config`.
/// Daily and monthly windows are UTC calendar buckets, matching how the
/// budget limits are defined.
pub struct PostgresUsageStore {
    pool: PgPool,
}

impl PostgresUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PostgresUsageStore {
    async fn daily_token_usage(
        &self,
        workspace: WorkspaceId,
        persona: &str,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(input_tokens + output_tokens), 0) AS tokens
            FROM ai_usage
            WHERE workspace_id = $1
              AND persona = $2
              AND recorded_at >= date_trunc('day', NOW() AT TIME ZONE 'UTC') AT TIME ZONE 'UTC'
            "#,
        )
        .bind(workspace.0)
        .bind(persona)
        .fetch_one(&self.pool)
        .await?;

        let tokens: i64 = row.get("tokens");
        Ok(tokens.max(0) as u64)
    }

    async fn monthly_spend(&self, workspace: WorkspaceId) -> Result<f64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(cost_usd), 0.0) AS spend
            FROM ai_usage
            WHERE workspace_id = $1
              AND recorded_at >= date_trunc('month', NOW() AT TIME ZONE 'UTC') AT TIME ZONE 'UTC'
            "#,
        )
        .bind(workspace.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("spend"))
    }

    async fn workspace_config(
        &self,
        workspace: WorkspaceId,
    ) -> Result<Option<WorkspaceAiConfig>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT ai_enabled, monthly_budget_usd
            FROM workspace_ai_config
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| WorkspaceAiConfig {
            enabled: row.get("ai_enabled"),
            monthly_budget_usd: row.get("monthly_budget_usd"),
        }))
    }

    async fn record_usage(&self, record: UsageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_usage (
                id, workspace_id, persona, feature, job_id, model,
                input_tokens, output_tokens, cost_usd, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.workspace.0)
        .bind(&record.persona)
        .bind(&record.feature)
        .bind(record.job_id.0)
        .bind(&record.model)
        .bind(record.input_tokens as i32)
        .bind(record.output_tokens as i32)
        .bind(record.cost_usd)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
