// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::job::JobId;
use crate::domain::repository::{CascadeStore, StoreError};

/// Cascade-guard lookups over the `entity_tags` and `jobs` tables.
pub struct PostgresCascadeStore {
    pool: PgPool,
}

impl PostgresCascadeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CascadeStore for PostgresCascadeStore {
    async fn trigger_tags(&self, target_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT tag FROM entity_tags WHERE entity_id = $1")
            .bind(target_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get("tag")).collect())
    }

    async fn parent_job_depth(&self, job_id: Option<JobId>) -> Result<u32, StoreError> {
        let Some(id) = job_id else {
            return Ok(0);
        };

        let row = sqlx::query("SELECT depth FROM jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        // A vanished parent counts as depth 0 rather than blocking the child
        Ok(row.map(|row| row.get::<i32, _>("depth") as u32).unwrap_or(0))
    }

    async fn count_recent_jobs(&self, persona: &str, window_hours: u32) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS recent
            FROM jobs
            WHERE persona = $1
              AND created_at > NOW() - make_interval(hours => $2)
            "#,
        )
        .bind(persona)
        .bind(window_hours as i32)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("recent");
        Ok(count.max(0) as u64)
    }
}
