//! PgTaskQueue: at-least-once work queue on a Postgres table.
//!
//! Reservation uses `FOR UPDATE SKIP LOCKED`, so any number of worker
//! processes can poll the same table. A lease that expires without a
//! complete/retry/dead_letter call makes the task visible again.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::traits::TaskQueue;
use crate::types::{QueuedTask, TaskId};

type TaskRow = (i64, serde_json::Value, i32, Option<String>, DateTime<Utc>);

#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<TaskId> {
        let row = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO pipe_tasks (payload) VALUES ($1) RETURNING id",
        )
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn reserve(&self, limit: usize, lease: Duration) -> Result<Vec<QueuedTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE pipe_tasks
            SET attempts = attempts + 1,
                locked_until = now() + make_interval(secs => $2)
            WHERE id IN (
                SELECT id FROM pipe_tasks
                WHERE NOT dead
                  AND available_at <= now()
                  AND (locked_until IS NULL OR locked_until < now())
                ORDER BY id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts, last_error, created_at
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Reserved pipe tasks");
        Ok(rows.into_iter().map(task_from_row).collect())
    }

    async fn complete(&self, id: TaskId) -> Result<()> {
        let result = sqlx::query("DELETE FROM pipe_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTask(id));
        }
        Ok(())
    }

    async fn retry(&self, id: TaskId, delay: Duration, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipe_tasks
            SET available_at = now() + make_interval(secs => $2),
                locked_until = NULL,
                last_error = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTask(id));
        }
        Ok(())
    }

    async fn dead_letter(&self, id: TaskId, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipe_tasks SET dead = TRUE, locked_until = NULL, last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTask(id));
        }
        Ok(())
    }

    async fn pending(&self) -> Result<usize> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM pipe_tasks WHERE NOT dead")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 as usize)
    }

    async fn dead_letters(&self) -> Result<Vec<QueuedTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, payload, attempts, last_error, created_at
            FROM pipe_tasks
            WHERE dead
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(task_from_row).collect())
    }
}

fn task_from_row((id, payload, attempts, last_error, created_at): TaskRow) -> QueuedTask {
    QueuedTask {
        id,
        payload,
        attempts,
        last_error,
        created_at,
    }
}
