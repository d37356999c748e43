//! Postgres persistence for the purge queue.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` under a lease column so concurrent
//! drain runs never hand the same item to two workers, while a lapsed lease
//! releases items stranded by a crashed run.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Row, query, query_as, query_scalar};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    NewQueueItem, PurgeQueueRepo, QueueCounts, QueueItemRecord, RepoError,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct PurgeQueueRow {
    id: Uuid,
    queue: String,
    payload: serde_json::Value,
    attempts: i32,
    reserved_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl From<PurgeQueueRow> for QueueItemRecord {
    fn from(row: PurgeQueueRow) -> Self {
        Self {
            id: row.id,
            queue: row.queue,
            payload: row.payload,
            attempts: row.attempts,
            reserved_at: row.reserved_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        }
    }
}

const ROW_COLUMNS: &str = "id, queue, payload, attempts, reserved_at, completed_at, created_at";

#[async_trait]
impl PurgeQueueRepo for PostgresRepositories {
    async fn enqueue(&self, item: NewQueueItem) -> Result<Uuid, RepoError> {
        let payload = serde_json::to_value(&item.payload).map_err(RepoError::from_persistence)?;
        let id: Uuid = query_scalar(
            "INSERT INTO purge_queue (queue, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(&item.queue)
        .bind(payload)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn collapse_to_all(&self, queue: &str) -> Result<u64, RepoError> {
        let result = query(
            "DELETE FROM purge_queue \
             WHERE queue = $1 \
               AND completed_at IS NULL \
               AND reserved_at IS NULL \
               AND payload->>'kind' <> 'all'",
        )
        .bind(queue)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn claim_batch(
        &self,
        queue: &str,
        limit: u32,
        lease: Duration,
        max_attempts: i32,
    ) -> Result<Vec<QueueItemRecord>, RepoError> {
        let sql = format!(
            "UPDATE purge_queue SET reserved_at = now() \
             WHERE id IN ( \
                 SELECT id FROM purge_queue \
                 WHERE queue = $1 \
                   AND completed_at IS NULL \
                   AND attempts < $2 \
                   AND (reserved_at IS NULL \
                        OR reserved_at < now() - make_interval(secs => $3)) \
                 ORDER BY created_at \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {ROW_COLUMNS}"
        );
        let rows: Vec<PurgeQueueRow> = query_as(&sql)
            .bind(queue)
            .bind(max_attempts)
            .bind(lease.as_secs_f64())
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), RepoError> {
        let result = query(
            "UPDATE purge_queue SET completed_at = now(), reserved_at = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid) -> Result<i32, RepoError> {
        let attempts: i32 = query_scalar(
            "UPDATE purge_queue \
             SET attempts = attempts + 1, reserved_at = NULL \
             WHERE id = $1 \
             RETURNING attempts",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(attempts)
    }

    async fn counts(&self, queue: &str, max_attempts: i32) -> Result<QueueCounts, RepoError> {
        let row = query(
            "SELECT \
                 COUNT(*) FILTER (WHERE completed_at IS NULL \
                                    AND attempts < $2 \
                                    AND reserved_at IS NULL) AS pending, \
                 COUNT(*) FILTER (WHERE completed_at IS NULL \
                                    AND attempts < $2 \
                                    AND reserved_at IS NOT NULL) AS reserved, \
                 COUNT(*) FILTER (WHERE completed_at IS NOT NULL) AS completed, \
                 COUNT(*) FILTER (WHERE completed_at IS NULL \
                                    AND attempts >= $2) AS dead \
             FROM purge_queue WHERE queue = $1",
        )
        .bind(queue)
        .bind(max_attempts)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let get = |name: &str| -> Result<u64, RepoError> {
            let value: i64 = row.try_get(name).map_err(map_sqlx_error)?;
            Ok(value as u64)
        };
        Ok(QueueCounts {
            pending: get("pending")?,
            reserved: get("reserved")?,
            completed: get("completed")?,
            dead: get("dead")?,
        })
    }

    async fn list_dead(
        &self,
        queue: &str,
        max_attempts: i32,
        limit: u32,
    ) -> Result<Vec<QueueItemRecord>, RepoError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM purge_queue \
             WHERE queue = $1 AND completed_at IS NULL AND attempts >= $2 \
             ORDER BY created_at \
             LIMIT $3"
        );
        let rows: Vec<PurgeQueueRow> = query_as(&sql)
            .bind(queue)
            .bind(max_attempts)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
