//! Durable priority FIFO queue: push/pop/ack/fail/extend/requeue.

use crate::error::DatabaseError;
use crate::types::{JobId, Priority};
use crate::{Error, Result};
use chrono::Utc;
use sqlx::FromRow;

use super::Database;

/// Raw queue row as persisted.
#[derive(Debug, Clone, FromRow)]
pub struct QueueRow {
    /// Queue item id
    pub id: JobId,
    /// Unix timestamp the item was created
    pub created: i64,
    /// Unix timestamp of the last update (pop/extend/requeue)
    pub updated: i64,
    /// Logical queue name, allowing several independent queues per database
    pub queue_name: String,
    /// Opaque, serialized job body
    pub body: String,
    /// Unix millis after which the item becomes visible to `pop`
    pub visibility_deadline: i64,
    /// Number of times this item has been popped
    pub received_count: i64,
    /// Scheduling priority; higher pops first
    pub priority: Priority,
}

const DEFAULT_QUEUE: &str = "default";

/// Coarse queue item state, for introspection only -- `pop` doesn't consult this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItemStatus {
    /// Waiting to become visible, or already visible and unclaimed
    Pending,
    /// Currently leased by a worker
    Leased,
}

impl Database {
    /// Push a new item onto the queue, immediately visible.
    pub async fn push(&self, body: &str, priority: Priority) -> Result<JobId> {
        let id = JobId::new();
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO queue (id, created, updated, queue_name, body, visibility_deadline, received_count, priority)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .bind(DEFAULT_QUEUE)
        .bind(body)
        .bind(now)
        .bind(priority)
        .execute(self.pool())
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to push queue item: {e}"))))?;

        Ok(id)
    }

    /// Pop the highest-priority, oldest, currently-visible item and lease it
    /// for `lease_ms`. Items whose `received_count` already exceeds
    /// `max_receives` are moved to `errored_items` instead of being returned.
    pub async fn pop(&self, lease_ms: u64, max_receives: u32) -> Result<Option<QueueRow>> {
        loop {
            let now = Utc::now().timestamp_millis();

            let row: Option<QueueRow> = sqlx::query_as(
                r#"
                SELECT id, created, updated, queue_name, body, visibility_deadline, received_count, priority
                FROM queue
                WHERE queue_name = ? AND visibility_deadline <= ?
                ORDER BY priority DESC, created ASC
                LIMIT 1
                "#,
            )
            .bind(DEFAULT_QUEUE)
            .bind(now)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to select queue item: {e}"))))?;

            let Some(row) = row else {
                return Ok(None);
            };

            if row.received_count as u32 >= max_receives {
                self.fail(row.id, "exceeded max_receives without ack").await?;
                continue;
            }

            return self.lease(row, now, lease_ms).await;
        }
    }

    async fn lease(&self, row: QueueRow, now: i64, lease_ms: u64) -> Result<Option<QueueRow>> {
        let new_deadline = now + lease_ms as i64;
        sqlx::query(
            "UPDATE queue SET received_count = received_count + 1, visibility_deadline = ?, updated = ? WHERE id = ?",
        )
        .bind(new_deadline)
        .bind(now)
        .bind(row.id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to lease queue item: {e}"))))?;

        Ok(Some(QueueRow {
            received_count: row.received_count + 1,
            visibility_deadline: new_deadline,
            updated: now,
            ..row
        }))
    }

    /// Acknowledge successful completion: delete from `queue`, record in
    /// `completed_items`.
    pub async fn ack(&self, row: &QueueRow, path: &str, size: i64, nzb_path: Option<&str>) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool().begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("failed to start ack transaction: {e}")))
        })?;

        sqlx::query("DELETE FROM queue WHERE id = ?")
            .bind(row.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to delete queue item: {e}"))))?;

        sqlx::query(
            r#"
            INSERT INTO completed_items (id, path, size, priority, created_at, terminated_at, job_data, nzb_path)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.id)
        .bind(path)
        .bind(size)
        .bind(row.priority)
        .bind(row.created)
        .bind(now)
        .bind(&row.body)
        .bind(nzb_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to insert completed_items row: {e}"))))?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("failed to commit ack transaction: {e}")))
        })?;

        Ok(())
    }

    /// Record a terminal failure: delete from `queue`, record in `errored_items`.
    pub async fn fail(&self, id: JobId, reason: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool().begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("failed to start fail transaction: {e}")))
        })?;

        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT id, created, updated, queue_name, body, visibility_deadline, received_count, priority FROM queue WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to fetch queue item: {e}"))))?;

        let Some(row) = row else {
            return Err(Error::Database(DatabaseError::NotFound(format!("queue item {id} not found"))));
        };

        sqlx::query("DELETE FROM queue WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to delete queue item: {e}"))))?;

        sqlx::query(
            r#"
            INSERT INTO errored_items (id, path, size, priority, created_at, terminated_at, job_data, error_message)
            VALUES (?, '', 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.id)
        .bind(row.priority)
        .bind(row.created)
        .bind(now)
        .bind(&row.body)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to insert errored_items row: {e}"))))?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("failed to commit fail transaction: {e}")))
        })?;

        Ok(())
    }

    /// Extend the lease on an in-flight item.
    pub async fn extend(&self, id: JobId, duration_ms: u64) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query("UPDATE queue SET visibility_deadline = visibility_deadline + ?, updated = ? WHERE id = ?")
            .bind(duration_ms as i64)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to extend lease: {e}"))))?;

        Ok(())
    }

    /// Number of items currently waiting or leased in the default queue.
    pub async fn queue_depth(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE queue_name = ?")
            .bind(DEFAULT_QUEUE)
            .fetch_one(self.pool())
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to count queue items: {e}"))))
    }

    /// List queue items matching `status`, highest priority and oldest first.
    pub async fn list_queue_by_status(&self, status: QueueItemStatus) -> Result<Vec<QueueRow>> {
        let now = Utc::now().timestamp_millis();
        let comparison = match status {
            QueueItemStatus::Pending => "<=",
            QueueItemStatus::Leased => ">",
        };

        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            r#"
            SELECT id, created, updated, queue_name, body, visibility_deadline, received_count, priority
            FROM queue
            WHERE queue_name = ? AND visibility_deadline {comparison} ?
            ORDER BY priority DESC, created ASC
            "#,
        ))
        .bind(DEFAULT_QUEUE)
        .bind(now)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to list queue items: {e}"))))?;

        Ok(rows)
    }

    /// Make an item immediately visible again, e.g. after a cooperative
    /// shutdown returns a running job to pending.
    pub async fn requeue(&self, id: JobId) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query("UPDATE queue SET visibility_deadline = ?, updated = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("failed to requeue item: {e}"))))?;

        Ok(())
    }
}
