use async_trait::async_trait;
use chrono::Utc;
use libsql::{params, Connection};
use std::collections::HashMap;

use crate::config::MemoryLimitsConfig;
use crate::error::Result;
use crate::models::{FailedTask, PendingTask, TaskStatus};
use crate::store::Database;

/// Per-task-type counters returned by `stats_by_type`.
#[derive(Debug, Clone, Default)]
pub struct TaskTypeStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
}

/// Background work queue backing the summarize/ocr/embed/reindex/analyze
/// task types. Claims are leased with a stale-claim recovery window;
/// failures back off exponentially until dead-lettered.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    async fn enqueue(
        &self,
        id: &str,
        collection: &str,
        task_type: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Claim up to `limit` ready tasks atomically, marking them `processing`.
    async fn dequeue(&self, claimed_by: &str, limit: usize) -> Result<Vec<PendingTask>>;

    async fn complete(&self, id: &str, collection: &str, task_type: &str) -> Result<()>;

    /// Record a failure: bumps `attempts`, computes the next backoff, and
    /// either reschedules as `pending` or dead-letters as `failed` once
    /// `max_summary_attempts` is reached.
    async fn fail(&self, id: &str, collection: &str, task_type: &str, error: &str) -> Result<()>;

    /// Unconditionally dead-letter a task (used when a task is known to be
    /// unrecoverable, bypassing the retry count).
    async fn abandon(&self, id: &str, collection: &str, task_type: &str, error: &str) -> Result<()>;

    async fn count(&self, status: Option<TaskStatus>) -> Result<u64>;
    async fn stats_by_type(&self, task_type: &str) -> Result<TaskTypeStats>;
    async fn list_failed(&self, collection: Option<&str>) -> Result<Vec<FailedTask>>;

    /// Bulk-reset every `failed` task back to `pending` with attempts=0.
    async fn retry_failed(&self, collection: Option<&str>) -> Result<u64>;

    async fn get_status(&self, id: &str, collection: &str, task_type: &str) -> Result<Option<TaskStatus>>;
    async fn clear(&self, collection: &str) -> Result<()>;
}

pub struct LibsqlPendingQueue {
    db: Database,
    limits: MemoryLimitsConfig,
}

impl LibsqlPendingQueue {
    pub fn new(db: Database, limits: MemoryLimitsConfig) -> Self {
        Self { db, limits }
    }

    fn conn(&self) -> Result<Connection> {
        self.db.connect()
    }

    /// Reclaim tasks stuck in `processing` past the stale-claim window,
    /// bumping attempts as if they had failed once (original_source
    /// `pending_summaries.py::_recover_stale_claims`).
    async fn recover_stale_claims(&self, conn: &Connection) -> Result<()> {
        let stale_secs = self.limits.stale_claim_secs as i64;
        conn.execute(
            r#"
            UPDATE pending_summaries
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL
            WHERE status = 'processing'
              AND claimed_at IS NOT NULL
              AND (julianday('now') - julianday(claimed_at)) * 86400 > ?1
            "#,
            params![stale_secs],
        )
        .await?;
        Ok(())
    }

    fn backoff_secs(&self, attempts: u32) -> i64 {
        let base = self.limits.retry_backoff_base_secs as f64;
        let max = self.limits.retry_backoff_max_secs as f64;
        let exp = base * 2f64.powi((attempts.max(1) - 1) as i32);
        exp.min(max) as i64
    }

    fn row_to_task(row: &libsql::Row) -> Result<PendingTask> {
        let metadata_json: String = row.get(6)?;
        let status_str: String = row.get(7)?;
        Ok(PendingTask {
            id: row.get(0)?,
            collection: row.get(1)?,
            task_type: row.get(2)?,
            content: row.get(3)?,
            queued_at: row.get(4)?,
            attempts: row.get::<i64>(5)? as u32,
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            status: status_str.parse()?,
            claimed_by: row.get(8)?,
            claimed_at: row.get(9)?,
            last_error: row.get(10)?,
            retry_after: row.get(11)?,
        })
    }
}

#[async_trait]
impl PendingQueue for LibsqlPendingQueue {
    async fn enqueue(
        &self,
        id: &str,
        collection: &str,
        task_type: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO pending_summaries
                (id, collection, content, queued_at, attempts, task_type, metadata, status, claimed_by, claimed_at, last_error, retry_after)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, 'pending', NULL, NULL, NULL, NULL)
            ON CONFLICT(id, collection, task_type) DO UPDATE SET
                content = excluded.content,
                queued_at = excluded.queued_at,
                attempts = 0,
                metadata = excluded.metadata,
                status = 'pending',
                claimed_by = NULL,
                claimed_at = NULL,
                last_error = NULL,
                retry_after = NULL
            "#,
            params![
                id,
                collection,
                content,
                now,
                task_type,
                serde_json::to_string(&metadata)?,
            ],
        )
        .await?;
        Ok(())
    }

    async fn dequeue(&self, claimed_by: &str, limit: usize) -> Result<Vec<PendingTask>> {
        let conn = self.conn()?;
        self.recover_stale_claims(&conn).await?;

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<Vec<PendingTask>> = async {
            let now = Utc::now().to_rfc3339();
            let mut rows = conn
                .query(
                    r#"
                    SELECT id, collection, task_type
                    FROM pending_summaries
                    WHERE status = 'pending' AND (retry_after IS NULL OR retry_after <= ?1)
                    ORDER BY queued_at ASC
                    LIMIT ?2
                    "#,
                    params![now.clone(), limit as i64],
                )
                .await?;
            let mut keys = Vec::new();
            while let Some(row) = rows.next().await? {
                keys.push((row.get::<String>(0)?, row.get::<String>(1)?, row.get::<String>(2)?));
            }

            let mut claimed = Vec::new();
            for (id, collection, task_type) in keys {
                conn.execute(
                    r#"
                    UPDATE pending_summaries
                    SET status = 'processing', claimed_by = ?1, claimed_at = ?2, attempts = attempts + 1
                    WHERE id = ?3 AND collection = ?4 AND task_type = ?5
                    "#,
                    params![claimed_by, now.clone(), id.clone(), collection.clone(), task_type.clone()],
                )
                .await?;

                let mut task_rows = conn
                    .query(
                        r#"
                        SELECT id, collection, task_type, content, queued_at, attempts, metadata, status, claimed_by, claimed_at, last_error, retry_after
                        FROM pending_summaries
                        WHERE id = ?1 AND collection = ?2 AND task_type = ?3
                        "#,
                        params![id, collection, task_type],
                    )
                    .await?;
                if let Some(row) = task_rows.next().await? {
                    claimed.push(Self::row_to_task(&row)?);
                }
            }
            Ok(claimed)
        }
        .await;

        match result {
            Ok(claimed) => {
                conn.execute("COMMIT", ()).await?;
                Ok(claimed)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn complete(&self, id: &str, collection: &str, task_type: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM pending_summaries WHERE id = ?1 AND collection = ?2 AND task_type = ?3",
            params![id, collection, task_type],
        )
        .await?;
        Ok(())
    }

    async fn fail(&self, id: &str, collection: &str, task_type: &str, error: &str) -> Result<()> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT attempts FROM pending_summaries WHERE id = ?1 AND collection = ?2 AND task_type = ?3",
                params![id, collection, task_type],
            )
            .await?;
        let attempts: u32 = match rows.next().await? {
            Some(row) => row.get::<i64>(0)? as u32,
            None => return Ok(()),
        };

        if attempts >= self.limits.max_summary_attempts {
            return self.abandon(id, collection, task_type, error).await;
        }

        let backoff = self.backoff_secs(attempts);
        let retry_after = (Utc::now() + chrono::Duration::seconds(backoff)).to_rfc3339();
        conn.execute(
            r#"
            UPDATE pending_summaries
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL, last_error = ?1, retry_after = ?2
            WHERE id = ?3 AND collection = ?4 AND task_type = ?5
            "#,
            params![error, retry_after, id, collection, task_type],
        )
        .await?;
        Ok(())
    }

    async fn abandon(&self, id: &str, collection: &str, task_type: &str, error: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE pending_summaries
            SET status = 'failed', claimed_by = NULL, claimed_at = NULL, last_error = ?1
            WHERE id = ?2 AND collection = ?3 AND task_type = ?4
            "#,
            params![error, id, collection, task_type],
        )
        .await?;
        Ok(())
    }

    async fn count(&self, status: Option<TaskStatus>) -> Result<u64> {
        let conn = self.conn()?;
        let mut rows = match status {
            Some(status) => {
                conn.query(
                    "SELECT COUNT(*) FROM pending_summaries WHERE status = ?1",
                    params![status.as_str()],
                )
                .await?
            }
            None => conn.query("SELECT COUNT(*) FROM pending_summaries", ()).await?,
        };
        let count: i64 = rows.next().await?.map(|r| r.get(0)).transpose()?.unwrap_or(0);
        Ok(count as u64)
    }

    async fn stats_by_type(&self, task_type: &str) -> Result<TaskTypeStats> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT status, COUNT(*) FROM pending_summaries WHERE task_type = ?1 GROUP BY status",
                params![task_type],
            )
            .await?;
        let mut stats = TaskTypeStats::default();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            match status.as_str() {
                "pending" => stats.pending = count as u64,
                "processing" => stats.processing = count as u64,
                "failed" => stats.failed = count as u64,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn list_failed(&self, collection: Option<&str>) -> Result<Vec<FailedTask>> {
        let conn = self.conn()?;
        let mut rows = match collection {
            Some(collection) => {
                conn.query(
                    "SELECT id, collection, task_type, attempts, last_error, queued_at FROM pending_summaries WHERE status = 'failed' AND collection = ?1",
                    params![collection],
                )
                .await?
            }
            None => {
                conn.query(
                    "SELECT id, collection, task_type, attempts, last_error, queued_at FROM pending_summaries WHERE status = 'failed'",
                    (),
                )
                .await?
            }
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(FailedTask {
                id: row.get(0)?,
                collection: row.get(1)?,
                task_type: row.get(2)?,
                attempts: row.get::<i64>(3)? as u32,
                last_error: row.get(4)?,
                queued_at: row.get(5)?,
            });
        }
        Ok(out)
    }

    async fn retry_failed(&self, collection: Option<&str>) -> Result<u64> {
        let conn = self.conn()?;
        let affected = match collection {
            Some(collection) => {
                conn.execute(
                    "UPDATE pending_summaries SET status = 'pending', attempts = 0, last_error = NULL, retry_after = NULL WHERE status = 'failed' AND collection = ?1",
                    params![collection],
                )
                .await?
            }
            None => {
                conn.execute(
                    "UPDATE pending_summaries SET status = 'pending', attempts = 0, last_error = NULL, retry_after = NULL WHERE status = 'failed'",
                    (),
                )
                .await?
            }
        };
        Ok(affected)
    }

    async fn get_status(&self, id: &str, collection: &str, task_type: &str) -> Result<Option<TaskStatus>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT status FROM pending_summaries WHERE id = ?1 AND collection = ?2 AND task_type = ?3",
                params![id, collection, task_type],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?.parse()?)),
            None => Ok(None),
        }
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM pending_summaries WHERE collection = ?1",
            params![collection],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    async fn test_queue() -> LibsqlPendingQueue {
        let store_config = StoreConfig {
            url: ":memory:".to_string(),
            auth_token: None,
            local_path: None,
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
        };
        let db = Database::new(&store_config, 8).await.unwrap();
        let limits = MemoryLimitsConfig {
            max_summary_length: 500,
            max_id_length: 1024,
            max_tag_key_length: 128,
            max_tag_value_length: 4096,
            recency_half_life_days: 30.0,
            max_summary_attempts: 3,
            stale_claim_secs: 600,
            retry_backoff_base_secs: 30,
            retry_backoff_max_secs: 3600,
            reconcile_wait_secs: 10,
            version_path_edges: false,
        };
        LibsqlPendingQueue::new(db, limits)
    }

    #[tokio::test]
    async fn enqueue_dequeue_complete_round_trip() {
        let queue = test_queue().await;
        queue
            .enqueue("doc-1", "default", "summarize", "hello world", HashMap::new())
            .await
            .unwrap();

        let claimed = queue.dequeue("worker-1", 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, TaskStatus::Processing);
        assert_eq!(claimed[0].attempts, 1);

        queue.complete("doc-1", "default", "summarize").await.unwrap();
        assert_eq!(queue.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fail_dead_letters_after_max_attempts() {
        let queue = test_queue().await;
        queue
            .enqueue("doc-1", "default", "summarize", "content", HashMap::new())
            .await
            .unwrap();

        for _ in 0..3 {
            queue.dequeue("worker-1", 10).await.unwrap();
            queue.fail("doc-1", "default", "summarize", "boom").await.unwrap();
        }

        let status = queue
            .get_status("doc-1", "default", "summarize")
            .await
            .unwrap();
        assert_eq!(status, Some(TaskStatus::Failed));

        let failed = queue.list_failed(None).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn retry_failed_resets_to_pending() {
        let queue = test_queue().await;
        queue
            .enqueue("doc-1", "default", "summarize", "content", HashMap::new())
            .await
            .unwrap();
        for _ in 0..3 {
            queue.dequeue("worker-1", 10).await.unwrap();
            queue.fail("doc-1", "default", "summarize", "boom").await.unwrap();
        }
        let reset = queue.retry_failed(None).await.unwrap();
        assert_eq!(reset, 1);
        let status = queue.get_status("doc-1", "default", "summarize").await.unwrap();
        assert_eq!(status, Some(TaskStatus::Pending));
    }
}
