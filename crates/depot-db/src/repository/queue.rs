//! # Durable Queue Repository
//!
//! One named, persistent, insertion-ordered queue of pending mutations.
//!
//! ## Lifecycle of a Row
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue(entry)                                                         │
//! │       │   INSERT OR IGNORE ... (queue, id) unique                       │
//! │       ▼                                                                 │
//! │  ┌─────────┐  mark_submitted   ┌───────────┐  mark_failed  ┌────────┐   │
//! │  │ pending │ ────────────────► │ submitted │ ────────────► │ failed │   │
//! │  └─────────┘                   └───────────┘ ◄──────────── └────────┘   │
//! │                                      │        mark_submitted            │
//! │                                      │                                  │
//! │                     mark_leg_completed (cash entries, per leg)          │
//! │                                      │                                  │
//! │                                      ▼ confirmed                        │
//! │                                 remove(id)  ── row deleted              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bookkeeping updates never touch `id` or `payload`. A row is deleted only by
//! `remove` (confirmed submission), `clear`, or when it can no longer be
//! decoded.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use depot_core::{EntryPayload, EntryStatus, QueueEntry, QueueKind};

use crate::error::{DbError, DbResult};

const TABLE: &str = "queue_entries";

/// Repository for one named queue.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
    kind: QueueKind,
}

impl QueueRepository {
    /// Creates a repository bound to one queue.
    pub fn new(pool: SqlitePool, kind: QueueKind) -> Self {
        QueueRepository { pool, kind }
    }

    /// The queue this repository operates on.
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Appends an entry.
    ///
    /// ## Returns
    /// * `Ok(true)` - the entry was stored
    /// * `Ok(false)` - an entry with the same id already exists (no-op)
    ///
    /// The write is committed before this returns.
    pub async fn enqueue(&self, entry: &QueueEntry) -> DbResult<bool> {
        if entry.kind() != self.kind {
            return Err(DbError::QueryFailed(format!(
                "{} entry cannot be stored in the {} queue",
                entry.kind(),
                self.kind
            )));
        }

        let payload = serde_json::to_string(&entry.payload)?;
        let completed_legs = serde_json::to_string(&entry.completed_legs)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO queue_entries (
                queue, id, payload, status, created_at,
                attempts, last_error, attempted_at, completed_legs
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(self.kind.as_str())
        .bind(&entry.id)
        .bind(payload)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.attempted_at)
        .bind(completed_legs)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;

        debug!(
            queue = %self.kind,
            id = %entry.id,
            inserted,
            "Enqueue"
        );

        Ok(inserted)
    }

    /// Returns every entry in insertion order.
    ///
    /// Rows that no longer decode are deleted and skipped; the rest of the
    /// queue is returned intact.
    pub async fn list(&self) -> DbResult<Vec<QueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, payload, status, created_at,
                   attempts, last_error, attempted_at, completed_legs
            FROM queue_entries
            WHERE queue = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(self.kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();

        for row in &rows {
            match self.decode(row) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    let seq: i64 = row.try_get("seq").unwrap_or_default();
                    warn!(queue = %self.kind, seq, error = %err, "Discarding corrupt queue entry");
                    corrupt.push(seq);
                }
            }
        }

        for seq in corrupt {
            sqlx::query("DELETE FROM queue_entries WHERE seq = ?1")
                .bind(seq)
                .execute(&self.pool)
                .await?;
        }

        Ok(entries)
    }

    /// Fetches one entry by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<QueueEntry>> {
        let row = sqlx::query(
            r#"
            SELECT seq, id, payload, status, created_at,
                   attempts, last_error, attempted_at, completed_legs
            FROM queue_entries
            WHERE queue = ?1 AND id = ?2
            "#,
        )
        .bind(self.kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(|r| self.decode(r)).transpose()
    }

    /// Deletes one entry. Removing an absent id is a no-op.
    pub async fn remove(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE queue = ?1 AND id = ?2")
            .bind(self.kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        debug!(queue = %self.kind, id = %id, removed = result.rows_affected(), "Remove");
        Ok(())
    }

    /// Empties the queue. Returns the number of removed entries.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE queue = ?1")
            .bind(self.kind.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Number of entries in the queue.
    pub async fn len(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE queue = ?1")
            .bind(self.kind.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    pub async fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Flags an entry as in flight.
    pub async fn mark_submitted(&self, id: &str) -> DbResult<()> {
        self.set_status(id, EntryStatus::Submitted, None).await
    }

    /// Records a failed attempt: status `failed`, attempts + 1, the error text
    /// and the attempt time.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        self.set_status(id, EntryStatus::Failed, Some(error)).await
    }

    async fn set_status(&self, id: &str, status: EntryStatus, error: Option<&str>) -> DbResult<()> {
        let now = Utc::now();
        let failed = status == EntryStatus::Failed;

        let result = sqlx::query(
            r#"
            UPDATE queue_entries SET
                status = ?3,
                attempted_at = ?4,
                attempts = attempts + ?5,
                last_error = COALESCE(?6, last_error)
            WHERE queue = ?1 AND id = ?2
            "#,
        )
        .bind(self.kind.as_str())
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .bind(i64::from(failed))
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Queue entry", id));
        }

        Ok(())
    }

    /// Records that the server accepted one leg of a cash entry.
    ///
    /// Idempotent: marking the same leg twice keeps a single record.
    pub async fn mark_leg_completed(&self, id: &str, leg_id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let raw: Option<String> = sqlx::query_scalar(
            "SELECT completed_legs FROM queue_entries WHERE queue = ?1 AND id = ?2",
        )
        .bind(self.kind.as_str())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(raw) = raw else {
            return Err(DbError::not_found("Queue entry", id));
        };

        let mut legs: Vec<String> = serde_json::from_str(&raw)
            .map_err(|e| DbError::corrupt(TABLE, self.key(id), e))?;

        if !legs.iter().any(|l| l == leg_id) {
            legs.push(leg_id.to_string());

            sqlx::query(
                "UPDATE queue_entries SET completed_legs = ?3 WHERE queue = ?1 AND id = ?2",
            )
            .bind(self.kind.as_str())
            .bind(id)
            .bind(serde_json::to_string(&legs)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(queue = %self.kind, id = %id, leg = %leg_id, "Leg completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Row decoding
    // -------------------------------------------------------------------------

    fn key(&self, id: &str) -> String {
        format!("{}/{}", self.kind, id)
    }

    fn decode(&self, row: &SqliteRow) -> DbResult<QueueEntry> {
        let id: String = row.try_get("id")?;
        let corrupt = |reason: String| DbError::corrupt(TABLE, self.key(&id), reason);

        let payload_raw: String = row.try_get("payload")?;
        let payload: EntryPayload =
            serde_json::from_str(&payload_raw).map_err(|e| corrupt(e.to_string()))?;

        if payload.queue() != self.kind {
            return Err(corrupt(format!("payload kind {} in wrong queue", payload.queue())));
        }

        let status: String = row.try_get("status")?;
        let status = status
            .parse::<EntryStatus>()
            .map_err(|e| corrupt(e.to_string()))?;

        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let attempted_at: Option<DateTime<Utc>> = row.try_get("attempted_at")?;

        let legs_raw: String = row.try_get("completed_legs")?;
        let completed_legs: Vec<String> =
            serde_json::from_str(&legs_raw).map_err(|e| corrupt(e.to_string()))?;

        Ok(QueueEntry {
            payload,
            status,
            created_at,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            attempted_at,
            completed_legs,
            id,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
