//! # Sync Engine
//!
//! Facade over the three queues, their schedulers and the connectivity
//! monitor. This is what the presentation layer (and the agent's control
//! API) talks to.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue_and_submit(kind, payload)                                      │
//! │       │                                                                 │
//! │       ├── validate, check payload belongs to `kind`                     │
//! │       │                                                                 │
//! │       ├── online?  ──yes──► submit now ──ok──► Submitted (never queued) │
//! │       │                         │                                       │
//! │       │                         └─err─┐  (accepted legs remembered)     │
//! │       │                               ▼                                 │
//! │       └── offline ──────────────► enqueue ─────► Queued                 │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐     │
//! │  │ Scheduler      │  │ Scheduler      │  │ Scheduler              │     │
//! │  │ orders         │  │ vouchers       │  │ cash_entries           │     │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘     │
//! │         ▲                   ▲                       ▲                   │
//! │         └──── ConnectivityMonitor (shared, edges only) ──┘              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! With `sync.enabled = false` nothing is submitted automatically: entries
//! are always queued and only a manual retry flushes them.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use chrono::{DateTime, Utc};
use depot_core::validation::validate_entry;
use depot_core::{CoreError, EntryPayload, EntryStatus, QueueEntry, QueueKind};
use depot_db::{Database, QueueRepository};

use crate::config::DepotConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::scheduler::{BatchReport, FlushState, Scheduler, SchedulerHandle};
use crate::submission::{HttpRemoteApi, LegCollector, RemoteApi, SubmissionClient};

// =============================================================================
// Status Types
// =============================================================================

/// What happened to a freshly created mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Accepted by the backend right away; nothing was queued.
    Submitted,
    /// Stored in its queue for a later flush.
    Queued,
}

/// Snapshot of one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue: QueueKind,
    pub length: i64,
    pub state: FlushState,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Snapshot of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub sync_enabled: bool,
    pub queues: Vec<QueueStatus>,
}

impl SyncStatus {
    /// Entries waiting across all queues.
    pub fn total_pending(&self) -> i64 {
        self.queues.iter().map(|q| q.length).sum()
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

struct QueueSlot {
    repo: QueueRepository,
    scheduler: SchedulerHandle,
}

/// Owns the per-queue schedulers. Cheap to share behind an `Arc`.
pub struct SyncEngine {
    connectivity: ConnectivityMonitor,
    client: SubmissionClient,
    enabled: bool,
    slots: [QueueSlot; 3],
}

impl SyncEngine {
    /// Spawns one scheduler per queue.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        db: &Database,
        api: Arc<dyn RemoteApi>,
        connectivity: ConnectivityMonitor,
        config: &DepotConfig,
    ) -> Self {
        let client = SubmissionClient::new(api);
        let enabled = config.is_sync_enabled();

        // Disabled sync: schedulers listen to a monitor nobody feeds, so only
        // manual retries flush.
        let scheduler_signal = if enabled {
            connectivity.clone()
        } else {
            ConnectivityMonitor::new(false)
        };

        let slots = QueueKind::ALL.map(|kind| {
            let repo = db.queue(kind);
            let scheduler = Scheduler::spawn(
                repo.clone(),
                client.clone(),
                &scheduler_signal,
                &config.sync,
            );
            QueueSlot { repo, scheduler }
        });

        info!(enabled, online = connectivity.is_online(), "Sync engine started");

        SyncEngine {
            connectivity,
            client,
            enabled,
            slots,
        }
    }

    fn slot(&self, kind: QueueKind) -> &QueueSlot {
        match kind {
            QueueKind::Orders => &self.slots[0],
            QueueKind::Vouchers => &self.slots[1],
            QueueKind::CashEntries => &self.slots[2],
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Records a new user mutation under a fresh client reference.
    pub async fn enqueue_and_submit(
        &self,
        kind: QueueKind,
        payload: EntryPayload,
    ) -> SyncResult<SubmitOutcome> {
        self.submit_entry(kind, QueueEntry::new(payload)).await
    }

    /// Records a mutation whose client reference the caller already chose.
    ///
    /// Submits immediately when online; otherwise, or when that attempt
    /// fails, the entry is queued. Reusing the id of a queued entry is a
    /// no-op that reports `Queued`.
    pub async fn submit_entry(
        &self,
        kind: QueueKind,
        mut entry: QueueEntry,
    ) -> SyncResult<SubmitOutcome> {
        if entry.kind() != kind {
            return Err(CoreError::QueueMismatch {
                queue: kind.to_string(),
                kind: entry.kind().to_string(),
            }
            .into());
        }
        validate_entry(&entry)?;

        let slot = self.slot(kind);

        // The queued copy owns delivery; submitting here would send it twice.
        if slot.repo.get(&entry.id).await?.is_some() {
            debug!(queue = %kind, id = %entry.id, "Entry already queued");
            return Ok(SubmitOutcome::Queued);
        }

        if self.enabled && self.connectivity.is_online() {
            let legs = LegCollector::new();
            match self.client.submit(&entry, &legs).await {
                Ok(()) => {
                    info!(queue = %kind, id = %entry.id, "Entry submitted immediately");
                    return Ok(SubmitOutcome::Submitted);
                }
                Err(err) => {
                    if err.is_rejection() {
                        warn!(queue = %kind, id = %entry.id, error = %err, "Immediate submission rejected, queueing");
                    } else {
                        info!(queue = %kind, id = %entry.id, error = %err, "Immediate submission failed, queueing");
                    }
                    entry.completed_legs = legs.into_legs().await;
                    entry.status = EntryStatus::Failed;
                    entry.attempts += 1;
                    entry.last_error = Some(err.to_string());
                    entry.attempted_at = Some(Utc::now());
                }
            }
        }

        if !slot.repo.enqueue(&entry).await? {
            debug!(queue = %kind, id = %entry.id, "Entry already queued");
        }
        slot.scheduler.refresh_length().await;

        Ok(SubmitOutcome::Queued)
    }

    // =========================================================================
    // Manual Retry
    // =========================================================================

    /// Manual "retry now" for one queue.
    ///
    /// Waits for the batch and returns its report, or None if a batch was
    /// already running (the trigger is ignored).
    pub async fn retry_now(&self, kind: QueueKind) -> SyncResult<Option<BatchReport>> {
        let Some(task) = self.slot(kind).scheduler.trigger() else {
            return Ok(None);
        };

        task.await
            .map(Some)
            .map_err(|e| SyncError::Internal(format!("Flush task failed: {e}")))
    }

    /// Manual retry of every queue. The three batches run concurrently.
    pub async fn retry_all(&self) -> SyncResult<Vec<(QueueKind, Option<BatchReport>)>> {
        let tasks: Vec<_> = self
            .slots
            .iter()
            .map(|slot| (slot.scheduler.kind(), slot.scheduler.trigger()))
            .collect();

        let mut reports = Vec::with_capacity(tasks.len());
        for (kind, task) in tasks {
            let report = match task {
                Some(task) => Some(
                    task.await
                        .map_err(|e| SyncError::Internal(format!("Flush task failed: {e}")))?,
                ),
                None => None,
            };
            reports.push((kind, report));
        }
        Ok(reports)
    }

    // =========================================================================
    // Observables
    // =========================================================================

    pub fn queue_length(&self, kind: QueueKind) -> watch::Receiver<i64> {
        self.slot(kind).scheduler.queue_length()
    }

    pub fn flush_state(&self, kind: QueueKind) -> watch::Receiver<FlushState> {
        self.slot(kind).scheduler.flush_state()
    }

    pub fn is_flushing(&self, kind: QueueKind) -> bool {
        self.slot(kind).scheduler.is_flushing()
    }

    /// Entries currently waiting in one queue, in insertion order.
    pub async fn pending(&self, kind: QueueKind) -> SyncResult<Vec<QueueEntry>> {
        Ok(self.slot(kind).repo.list().await?)
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Feeds the host's connectivity signal.
    pub fn set_online(&self, online: bool) -> bool {
        self.connectivity.set_online(online)
    }

    pub fn status(&self) -> SyncStatus {
        let queues = self
            .slots
            .iter()
            .map(|slot| QueueStatus {
                queue: slot.scheduler.kind(),
                length: *slot.scheduler.queue_length().borrow(),
                state: *slot.scheduler.flush_state().borrow(),
                last_attempt: slot.scheduler.last_attempt(),
            })
            .collect();

        SyncStatus {
            online: self.connectivity.is_online(),
            sync_enabled: self.enabled,
            queues,
        }
    }

    /// Stops every scheduler. Batches already running finish first.
    pub async fn shutdown(&self) -> SyncResult<()> {
        info!("Sync engine shutting down");
        for slot in &self.slots {
            slot.scheduler.shutdown().await?;
        }
        info!("Sync engine stopped");
        Ok(())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: DepotConfig,
    api: Option<Arc<dyn RemoteApi>>,
    connectivity: Option<ConnectivityMonitor>,
}

impl SyncEngineBuilder {
    pub fn new(config: DepotConfig) -> Self {
        SyncEngineBuilder {
            config,
            api: None,
            connectivity: None,
        }
    }

    /// Uses a custom backend instead of the HTTP one.
    pub fn with_api(mut self, api: Arc<dyn RemoteApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Validates the configuration and starts the engine.
    pub fn build(self, db: &Database) -> SyncResult<SyncEngine> {
        self.config.validate()?;

        let api = match self.api {
            Some(api) => api,
            None => Arc::new(HttpRemoteApi::new(&self.config.api, &self.config.device)?),
        };
        let connectivity = self.connectivity.unwrap_or_default();

        Ok(SyncEngine::start(db, api, connectivity, &self.config))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
