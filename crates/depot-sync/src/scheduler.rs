//! # Sync Scheduler
//!
//! One scheduler per queue. Decides when to flush and runs the batch.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │               online edge / timer / manual retry                        │
//! │        ┌──────────┐ ─────────────────────────────────► ┌────────────┐   │
//! │        │   Idle   │                                    │  Flushing  │   │
//! │        └──────────┘ ◄───────────────────────────────── └─────┬──────┘   │
//! │                       whole batch done (any outcome)         │          │
//! │                                                              │          │
//! │   any trigger while Flushing is ignored ◄────────────────────┘          │
//! │                                                                         │
//! │  BATCH:                                                                 │
//! │  1. snapshot list() (insertion order)                                   │
//! │  2. for each entry: mark_submitted → submit                             │
//! │        ok  → remove(id)                                                 │
//! │        err → mark_failed(id, error), keep going                         │
//! │  3. publish queue length after every entry                              │
//! │                                                                         │
//! │  TIMER:                                                                 │
//! │  • armed when a batch ends while online                                 │
//! │  • dropped on the offline edge                                          │
//! │  • period = sync.flush_interval_secs, stretched by backoff when         │
//! │    sync.backoff_enabled and the last batch had failures                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A running batch is never cancelled. Going offline only keeps the next one
//! from being scheduled.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use depot_core::QueueKind;
use depot_db::{DbError, QueueRepository};

use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::submission::SubmissionClient;

// =============================================================================
// Public Types
// =============================================================================

/// Scheduler state for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushState {
    #[default]
    Idle,
    Flushing,
}

/// What started a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Online,
    Timer,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Online => write!(f, "online"),
            Trigger::Timer => write!(f, "timer"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures the backend refused outright (subset of `failed`).
    pub rejected: usize,
}

// =============================================================================
// Timer Pacing
// =============================================================================

/// Delay before the next periodic batch.
struct Pacing {
    period: Duration,
    max_backoff: Duration,
    backoff: Option<ExponentialBackoff>,
    next: Duration,
}

impl Pacing {
    fn new(settings: &SyncSettings) -> Self {
        let period = settings.flush_interval();
        let max_backoff = Duration::from_secs(settings.max_backoff_secs);

        let backoff = settings.backoff_enabled.then(|| {
            let mut backoff = ExponentialBackoff {
                initial_interval: Duration::from_millis(settings.initial_backoff_ms),
                max_interval: max_backoff,
                multiplier: 2.0,
                randomization_factor: 0.0,
                max_elapsed_time: None,
                ..Default::default()
            };
            backoff.reset();
            backoff
        });

        Pacing {
            period,
            max_backoff,
            backoff,
            next: period,
        }
    }

    fn record(&mut self, had_failures: bool) {
        let Some(backoff) = self.backoff.as_mut() else {
            return;
        };

        if !had_failures {
            backoff.reset();
            self.next = self.period;
            return;
        }

        let stretched = backoff
            .next_backoff()
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        self.next = self.period.max(stretched);
    }

    fn next_delay(&self) -> Duration {
        self.next
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    kind: QueueKind,
    queue: QueueRepository,
    client: SubmissionClient,
    state_tx: watch::Sender<FlushState>,
    length_tx: watch::Sender<i64>,
    last_attempt_tx: watch::Sender<Option<DateTime<Utc>>>,
    pacing: Mutex<Pacing>,
}

/// Resets the state to Idle when the batch task ends, even if it panicked.
struct FlushGuard(Arc<Shared>);

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.0.state_tx.send_replace(FlushState::Idle);
    }
}

impl Shared {
    /// Idle → Flushing, atomically. Returns None if a batch is already running.
    fn try_start_flush(self: &Arc<Self>, trigger: Trigger) -> Option<JoinHandle<BatchReport>> {
        let started = self.state_tx.send_if_modified(|state| match state {
            FlushState::Idle => {
                *state = FlushState::Flushing;
                true
            }
            FlushState::Flushing => false,
        });

        if !started {
            debug!(queue = %self.kind, %trigger, "Flush already running, trigger ignored");
            return None;
        }

        let shared = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _guard = FlushGuard(Arc::clone(&shared));
            shared.run_batch(trigger).await
        }))
    }

    async fn run_batch(&self, trigger: Trigger) -> BatchReport {
        let mut report = BatchReport::default();
        self.last_attempt_tx.send_replace(Some(Utc::now()));

        let entries = match self.queue.list().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(queue = %self.kind, error = %e, "Failed to read queue, batch skipped");
                self.pacing.lock().await.record(true);
                return report;
            }
        };

        if entries.is_empty() {
            debug!(queue = %self.kind, %trigger, "Queue empty, nothing to flush");
            self.refresh_length().await;
            self.pacing.lock().await.record(false);
            return report;
        }

        info!(queue = %self.kind, %trigger, count = entries.len(), "Flushing queue");

        for entry in entries {
            match self.queue.mark_submitted(&entry.id).await {
                Ok(()) => {}
                // Cleared while the batch was running.
                Err(DbError::NotFound { .. }) => continue,
                Err(e) => warn!(queue = %self.kind, id = %entry.id, error = %e, "Failed to mark entry submitted"),
            }

            report.attempted += 1;

            match self.client.submit(&entry, &self.queue).await {
                Ok(()) => match self.queue.remove(&entry.id).await {
                    Ok(()) => {
                        report.succeeded += 1;
                        debug!(queue = %self.kind, id = %entry.id, "Entry submitted");
                    }
                    Err(e) => {
                        // Stays queued; the backend dedups the resubmission.
                        report.failed += 1;
                        error!(queue = %self.kind, id = %entry.id, error = %e, "Submitted entry could not be removed");
                    }
                },
                Err(err) => {
                    report.failed += 1;
                    self.record_failure(&entry.id, entry.attempts + 1, &err).await;
                    if err.is_rejection() {
                        report.rejected += 1;
                    }
                }
            }

            self.refresh_length().await;
        }

        self.pacing.lock().await.record(report.failed > 0);

        info!(
            queue = %self.kind,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Flush complete"
        );

        report
    }

    async fn record_failure(&self, id: &str, attempts: i64, err: &SyncError) {
        if err.is_rejection() {
            warn!(queue = %self.kind, %id, attempts, error = %err, "Entry rejected by backend, kept for retry");
        } else {
            info!(queue = %self.kind, %id, attempts, error = %err, "Entry submission failed, will retry");
        }

        if let Err(e) = self.queue.mark_failed(id, &err.to_string()).await {
            warn!(queue = %self.kind, %id, error = %e, "Failed to record submission failure");
        }
    }

    async fn refresh_length(&self) {
        match self.queue.len().await {
            Ok(len) => {
                self.length_tx.send_replace(len);
            }
            Err(e) => warn!(queue = %self.kind, error = %e, "Failed to count queue"),
        }
    }
}

// =============================================================================
// Scheduler Loop
// =============================================================================

/// Runs one queue's scheduler. Create with [`Scheduler::spawn`].
pub struct Scheduler {
    shared: Arc<Shared>,
    online_rx: watch::Receiver<bool>,
    state_rx: watch::Receiver<FlushState>,
    shutdown_rx: mpsc::Receiver<()>,
    timer: Option<Pin<Box<Sleep>>>,
}

/// Handle for triggering and observing one scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    shutdown_tx: mpsc::Sender<()>,
}

impl Scheduler {
    /// Starts the scheduler loop for `queue` and returns its handle.
    ///
    /// If the monitor already reports online, a first batch starts right away.
    pub fn spawn(
        queue: QueueRepository,
        client: SubmissionClient,
        connectivity: &ConnectivityMonitor,
        settings: &SyncSettings,
    ) -> SchedulerHandle {
        let (state_tx, state_rx) = watch::channel(FlushState::Idle);
        let (length_tx, _) = watch::channel(0);
        let (last_attempt_tx, _) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            kind: queue.kind(),
            queue,
            client,
            state_tx,
            length_tx,
            last_attempt_tx,
            pacing: Mutex::new(Pacing::new(settings)),
        });

        let scheduler = Scheduler {
            shared: Arc::clone(&shared),
            online_rx: connectivity.subscribe(),
            state_rx,
            shutdown_rx,
            timer: None,
        };

        tokio::spawn(scheduler.run());

        SchedulerHandle { shared, shutdown_tx }
    }

    async fn run(mut self) {
        let kind = self.shared.kind;
        info!(queue = %kind, "Scheduler starting");

        self.shared.refresh_length().await;

        if *self.online_rx.borrow_and_update() {
            self.shared.try_start_flush(Trigger::Online);
        }

        loop {
            tokio::select! {
                changed = self.online_rx.changed() => {
                    if changed.is_err() {
                        debug!(queue = %kind, "Connectivity monitor dropped");
                        break;
                    }

                    if *self.online_rx.borrow_and_update() {
                        // The timer is armed again when this batch ends.
                        self.shared.try_start_flush(Trigger::Online);
                    } else {
                        self.timer = None;
                    }
                }

                _ = tick(&mut self.timer) => {
                    self.timer = None;
                    self.shared.try_start_flush(Trigger::Timer);
                }

                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }

                    let idle = *self.state_rx.borrow_and_update() == FlushState::Idle;
                    if idle && *self.online_rx.borrow() {
                        let delay = self.shared.pacing.lock().await.next_delay();
                        debug!(queue = %kind, delay_ms = delay.as_millis() as u64, "Next flush scheduled");
                        self.timer = Some(Box::pin(tokio::time::sleep(delay)));
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!(queue = %kind, "Scheduler shutting down");
                    break;
                }
            }
        }

        info!(queue = %kind, "Scheduler stopped");
    }
}

/// Waits for the timer, or forever when none is armed.
fn tick(timer: &mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + '_ {
    async move {
        match timer.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending::<()>().await,
        }
    }
}

impl SchedulerHandle {
    pub fn kind(&self) -> QueueKind {
        self.shared.kind
    }

    /// Manual "retry now".
    ///
    /// Returns the batch task, or None if a batch is already running.
    pub fn trigger(&self) -> Option<JoinHandle<BatchReport>> {
        self.shared.try_start_flush(Trigger::Manual)
    }

    pub fn flush_state(&self) -> watch::Receiver<FlushState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_flushing(&self) -> bool {
        *self.shared.state_tx.borrow() == FlushState::Flushing
    }

    /// Number of queued entries, updated as the queue changes.
    pub fn queue_length(&self) -> watch::Receiver<i64> {
        self.shared.length_tx.subscribe()
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_attempt_tx.borrow()
    }

    /// Re-reads the queue length (after an enqueue from outside).
    pub async fn refresh_length(&self) {
        self.shared.refresh_length().await;
    }

    /// Stops the loop, then waits for a running batch to finish.
    pub async fn shutdown(&self) -> SyncResult<()> {
        // A closed channel means the loop already stopped.
        let _ = self.shutdown_tx.send(()).await;

        let mut state = self.flush_state();
        state
            .wait_for(|s| *s == FlushState::Idle)
            .await
            .map_err(|_| SyncError::ChannelError("Flush state channel closed".into()))?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::tests::{order_entry, MockApi};
    use depot_core::EntryStatus;
    use depot_db::{Database, DbConfig};
    use tokio::sync::Semaphore;

    const LONG: u64 = 3600;

    fn settings(period_secs: u64) -> SyncSettings {
        SyncSettings {
            flush_interval_secs: period_secs,
            ..SyncSettings::default()
        }
    }

    async fn setup(api: Arc<MockApi>) -> (Database, QueueRepository, SubmissionClient) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = db.queue(QueueKind::Orders);
        (db, queue, SubmissionClient::new(api))
    }

    async fn wait_idle(handle: &SchedulerHandle) {
        let mut state = handle.flush_state();
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == FlushState::Idle))
            .await
            .unwrap()
            .unwrap();
    }

    async fn wait_until(what: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !what() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(Trigger::Online.to_string(), "online");
        assert_eq!(Trigger::Manual.to_string(), "manual");
        assert_eq!(FlushState::default(), FlushState::Idle);
    }

    #[test]
    fn test_pacing_fixed_without_backoff() {
        let mut pacing = Pacing::new(&settings(30));
        pacing.record(true);
        pacing.record(true);
        assert_eq!(pacing.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_pacing_backs_off_and_resets() {
        let mut pacing = Pacing::new(&SyncSettings {
            flush_interval_secs: 1,
            backoff_enabled: true,
            initial_backoff_ms: 2_000,
            max_backoff_secs: 10,
            ..SyncSettings::default()
        });

        let mut seen = Vec::new();
        for _ in 0..4 {
            pacing.record(true);
            seen.push(pacing.next_delay().as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 10]);

        pacing.record(false);
        assert_eq!(pacing.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_manual_batch_removes_successes_keeps_failures() {
        let api = Arc::new(MockApi::default());
        let (_db, queue, client) = setup(api.clone()).await;

        let a = order_entry("C-A");
        let b = order_entry("C-B");
        queue.enqueue(&a).await.unwrap();
        queue.enqueue(&b).await.unwrap();
        api.fail(&a.id).await;

        let monitor = ConnectivityMonitor::new(false);
        let handle = Scheduler::spawn(queue.clone(), client, &monitor, &settings(LONG));

        let report = handle.trigger().unwrap().await.unwrap();
        assert_eq!(
            report,
            BatchReport {
                attempted: 2,
                succeeded: 1,
                failed: 1,
                rejected: 0
            }
        );

        let left = queue.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, a.id);
        assert_eq!(left[0].status, EntryStatus::Failed);
        assert_eq!(left[0].attempts, 1);
        assert!(left[0].last_error.as_deref().unwrap().contains("connection refused"));

        assert_eq!(*handle.queue_length().borrow(), 1);
        assert!(handle.last_attempt().is_some());
        assert_eq!(api.calls().await, vec![a.id.clone(), b.id.clone()]);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_entries_stay_queued() {
        let api = Arc::new(MockApi::default());
        let (_db, queue, client) = setup(api.clone()).await;

        let a = order_entry("C-A");
        queue.enqueue(&a).await.unwrap();
        api.reject(&a.id).await;

        let monitor = ConnectivityMonitor::new(false);
        let handle = Scheduler::spawn(queue.clone(), client, &monitor, &settings(LONG));

        let report = handle.trigger().unwrap().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(queue.len().await.unwrap(), 1);

        // Retried again on the next cycle.
        handle.trigger().unwrap().await.unwrap();
        assert_eq!(queue.get(&a.id).await.unwrap().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_concurrent_manual_triggers_run_one_batch() {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(MockApi::gated(gate.clone()));
        let (_db, queue, client) = setup(api.clone()).await;
        queue.enqueue(&order_entry("C-1")).await.unwrap();

        let monitor = ConnectivityMonitor::new(false);
        let handle = Scheduler::spawn(queue.clone(), client, &monitor, &settings(LONG));

        let running = handle.trigger().unwrap();
        assert!(handle.is_flushing());
        assert!(handle.trigger().is_none());
        assert!(handle.trigger().is_none());

        gate.add_permits(10);
        let report = running.await.unwrap();
        assert_eq!(report.succeeded, 1);
        wait_idle(&handle).await;

        assert_eq!(api.call_count(), 1);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_flapping_yields_exactly_one_batch() {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(MockApi::gated(gate.clone()));
        let (_db, queue, client) = setup(api.clone()).await;
        queue.enqueue(&order_entry("C-1")).await.unwrap();

        let monitor = ConnectivityMonitor::new(false);
        let handle = Scheduler::spawn(queue.clone(), client, &monitor, &settings(LONG));

        for _ in 0..20 {
            monitor.set_online(true);
            monitor.set_online(false);
        }
        monitor.set_online(true);

        wait_until(|| api.call_count() == 1).await;
        gate.add_permits(10);
        wait_idle(&handle).await;

        let mut length = handle.queue_length();
        tokio::time::timeout(Duration::from_secs(5), length.wait_for(|n| *n == 0))
            .await
            .unwrap()
            .unwrap();

        // Give a stray second batch the chance to show up.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_online_at_start_flushes() {
        let api = Arc::new(MockApi::default());
        let (_db, queue, client) = setup(api.clone()).await;
        queue.enqueue(&order_entry("C-1")).await.unwrap();

        let monitor = ConnectivityMonitor::new(true);
        let handle = Scheduler::spawn(queue.clone(), client, &monitor, &settings(LONG));

        let mut length = handle.queue_length();
        tokio::time::timeout(Duration::from_secs(5), length.wait_for(|n| *n == 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_mid_batch_schedules_nothing_more() {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(MockApi::gated(gate.clone()));
        let (_db, queue, client) = setup(api.clone()).await;

        let entry = order_entry("C-1");
        queue.enqueue(&entry).await.unwrap();
        api.fail(&entry.id).await;

        let monitor = ConnectivityMonitor::new(true);
        let handle = Scheduler::spawn(queue.clone(), client, &monitor, &settings(1));

        wait_until(|| api.call_count() == 1).await;
        monitor.set_online(false);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The running batch completes.
        gate.add_permits(100);
        wait_idle(&handle).await;

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(api.call_count(), 1);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_periodic_timer_retries_while_online() {
        let api = Arc::new(MockApi::default());
        let (_db, queue, client) = setup(api.clone()).await;

        let entry = order_entry("C-1");
        queue.enqueue(&entry).await.unwrap();
        api.fail(&entry.id).await;

        let monitor = ConnectivityMonitor::new(true);
        let handle = Scheduler::spawn(queue.clone(), client, &monitor, &settings(1));

        wait_until(|| api.call_count() >= 2).await;

        api.heal(&entry.id).await;
        let mut length = handle.queue_length();
        tokio::time::timeout(Duration::from_secs(5), length.wait_for(|n| *n == 0))
            .await
            .unwrap()
            .unwrap();

        handle.shutdown().await.unwrap();
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_batch() {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(MockApi::gated(gate.clone()));
        let (_db, queue, client) = setup(api.clone()).await;
        queue.enqueue(&order_entry("C-1")).await.unwrap();

        let monitor = ConnectivityMonitor::new(false);
        let handle = Scheduler::spawn(queue.clone(), client, &monitor, &settings(LONG));
        let _running = handle.trigger().unwrap();

        let releaser = {
            let gate = gate.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                gate.add_permits(10);
            })
        };

        handle.shutdown().await.unwrap();
        assert!(!handle.is_flushing());
        assert!(queue.is_empty().await.unwrap());
        releaser.await.unwrap();

        // The loop is gone; connectivity edges start nothing.
        monitor.set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(api.call_count(), 1);
    }
}
