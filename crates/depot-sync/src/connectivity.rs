//! # Connectivity Monitor
//!
//! A passive online/offline signal with edge-only notifications.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  host pipeline ──set_online(bool)──► ConnectivityMonitor                │
//! │  (browser online/offline events      watch<bool>                       │
//! │   via POST /_depot/connectivity)         │                              │
//! │                                          │ changed() fires only when    │
//! │                                          │ the value actually flips     │
//! │                       ┌──────────────────┼──────────────────┐           │
//! │                       ▼                  ▼                  ▼           │
//! │               Scheduler(orders)  Scheduler(vouchers)  Scheduler(cash)   │
//! │                                                                         │
//! │  online → offline → online between two observations: the subscriber    │
//! │  wakes once and reads `true` (flapping coalesces to the latest value).  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The monitor performs no probing. It may say "online" while the backend is
//! unreachable; that surfaces as ordinary submission failures.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared online/offline signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with an initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        ConnectivityMonitor { tx: Arc::new(tx) }
    }

    /// Feeds the host's connectivity signal.
    ///
    /// Returns true if this call was an edge. Repeating the current value is
    /// a no-op and wakes nobody.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "Connectivity changed");
        }

        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribes to edges. The returned receiver starts with the current
    /// value marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    /// Starts offline; the host reports the first "online".
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_value_is_not_an_edge() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_online(false));
        assert!(!rx.has_changed().unwrap());

        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_flapping_coalesces_to_latest() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();

        for _ in 0..10 {
            monitor.set_online(false);
            monitor.set_online(true);
        }
        monitor.set_online(false);

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!rx.has_changed().unwrap());
        assert!(!monitor.is_online());
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = ConnectivityMonitor::default();
        let other = monitor.clone();
        other.set_online(true);
        assert!(monitor.is_online());
    }
}
