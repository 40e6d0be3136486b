//! # depot-sync: Sync Engine + Cache Gateway for Depot
//!
//! Reconciles the durable queues with the backend, and keeps the application
//! shell loadable while the device is offline.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Depot Agent Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncEngine (facade)                          │  │
//! │  │                                                                  │  │
//! │  │  enqueue_and_submit · retry_now · queue_length · is_flushing     │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connectivity   │  │ Scheduler × 3  │  │ SubmissionClient       │    │
//! │  │ Monitor        │─►│                │─►│                        │    │
//! │  │ edges only     │  │ Idle/Flushing  │  │ RemoteApi (HTTP)       │    │
//! │  │                │  │ timer, backoff │  │ one call per cash leg  │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     Cache Gateway                                │   │
//! │  │                                                                 │   │
//! │  │ NetworkFirst (pages) · StaleWhileRevalidate (assets) ·          │   │
//! │  │ CacheFirst (images), versioned cache sets, axum proxy server    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Agent configuration (device, api, sync, storage, gateway)
//! - [`connectivity`] - Online/offline signal with edge notifications
//! - [`engine`] - `SyncEngine` facade over the three queues
//! - [`error`] - Sync error types
//! - [`gateway`] - Cache strategies, cache lifecycle, local proxy server
//! - [`scheduler`] - Per-queue flush state machine
//! - [`submission`] - Remote calls for one queued entry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use depot_sync::{DepotConfig, SyncEngineBuilder};
//! use depot_core::QueueKind;
//!
//! let config = DepotConfig::load_or_default(None);
//! let engine = SyncEngineBuilder::new(config).build(&db)?;
//!
//! engine.set_online(true);
//! let outcome = engine.enqueue_and_submit(QueueKind::Orders, payload).await?;
//! println!("Pending orders: {}", *engine.queue_length(QueueKind::Orders).borrow());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod scheduler;
pub mod submission;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ApiSettings, DepotConfig, DeviceConfig, GatewaySettings, StorageSettings, SyncSettings};
pub use connectivity::ConnectivityMonitor;
pub use engine::{QueueStatus, SubmitOutcome, SyncEngine, SyncEngineBuilder, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use gateway::{CacheGateway, CacheStore, Fetcher, GatewayHandle, GatewayServer, HttpFetcher};
pub use scheduler::{BatchReport, FlushState, SchedulerHandle};
pub use submission::{HttpRemoteApi, RemoteApi, SubmissionClient};
