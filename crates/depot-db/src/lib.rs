//! # depot-db: Durable Storage for Depot
//!
//! SQLite storage for the three mutation queues and the gateway's cache sets,
//! built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Depot Data Flow                                │
//! │                                                                         │
//! │  SyncEngine::enqueue_and_submit / Scheduler flush / Cache gateway       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     depot-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌─────────────┐ │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations  │ │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded)  │ │   │
//! │  │   │ SqlitePool    │◄───│ QueueRepository    │  │ 0001_...sql │ │   │
//! │  │   │ WAL + FULL    │    │ CacheSetRepository │  │             │ │   │
//! │  │   └───────────────┘    └────────────────────┘  └─────────────┘ │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  depot.db (platform data dir, or DEPOT_DB_PATH)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use depot_core::QueueKind;
//! use depot_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("depot.db")).await?;
//!
//! let orders = db.queue(QueueKind::Orders);
//! orders.enqueue(&entry).await?;
//! for entry in orders.list().await? { /* ... */ }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cache::{CacheSetRepository, CachedResponse};
pub use repository::queue::QueueRepository;
