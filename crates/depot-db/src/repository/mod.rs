//! # Repository Module
//!
//! Database repositories for the durable queues and the cache gateway.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Scheduler (orders)       Scheduler (vouchers)    Scheduler (cash)      │
//! │       │                        │                       │                │
//! │       ▼                        ▼                       ▼                │
//! │  QueueRepository          QueueRepository         QueueRepository       │
//! │  ├── enqueue / list / get / remove / clear / len                        │
//! │  └── mark_submitted / mark_failed / mark_leg_completed                  │
//! │       │                                                                 │
//! │       └────────────────────────┬───────────────────────┘                │
//! │                                ▼                                        │
//! │                        queue_entries table                              │
//! │                                                                         │
//! │  Cache gateway ──► CacheSetRepository ──► cache_entries table           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`QueueRepository`](queue::QueueRepository) - One named durable queue
//! - [`CacheSetRepository`](cache::CacheSetRepository) - Versioned response cache

pub mod cache;
pub mod queue;
