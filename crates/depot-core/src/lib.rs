//! # depot-core: Pure Queue-Entry Model
//!
//! The domain model of the offline mutation queue: what a queued entry is,
//! how a cash entry splits into legs, and which payloads are acceptable.
//! Zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Depot Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                Presentation layer (browser forms)               │   │
//! │  │     Order form ──► Cash collection ──► Voucher form             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ control API / gateway proxy            │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 depot-sync (engine + gateway)                   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ depot-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────────┐  ┌────────────────┐  ┌────────────────┐   │   │
//! │  │   │     types      │  │   validation   │  │     error      │   │   │
//! │  │   │  QueueEntry    │  │  payload rules │  │   CoreError    │   │   │
//! │  │   │  EntryPayload  │  │                │  │ ValidationError│   │   │
//! │  │   │  CashLeg       │  │                │  │                │   │   │
//! │  │   └────────────────┘  └────────────────┘  └────────────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    depot-db (SQLite store)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Queue entries, payloads, cash legs
//! - [`error`] - Domain error types
//! - [`validation`] - Payload validation
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use depot_core::{CashEntryPayload, EntryPayload, PaymentSplit, QueueEntry};
//!
//! let entry = QueueEntry::with_id(
//!     "7f1c",
//!     EntryPayload::CashEntry(CashEntryPayload {
//!         party_id: "P-100".to_string(),
//!         collected_on: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
//!         split: PaymentSplit { cash: 5_000, cheque: 0, card: 1_250, ..Default::default() },
//!         narration: None,
//!         document: serde_json::Value::Null,
//!     }),
//! );
//!
//! let legs: Vec<String> = entry.legs().into_iter().map(|l| l.leg_id).collect();
//! assert_eq!(legs, vec!["7f1c:cash", "7f1c:card"]);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of an entry id or party/customer reference.
pub const MAX_ID_LEN: usize = 64;
