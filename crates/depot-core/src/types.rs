//! # Domain Types
//!
//! Core domain types for the offline mutation queue.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Queue Entry Model                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                        QueueEntry                               │   │
//! │  │  ─────────────────────────────────────────────────────────────  │   │
//! │  │  id (UUID v4, client-generated, never regenerated)              │   │
//! │  │  status (Pending | Submitted | Failed)                          │   │
//! │  │  created_at, attempts, last_error, attempted_at                 │   │
//! │  │  completed_legs (cash entries only)                             │   │
//! │  │  payload ──────────────┐                                        │   │
//! │  └────────────────────────┼────────────────────────────────────────┘   │
//! │                           ▼                                             │
//! │  ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────────────┐   │
//! │  │  Order          │ │  Voucher        │ │  CashEntry              │   │
//! │  │  ─────────────  │ │  ─────────────  │ │  ─────────────────────  │   │
//! │  │  customer_id    │ │  party_id       │ │  party_id               │   │
//! │  │  document       │ │  amount_cents   │ │  split ──► CashLeg × N  │   │
//! │  │                 │ │  document       │ │  (one per nonzero       │   │
//! │  │  1 call         │ │  1 call         │ │   payment method)       │   │
//! │  └─────────────────┘ └─────────────────┘ └─────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! The entry id is the idempotency key the server deduplicates on. Cash legs
//! derive `"{entry_id}:{method}"` from it, so every retry of the same leg
//! carries the same identifier.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// Queue Kind
// =============================================================================

/// The three independent durable queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Sales orders.
    Orders,
    /// Payment vouchers.
    Vouchers,
    /// Cash-collection entries (multi-leg).
    CashEntries,
}

impl QueueKind {
    /// Every queue, in a fixed order.
    pub const ALL: [QueueKind; 3] = [QueueKind::Orders, QueueKind::Vouchers, QueueKind::CashEntries];

    /// Stable storage key of the queue.
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Orders => "orders",
            QueueKind::Vouchers => "vouchers",
            QueueKind::CashEntries => "cash_entries",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "orders" | "order" => Ok(QueueKind::Orders),
            "vouchers" | "voucher" => Ok(QueueKind::Vouchers),
            "cash_entries" | "cash-entries" | "cash_entry" | "cash" => Ok(QueueKind::CashEntries),
            other => Err(CoreError::UnknownQueue(other.to_string())),
        }
    }
}

// =============================================================================
// Entry Status
// =============================================================================

/// Submission status of a queued entry.
///
/// ```text
///   enqueue           flush picks it up        call fails
///  ─────────► Pending ─────────────────► Submitted ────────► Failed
///                                           │                  │
///                                           │ confirmed        │ next flush
///                                           ▼                  ▼
///                                       (removed)          Submitted ...
/// ```
///
/// An entry read back as `Submitted` after a restart had its attempt cut
/// short; it is retried exactly like `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Never attempted.
    #[default]
    Pending,
    /// A submission attempt is in flight.
    Submitted,
    /// The last attempt failed; the entry stays queued.
    Failed,
}

impl EntryStatus {
    /// Stable storage representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Submitted => "submitted",
            EntryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "submitted" => Ok(EntryStatus::Submitted),
            "failed" => Ok(EntryStatus::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// Payment methods a cash-collection entry can be split across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Cheque,
    BankTransfer,
    Card,
    Wallet,
}

impl PaymentMethod {
    /// Leg derivation order.
    pub const ALL: [PaymentMethod; 5] = [
        PaymentMethod::Cash,
        PaymentMethod::Cheque,
        PaymentMethod::BankTransfer,
        PaymentMethod::Card,
        PaymentMethod::Wallet,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount collected per payment method, in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentSplit {
    #[serde(default)]
    pub cash: i64,
    #[serde(default)]
    pub cheque: i64,
    #[serde(default)]
    pub bank_transfer: i64,
    #[serde(default)]
    pub card: i64,
    #[serde(default)]
    pub wallet: i64,
}

impl PaymentSplit {
    /// Returns the amount recorded for one method.
    pub fn amount(&self, method: PaymentMethod) -> i64 {
        match method {
            PaymentMethod::Cash => self.cash,
            PaymentMethod::Cheque => self.cheque,
            PaymentMethod::BankTransfer => self.bank_transfer,
            PaymentMethod::Card => self.card,
            PaymentMethod::Wallet => self.wallet,
        }
    }

    /// Methods with a nonzero amount, in derivation order.
    pub fn nonzero(&self) -> impl Iterator<Item = (PaymentMethod, i64)> + '_ {
        PaymentMethod::ALL
            .into_iter()
            .map(|m| (m, self.amount(m)))
            .filter(|(_, amount)| *amount != 0)
    }

    /// Sum across all methods.
    pub fn total(&self) -> i64 {
        PaymentMethod::ALL.iter().map(|m| self.amount(*m)).sum()
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// A sales order captured offline.
///
/// `document` is the order body exactly as the order form produced it; the
/// engine never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderPayload {
    pub customer_id: String,
    #[ts(type = "unknown")]
    #[serde(default)]
    pub document: serde_json::Value,
}

/// A payment voucher captured offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VoucherPayload {
    pub party_id: String,
    pub amount_cents: i64,
    #[ts(type = "unknown")]
    #[serde(default)]
    pub document: serde_json::Value,
}

/// A cash-collection entry, possibly split across several payment methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashEntryPayload {
    pub party_id: String,
    #[ts(as = "String")]
    pub collected_on: NaiveDate,
    pub split: PaymentSplit,
    #[serde(default)]
    pub narration: Option<String>,
    #[ts(type = "unknown")]
    #[serde(default)]
    pub document: serde_json::Value,
}

/// The queued mutation, tagged by kind.
///
/// Serialized adjacently tagged: `{"kind": "cash_entry", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EntryPayload {
    Order(OrderPayload),
    Voucher(VoucherPayload),
    CashEntry(CashEntryPayload),
}

impl EntryPayload {
    /// The queue this payload belongs to.
    pub fn queue(&self) -> QueueKind {
        match self {
            EntryPayload::Order(_) => QueueKind::Orders,
            EntryPayload::Voucher(_) => QueueKind::Vouchers,
            EntryPayload::CashEntry(_) => QueueKind::CashEntries,
        }
    }
}

// =============================================================================
// Cash Leg
// =============================================================================

/// One payment-method-specific sub-submission of a cash entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashLeg {
    /// Deterministic per-leg identifier: `"{entry_id}:{method}"`.
    pub leg_id: String,
    pub entry_id: String,
    pub party_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub collected_on: NaiveDate,
    pub narration: Option<String>,
    #[ts(type = "unknown")]
    pub document: serde_json::Value,
}

/// Builds the leg identifier for one method of an entry.
pub fn leg_id(entry_id: &str, method: PaymentMethod) -> String {
    format!("{}:{}", entry_id, method.as_str())
}

// =============================================================================
// Queue Entry
// =============================================================================

/// One durably-persisted pending mutation awaiting submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueEntry {
    /// Client-generated identity, stable across retries.
    pub id: String,

    pub payload: EntryPayload,

    pub status: EntryStatus,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// Failed submission attempts so far.
    pub attempts: i64,

    pub last_error: Option<String>,

    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,

    /// Leg ids the server has already accepted (cash entries only).
    #[serde(default)]
    pub completed_legs: Vec<String>,
}

impl QueueEntry {
    /// Creates a new pending entry with a freshly generated id.
    pub fn new(payload: EntryPayload) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    /// Creates a pending entry with a caller-supplied id.
    pub fn with_id(id: impl Into<String>, payload: EntryPayload) -> Self {
        QueueEntry {
            id: id.into(),
            payload,
            status: EntryStatus::Pending,
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            attempted_at: None,
            completed_legs: Vec::new(),
        }
    }

    /// The queue this entry lives in.
    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.payload.queue()
    }

    /// All legs of a cash entry, one per nonzero method. Empty for orders and
    /// vouchers.
    pub fn legs(&self) -> Vec<CashLeg> {
        let EntryPayload::CashEntry(cash) = &self.payload else {
            return Vec::new();
        };

        cash.split
            .nonzero()
            .map(|(method, amount_cents)| CashLeg {
                leg_id: leg_id(&self.id, method),
                entry_id: self.id.clone(),
                party_id: cash.party_id.clone(),
                method,
                amount_cents,
                collected_on: cash.collected_on,
                narration: cash.narration.clone(),
                document: cash.document.clone(),
            })
            .collect()
    }

    /// Legs that still need to be submitted.
    pub fn pending_legs(&self) -> Vec<CashLeg> {
        self.legs()
            .into_iter()
            .filter(|leg| !self.is_leg_completed(&leg.leg_id))
            .collect()
    }

    /// Returns true if the server already accepted this leg.
    pub fn is_leg_completed(&self, leg_id: &str) -> bool {
        self.completed_legs.iter().any(|l| l == leg_id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cash_entry(split: PaymentSplit) -> QueueEntry {
        QueueEntry::with_id(
            "e-1",
            EntryPayload::CashEntry(CashEntryPayload {
                party_id: "P-100".to_string(),
                collected_on: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
                split,
                narration: None,
                document: serde_json::Value::Null,
            }),
        )
    }

    #[test]
    fn test_zero_amount_legs_are_skipped() {
        let entry = cash_entry(PaymentSplit {
            cash: 500,
            cheque: 0,
            bank_transfer: 1200,
            card: 300,
            wallet: 0,
        });

        let legs = entry.legs();
        assert_eq!(legs.len(), 3);
        assert_eq!(legs[0].leg_id, "e-1:cash");
        assert_eq!(legs[1].leg_id, "e-1:bank_transfer");
        assert_eq!(legs[2].leg_id, "e-1:card");
    }

    #[test]
    fn test_leg_ids_are_deterministic() {
        let split = PaymentSplit {
            cash: 100,
            ..Default::default()
        };
        assert_eq!(cash_entry(split).legs(), cash_entry(split).legs());
    }

    #[test]
    fn test_pending_legs_exclude_completed() {
        let mut entry = cash_entry(PaymentSplit {
            cash: 100,
            cheque: 200,
            ..Default::default()
        });
        entry.completed_legs.push("e-1:cash".to_string());

        let pending = entry.pending_legs();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, PaymentMethod::Cheque);
    }

    #[test]
    fn test_order_has_no_legs() {
        let entry = QueueEntry::new(EntryPayload::Order(OrderPayload {
            customer_id: "C-1".to_string(),
            document: serde_json::json!({"lines": []}),
        }));
        assert!(entry.legs().is_empty());
        assert_eq!(entry.kind(), QueueKind::Orders);
        assert_eq!(entry.status, EntryStatus::Pending);
    }

    #[test]
    fn test_payload_serialization_is_tagged() {
        let payload = EntryPayload::Voucher(VoucherPayload {
            party_id: "V-9".to_string(),
            amount_cents: 4200,
            document: serde_json::Value::Null,
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "voucher");
        assert_eq!(json["payload"]["amount_cents"], 4200);
    }

    #[test]
    fn test_queue_kind_parsing() {
        assert_eq!("orders".parse::<QueueKind>().unwrap(), QueueKind::Orders);
        assert_eq!("cash-entries".parse::<QueueKind>().unwrap(), QueueKind::CashEntries);
        assert!("invoices".parse::<QueueKind>().is_err());
    }

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in [EntryStatus::Pending, EntryStatus::Submitted, EntryStatus::Failed] {
            assert_eq!(status.as_str().parse::<EntryStatus>().unwrap(), status);
        }
    }
}
