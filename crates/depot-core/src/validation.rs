//! # Validation Module
//!
//! Payload validation for entries entering the queue.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Forms (presentation layer)                                    │
//! │  └── Immediate user feedback                                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: SyncEngine::enqueue_and_submit                                │
//! │  ├── Type validation (deserialization)                                  │
//! │  └── THIS MODULE: payload rules                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  └── PRIMARY KEY (queue, id)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An entry that fails here is never queued: the server would reject it on
//! every retry and it would sit in the queue forever.

use crate::error::ValidationError;
use crate::types::{
    CashEntryPayload, EntryPayload, OrderPayload, PaymentMethod, QueueEntry, VoucherPayload,
};
use crate::MAX_ID_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a party/customer reference.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_ID_LEN`] characters
///
/// ## Example
/// ```rust
/// use depot_core::validation::validate_reference;
///
/// assert!(validate_reference("party_id", "P-100").is_ok());
/// assert!(validate_reference("party_id", "  ").is_err());
/// ```
pub fn validate_reference(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    Ok(())
}

/// Validates a client-generated entry id.
pub fn validate_entry_id(id: &str) -> ValidationResult<()> {
    validate_reference("id", id)?;

    // Leg ids are "{entry_id}:{method}", so the entry id itself must not
    // contain the separator.
    if id.contains(':') {
        return Err(ValidationError::InvalidFormat {
            field: "id".to_string(),
            reason: "must not contain ':'".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Payload Validators
// =============================================================================

pub fn validate_order(order: &OrderPayload) -> ValidationResult<()> {
    validate_reference("customer_id", &order.customer_id)
}

pub fn validate_voucher(voucher: &VoucherPayload) -> ValidationResult<()> {
    validate_reference("party_id", &voucher.party_id)?;

    if voucher.amount_cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount_cents".to_string(),
        });
    }

    Ok(())
}

/// Validates a cash-collection entry.
///
/// ## Rules
/// - `party_id` required
/// - No negative method amount
/// - At least one nonzero method (an all-zero entry would have no legs and
///   would be "confirmed" without ever reaching the server)
pub fn validate_cash_entry(cash: &CashEntryPayload) -> ValidationResult<()> {
    validate_reference("party_id", &cash.party_id)?;

    for method in PaymentMethod::ALL {
        if cash.split.amount(method) < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: format!("split.{}", method.as_str()),
            });
        }
    }

    if cash.split.nonzero().next().is_none() {
        return Err(ValidationError::MustBePositive {
            field: "split".to_string(),
        });
    }

    Ok(())
}

/// Dispatches to the validator for the payload's kind.
pub fn validate_payload(payload: &EntryPayload) -> ValidationResult<()> {
    match payload {
        EntryPayload::Order(order) => validate_order(order),
        EntryPayload::Voucher(voucher) => validate_voucher(voucher),
        EntryPayload::CashEntry(cash) => validate_cash_entry(cash),
    }
}

/// Validates a complete entry before it is queued.
pub fn validate_entry(entry: &QueueEntry) -> ValidationResult<()> {
    validate_entry_id(&entry.id)?;
    validate_payload(&entry.payload)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaymentSplit;
    use chrono::NaiveDate;

    fn cash(split: PaymentSplit) -> CashEntryPayload {
        CashEntryPayload {
            party_id: "P-1".to_string(),
            collected_on: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            split,
            narration: Some("weekly collection".to_string()),
            document: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("customer_id", "C-42").is_ok());
        assert!(validate_reference("customer_id", "").is_err());
        assert!(validate_reference("customer_id", &"X".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_entry_id_rejects_leg_separator() {
        assert!(validate_entry_id("abc-123").is_ok());
        assert!(matches!(
            validate_entry_id("abc:cash"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_voucher_amount_must_be_positive() {
        let voucher = VoucherPayload {
            party_id: "P-1".to_string(),
            amount_cents: 0,
            document: serde_json::Value::Null,
        };
        assert!(matches!(
            validate_voucher(&voucher),
            Err(ValidationError::MustBePositive { .. })
        ));
    }

    #[test]
    fn test_cash_entry_needs_a_nonzero_leg() {
        assert!(validate_cash_entry(&cash(PaymentSplit::default())).is_err());
        assert!(validate_cash_entry(&cash(PaymentSplit {
            card: 10,
            ..Default::default()
        }))
        .is_ok());
    }

    #[test]
    fn test_cash_entry_rejects_negative_amounts() {
        let err = validate_cash_entry(&cash(PaymentSplit {
            cash: 100,
            wallet: -5,
            ..Default::default()
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "split.wallet must not be negative");
    }

    #[test]
    fn test_validate_entry_checks_id_and_payload() {
        let entry = QueueEntry::new(EntryPayload::Order(OrderPayload {
            customer_id: "C-1".to_string(),
            document: serde_json::json!({"lines": [{"sku": "A", "qty": 2}]}),
        }));
        assert!(validate_entry(&entry).is_ok());

        let bad = QueueEntry::with_id(
            "",
            EntryPayload::Order(OrderPayload {
                customer_id: "C-1".to_string(),
                document: serde_json::Value::Null,
            }),
        );
        assert!(validate_entry(&bad).is_err());
    }
}
