//! # Error Types
//!
//! Domain-specific error types for depot-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  depot-core errors (this file)                                          │
//! │  ├── CoreError        - Domain errors (unknown queue, bad payload)      │
//! │  └── ValidationError  - Payload validation failures                     │
//! │                                                                         │
//! │  depot-db errors (separate crate)                                       │
//! │  └── DbError          - Queue store / cache store failures              │
//! │                                                                         │
//! │  depot-sync errors (separate crate)                                     │
//! │  └── SyncError        - Connection, rejection, config, gateway          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → control API response   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors of the queue-entry model.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A queue name that is not one of `orders`, `vouchers`, `cash_entries`.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// A persisted status string that does not map to [`EntryStatus`].
    ///
    /// [`EntryStatus`]: crate::types::EntryStatus
    #[error("Unknown entry status: {0}")]
    UnknownStatus(String),

    /// The payload kind does not belong to the queue it was submitted to.
    ///
    /// ## When This Occurs
    /// ```text
    /// POST /_depot/entries/orders  { "kind": "voucher", ... }
    ///      │
    ///      ▼
    /// QueueMismatch { queue: "orders", kind: "vouchers" }
    /// ```
    #[error("Payload of kind {kind} cannot be queued in {queue}")]
    QueueMismatch { queue: String, kind: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Payload validation errors.
///
/// Checked before an entry is accepted, so nothing invalid ever reaches the
/// durable queue.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::QueueMismatch {
            queue: "orders".to_string(),
            kind: "vouchers".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Payload of kind vouchers cannot be queued in orders"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "party_id".to_string(),
        };
        assert_eq!(err.to_string(), "party_id is required");

        let err = ValidationError::MustNotBeNegative {
            field: "split.cash".to_string(),
        };
        assert_eq!(err.to_string(), "split.cash must not be negative");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "customer_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
