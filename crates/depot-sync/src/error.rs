//! # Sync Error Types
//!
//! Error types for sync and gateway operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Backend answer      │ │
//! │  │                 │  │  (retryable)    │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Server (5xx/408/429)   │ │
//! │  │  MissingDeviceId│  │  Timeout        │  │    → retryable          │ │
//! │  │  InvalidUrl     │  │                 │  │  Rejected (other 4xx)   │ │
//! │  └─────────────────┘  └─────────────────┘  │    → not retryable      │ │
//! │                                            └─────────────────────────┘ │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │     Entry       │  │      Gateway            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │  InvalidEntry   │  │  GatewayError           │ │
//! │  │                 │  │  PartialSubmit  │  │  ServerFailed           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Whatever the category, a failed submission leaves the entry queued. The
//! category only decides how loudly it is logged and whether the periodic
//! timer backs off.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured")]
    MissingDeviceId,

    /// Invalid URL (api.base_url, gateway.origin_url, ...).
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The backend could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Backend Answers
    // =========================================================================
    /// The backend failed in a way that may succeed later (5xx, 408, 429).
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The backend refused the entry (4xx other than 408/429).
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    // =========================================================================
    // Entry Errors
    // =========================================================================
    /// The payload failed validation or does not belong to the queue.
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Some legs of a cash entry were accepted, one failed.
    #[error("Entry {entry_id}: {completed} of {total} legs accepted, then: {source}")]
    PartialSubmission {
        entry_id: String,
        completed: usize,
        total: usize,
        #[source]
        source: Box<SyncError>,
    },

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Failed to serialize a request or response body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Gateway Errors
    // =========================================================================
    /// Cache gateway failure (bad request URL, unusable upstream response).
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// The local proxy server could not start or stopped with an error.
    #[error("Gateway server failed: {0}")]
    ServerFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<depot_db::DbError> for SyncError {
    fn from(err: depot_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<depot_core::CoreError> for SyncError {
    fn from(err: depot_core::CoreError) -> Self {
        SyncError::InvalidEntry(err.to_string())
    }
}

impl From<depot_core::ValidationError> for SyncError {
    fn from(err: depot_core::ValidationError) -> Self {
        SyncError::InvalidEntry(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if retrying the same request later may succeed.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Server errors (5xx, 408, 429)
    /// - Local database hiccups
    ///
    /// ## Non-Retryable Errors
    /// - Rejections (the backend refused the payload)
    /// - Invalid entries and configuration errors
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Timeout(_)
            | SyncError::Server { .. }
            | SyncError::DatabaseError(_) => true,
            SyncError::PartialSubmission { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the backend actively refused the entry.
    pub fn is_rejection(&self) -> bool {
        match self {
            SyncError::Rejected { .. } => true,
            SyncError::PartialSubmission { source, .. } => source.is_rejection(),
            _ => false,
        }
    }

    /// Classifies an HTTP status returned by the backend.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => SyncError::Server { status, message },
            _ => SyncError::Rejected { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::from_status(503, "unavailable").is_retryable());
        assert!(SyncError::from_status(429, "slow down").is_retryable());
        assert!(SyncError::from_status(408, "timeout").is_retryable());

        assert!(!SyncError::from_status(422, "bad party").is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
    }

    #[test]
    fn test_rejections() {
        assert!(SyncError::from_status(400, "bad").is_rejection());
        assert!(!SyncError::from_status(500, "oops").is_rejection());
    }

    #[test]
    fn test_partial_submission_delegates_to_source() {
        let err = SyncError::PartialSubmission {
            entry_id: "e-1".into(),
            completed: 1,
            total: 3,
            source: Box::new(SyncError::ConnectionFailed("reset".into())),
        };
        assert!(err.is_retryable());
        assert!(!err.is_rejection());
        assert_eq!(
            err.to_string(),
            "Entry e-1: 1 of 3 legs accepted, then: Connection failed: reset"
        );
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidUrl("x".into()).is_config_error());
        assert!(!SyncError::ShuttingDown.is_config_error());
    }
}
