//! # Submission Client
//!
//! Performs the remote call(s) for one queued entry.
//!
//! ## Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  QueueEntry.payload                                                     │
//! │       │                                                                 │
//! │       ├── Order(..)     ──► POST {base}/orders        (1 call)          │
//! │       │                     Idempotency-Key: {entry id}                 │
//! │       │                                                                 │
//! │       ├── Voucher(..)   ──► POST {base}/vouchers      (1 call)          │
//! │       │                     Idempotency-Key: {entry id}                 │
//! │       │                                                                 │
//! │       └── CashEntry(..) ──► for leg in pending_legs():                  │
//! │                               POST {base}/cash-entries                  │
//! │                               Idempotency-Key: {entry id}:{method}      │
//! │                               ok  → record leg, next                    │
//! │                               err → stop, whole entry failed            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Accepted legs are recorded as they happen, so a retry sends only the legs
//! the backend has not accepted yet.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use depot_core::{CashLeg, EntryPayload, OrderPayload, QueueEntry, VoucherPayload};
use depot_db::QueueRepository;

use crate::config::{ApiSettings, DeviceConfig};
use crate::error::{SyncError, SyncResult};

/// Longest backend error body kept in `last_error`.
const MAX_ERROR_BODY: usize = 200;

// =============================================================================
// Remote API
// =============================================================================

/// The backend's three submission endpoints.
///
/// Every call is keyed by a client-generated reference; the backend is
/// expected to deduplicate on it, so repeating a call is safe.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Submits a full order keyed by the entry id.
    async fn submit_order(&self, reference: &str, order: &OrderPayload) -> SyncResult<()>;

    /// Submits one voucher keyed by the entry id.
    async fn submit_voucher(&self, reference: &str, voucher: &VoucherPayload) -> SyncResult<()>;

    /// Submits one payment leg keyed by its leg id.
    async fn submit_cash_leg(&self, leg: &CashLeg) -> SyncResult<()>;
}

// =============================================================================
// Leg Progress
// =============================================================================

/// Where accepted cash legs are recorded.
#[async_trait]
pub trait LegRecorder: Send + Sync {
    async fn leg_completed(&self, entry_id: &str, leg_id: &str) -> SyncResult<()>;
}

/// Persists leg completion on the queued row.
#[async_trait]
impl LegRecorder for QueueRepository {
    async fn leg_completed(&self, entry_id: &str, leg_id: &str) -> SyncResult<()> {
        self.mark_leg_completed(entry_id, leg_id).await?;
        Ok(())
    }
}

/// Collects leg completion in memory, for an entry that is not queued yet.
#[derive(Debug, Default)]
pub struct LegCollector {
    legs: Mutex<Vec<String>>,
}

impl LegCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn into_legs(self) -> Vec<String> {
        self.legs.into_inner()
    }
}

#[async_trait]
impl LegRecorder for LegCollector {
    async fn leg_completed(&self, _entry_id: &str, leg_id: &str) -> SyncResult<()> {
        self.legs.lock().await.push(leg_id.to_string());
        Ok(())
    }
}

// =============================================================================
// Submission Client
// =============================================================================

/// Turns a queued entry into remote calls.
#[derive(Clone)]
pub struct SubmissionClient {
    api: std::sync::Arc<dyn RemoteApi>,
}

impl SubmissionClient {
    pub fn new(api: std::sync::Arc<dyn RemoteApi>) -> Self {
        SubmissionClient { api }
    }

    /// Submits one entry.
    ///
    /// `Ok(())` means every call was accepted and the entry may be removed.
    /// Any error means the entry must stay queued.
    pub async fn submit(&self, entry: &QueueEntry, legs: &dyn LegRecorder) -> SyncResult<()> {
        match &entry.payload {
            EntryPayload::Order(order) => self.api.submit_order(&entry.id, order).await,
            EntryPayload::Voucher(voucher) => self.api.submit_voucher(&entry.id, voucher).await,
            EntryPayload::CashEntry(_) => self.submit_legs(entry, legs).await,
        }
    }

    async fn submit_legs(&self, entry: &QueueEntry, recorder: &dyn LegRecorder) -> SyncResult<()> {
        let total = entry.legs().len();
        let pending = entry.pending_legs();
        let mut completed = total - pending.len();

        debug!(id = %entry.id, total, pending = pending.len(), "Submitting cash legs");

        for leg in pending {
            if let Err(err) = self.api.submit_cash_leg(&leg).await {
                return Err(if completed == 0 {
                    err
                } else {
                    SyncError::PartialSubmission {
                        entry_id: entry.id.clone(),
                        completed,
                        total,
                        source: Box::new(err),
                    }
                });
            }

            completed += 1;

            // The backend dedups on the leg id, so a lost record only costs
            // a repeated call.
            if let Err(err) = recorder.leg_completed(&entry.id, &leg.leg_id).await {
                warn!(id = %entry.id, leg = %leg.leg_id, error = %err, "Failed to record completed leg");
            }
        }

        Ok(())
    }
}

// =============================================================================
// HTTP Implementation
// =============================================================================

#[derive(Serialize)]
struct OrderRequest<'a> {
    client_reference: &'a str,
    device_id: &'a str,
    #[serde(flatten)]
    order: &'a OrderPayload,
}

#[derive(Serialize)]
struct VoucherRequest<'a> {
    client_reference: &'a str,
    device_id: &'a str,
    #[serde(flatten)]
    voucher: &'a VoucherPayload,
}

#[derive(Serialize)]
struct CashLegRequest<'a> {
    client_reference: &'a str,
    device_id: &'a str,
    #[serde(flatten)]
    leg: &'a CashLeg,
}

/// [`RemoteApi`] over HTTPS with a bearer token.
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    device_id: String,
    timeout: Duration,
}

impl HttpRemoteApi {
    /// Builds a client from configuration.
    pub fn new(api: &ApiSettings, device: &DeviceConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(api.request_timeout())
            .build()
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        Self::with_client(client, api, device)
    }

    /// Builds on a caller-supplied `reqwest::Client`.
    pub fn with_client(
        client: reqwest::Client,
        api: &ApiSettings,
        device: &DeviceConfig,
    ) -> SyncResult<Self> {
        Url::parse(&api.base_url)?;

        Ok(HttpRemoteApi {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            auth_token: api.auth_token.clone(),
            device_id: device.id.clone(),
            timeout: api.request_timeout(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, key: &str, body: &T) -> SyncResult<()> {
        let url = format!("{}/{}", self.base_url, path);

        let mut request = self
            .client
            .post(&url)
            .header("Idempotency-Key", key)
            .json(body);

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();

        if status.is_success() {
            debug!(url = %url, key = %key, status = status.as_u16(), "Submission accepted");
            return Ok(());
        }

        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }

        Err(SyncError::from_status(status.as_u16(), message))
    }

    fn classify(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout.as_secs())
        } else if err.is_builder() {
            SyncError::InvalidUrl(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn submit_order(&self, reference: &str, order: &OrderPayload) -> SyncResult<()> {
        let body = OrderRequest {
            client_reference: reference,
            device_id: &self.device_id,
            order,
        };
        self.post("orders", reference, &body).await
    }

    async fn submit_voucher(&self, reference: &str, voucher: &VoucherPayload) -> SyncResult<()> {
        let body = VoucherRequest {
            client_reference: reference,
            device_id: &self.device_id,
            voucher,
        };
        self.post("vouchers", reference, &body).await
    }

    async fn submit_cash_leg(&self, leg: &CashLeg) -> SyncResult<()> {
        let body = CashLegRequest {
            client_reference: &leg.leg_id,
            device_id: &self.device_id,
            leg,
        };
        self.post("cash-entries", &leg.leg_id, &body).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
