//! # Gateway Server
//!
//! The agent's local HTTP listener: the browser loads the application through
//! it, and the page talks to the engine through its control routes.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  GET  /_depot/status               SyncStatus (online, queue lengths)   │
//! │  POST /_depot/connectivity         {"online": bool}                     │
//! │  GET  /_depot/entries/{queue}      entries waiting in one queue         │
//! │  POST /_depot/entries/{queue}      {"id"?, "entry": {kind, payload}}    │
//! │  POST /_depot/retry[?queue=..]     manual retry, one queue or all       │
//! │                                                                         │
//! │  *  (anything else)                CacheGateway::intercept → origin     │
//! │                                    404 when the gateway is disabled     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! On start the gateway runs `install` then `activate` before accepting
//! connections.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use depot_core::{EntryPayload, QueueEntry, QueueKind};
use depot_db::CachedResponse;

use super::{CacheGateway, GatewayRequest};
use crate::engine::{SubmitOutcome, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::scheduler::BatchReport;

// =============================================================================
// Server State
// =============================================================================

#[derive(Clone)]
struct AppState {
    engine: Arc<SyncEngine>,
    gateway: Option<Arc<CacheGateway>>,
}

/// Local proxy plus control API.
pub struct GatewayServer {
    listen_addr: SocketAddr,
    state: AppState,
}

/// Handle for a running [`GatewayServer`].
pub struct GatewayHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(self) -> SyncResult<()> {
        // A closed channel means the server already stopped.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| SyncError::ServerFailed(format!("Gateway task failed: {e}")))
    }
}

impl GatewayServer {
    pub fn new(
        listen_addr: SocketAddr,
        engine: Arc<SyncEngine>,
        gateway: Option<Arc<CacheGateway>>,
    ) -> Self {
        GatewayServer {
            listen_addr,
            state: AppState { engine, gateway },
        }
    }

    /// Prepares the caches, binds, and serves in the background.
    pub async fn start(self) -> SyncResult<GatewayHandle> {
        if let Some(gateway) = &self.state.gateway {
            gateway.install().await;
            if let Err(e) = gateway.activate().await {
                warn!(error = %e, "Cache activation failed");
            }
        }

        let app = Router::new()
            .route("/_depot/status", get(status_handler))
            .route("/_depot/connectivity", post(connectivity_handler))
            .route(
                "/_depot/entries/{queue}",
                get(list_entries_handler).post(submit_entry_handler),
            )
            .route("/_depot/retry", post(retry_handler))
            .fallback(proxy_handler)
            .with_state(self.state);

        let listener = TcpListener::bind(self.listen_addr).await.map_err(|e| {
            SyncError::ServerFailed(format!("Failed to bind to {}: {}", self.listen_addr, e))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ServerFailed(e.to_string()))?;

        info!(addr = %local_addr, "Gateway server started");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await;
                    info!("Gateway server shutting down");
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "Gateway server stopped with an error");
            }
        });

        Ok(GatewayHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

// =============================================================================
// Error Responses
// =============================================================================

struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::InvalidEntry(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Control request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn parse_queue(raw: &str) -> Result<QueueKind, Response> {
    raw.parse().map_err(|e: depot_core::CoreError| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response()
    })
}

// =============================================================================
// Control Handlers
// =============================================================================

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.status())
}

#[derive(Deserialize)]
struct ConnectivityRequest {
    online: bool,
}

#[derive(Serialize)]
struct ConnectivityResponse {
    online: bool,
    changed: bool,
}

async fn connectivity_handler(
    State(state): State<AppState>,
    Json(request): Json<ConnectivityRequest>,
) -> impl IntoResponse {
    let changed = state.engine.set_online(request.online);
    Json(ConnectivityResponse {
        online: request.online,
        changed,
    })
}

async fn list_entries_handler(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Response, ApiError> {
    let kind = match parse_queue(&queue) {
        Ok(kind) => kind,
        Err(response) => return Ok(response),
    };
    let entries = state.engine.pending(kind).await?;
    Ok(Json(entries).into_response())
}

#[derive(Deserialize)]
struct SubmitRequest {
    /// Client reference; generated when absent.
    id: Option<String>,
    entry: EntryPayload,
}

#[derive(Serialize)]
struct SubmitResponse {
    id: String,
    outcome: SubmitOutcome,
}

async fn submit_entry_handler(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    let kind = match parse_queue(&queue) {
        Ok(kind) => kind,
        Err(response) => return Ok(response),
    };

    let entry = match request.id {
        Some(id) => QueueEntry::with_id(id, request.entry),
        None => QueueEntry::new(request.entry),
    };
    let id = entry.id.clone();

    let outcome = state.engine.submit_entry(kind, entry).await?;
    let status = match outcome {
        SubmitOutcome::Submitted => StatusCode::CREATED,
        SubmitOutcome::Queued => StatusCode::ACCEPTED,
    };

    Ok((status, Json(SubmitResponse { id, outcome })).into_response())
}

#[derive(Deserialize)]
struct RetryQuery {
    queue: Option<String>,
}

#[derive(Serialize)]
struct RetryResult {
    queue: QueueKind,
    /// None when a flush was already running and the trigger was ignored.
    report: Option<BatchReport>,
}

async fn retry_handler(
    State(state): State<AppState>,
    Query(query): Query<RetryQuery>,
) -> Result<Response, ApiError> {
    let results = match query.queue {
        Some(raw) => {
            let kind = match parse_queue(&raw) {
                Ok(kind) => kind,
                Err(response) => return Ok(response),
            };
            vec![RetryResult {
                queue: kind,
                report: state.engine.retry_now(kind).await?,
            }]
        }
        None => state
            .engine
            .retry_all()
            .await?
            .into_iter()
            .map(|(queue, report)| RetryResult { queue, report })
            .collect(),
    };

    Ok(Json(results).into_response())
}

// =============================================================================
// Proxy Handler
// =============================================================================

async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(gateway) = state.gateway else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = match gateway.upstream_url(target) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let response = gateway
        .intercept(GatewayRequest {
            method,
            url,
            headers,
            body: body.to_vec(),
        })
        .await;

    into_http_response(response)
}

fn into_http_response(cached: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = response.headers_mut();
    for (name, value) in cached.headers {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("Dropping unrepresentable response header"),
        }
    }

    response
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DepotConfig, GatewaySettings};
    use crate::connectivity::ConnectivityMonitor;
    use crate::engine::SyncEngineBuilder;
    use crate::gateway::strategy::tests::MockFetcher;
    use crate::gateway::MemoryCacheStore;
    use crate::submission::tests::MockApi;
    use depot_db::{Database, DbConfig};

    struct Harness {
        _db: Database,
        api: Arc<MockApi>,
        fetcher: Arc<MockFetcher>,
        handle: GatewayHandle,
        base: String,
        http: reqwest::Client,
    }

    async fn harness(with_gateway: bool) -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let api = Arc::new(MockApi::default());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("http://o/", 200, "home").await;

        let mut config = DepotConfig::default();
        config.sync.flush_interval_secs = 3600;

        let engine = SyncEngineBuilder::new(config)
            .with_api(api.clone())
            .with_connectivity(ConnectivityMonitor::new(false))
            .build(&db)
            .unwrap();

        let gateway = with_gateway.then(|| {
            let settings = GatewaySettings {
                origin_url: "http://o".to_string(),
                ..GatewaySettings::default()
            };
            Arc::new(
                CacheGateway::new(&settings, Arc::new(MemoryCacheStore::new()), fetcher.clone())
                    .unwrap(),
            )
        });

        let handle = GatewayServer::new("127.0.0.1:0".parse().unwrap(), Arc::new(engine), gateway)
            .start()
            .await
            .unwrap();
        let base = format!("http://{}", handle.local_addr());

        Harness {
            _db: db,
            api,
            fetcher,
            handle,
            base,
            http: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    fn order_body(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "entry": {
                "kind": "order",
                "payload": { "customer_id": "C-1", "document": { "lines": [] } }
            }
        })
    }

    #[tokio::test]
    async fn test_queue_then_flush_over_control_api() {
        let h = harness(false).await;

        let response = h
            .http
            .post(format!("{}/_depot/entries/orders", h.base))
            .json(&order_body("order-1"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["outcome"], "queued");
        assert_eq!(body["id"], "order-1");

        let status: serde_json::Value = h
            .http
            .get(format!("{}/_depot/status", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["online"], false);
        assert_eq!(status["queues"][0]["queue"], "orders");
        assert_eq!(status["queues"][0]["length"], 1);

        let retried: serde_json::Value = h
            .http
            .post(format!("{}/_depot/retry?queue=orders", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(retried[0]["report"]["succeeded"], 1);
        assert_eq!(h.api.calls().await, vec!["order-1".to_string()]);

        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_control_api_rejections() {
        let h = harness(false).await;

        let unknown = h
            .http
            .post(format!("{}/_depot/entries/invoices", h.base))
            .json(&order_body("x"))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 404);

        let mismatch = h
            .http
            .post(format!("{}/_depot/entries/vouchers", h.base))
            .json(&order_body("x"))
            .send()
            .await
            .unwrap();
        assert_eq!(mismatch.status(), 422);

        // Gateway disabled: no proxy.
        let proxied = h.http.get(format!("{}/", h.base)).send().await.unwrap();
        assert_eq!(proxied.status(), 404);
    }

    #[tokio::test]
    async fn test_connectivity_route_feeds_engine() {
        let h = harness(false).await;

        let body: serde_json::Value = h
            .http
            .post(format!("{}/_depot/connectivity", h.base))
            .json(&serde_json::json!({ "online": true }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["changed"], true);

        let again: serde_json::Value = h
            .http
            .post(format!("{}/_depot/connectivity", h.base))
            .json(&serde_json::json!({ "online": true }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(again["changed"], false);
    }

    #[tokio::test]
    async fn test_proxy_serves_cached_start_page_offline() {
        let h = harness(true).await;

        // Installed on start.
        assert_eq!(h.fetcher.fetch_count(), 1);
        h.fetcher.set_offline(true);

        let response = h
            .http
            .get(format!("{}/customers", h.base))
            .header("sec-fetch-mode", "navigate")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "home");

        let api = h
            .http
            .get(format!("{}/api/stock", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(api.status(), 502);
    }
}
