//! # Cache Gateway
//!
//! Keeps the application shell usable offline by intercepting the browser's
//! requests to the origin.
//!
//! ## Request Routing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  request ──► GET? ──no──► pass through (never cached)                   │
//! │                │                                                        │
//! │               yes                                                       │
//! │                ▼                                                        │
//! │           classify()                                                    │
//! │   Sec-Fetch-Mode / Sec-Fetch-Dest, else the path extension              │
//! │                │                                                        │
//! │     ┌──────────┼──────────────┬─────────────────┬──────────────┐        │
//! │     ▼          ▼              ▼                 ▼              │        │
//! │   Page       Asset          Image             Other            │        │
//! │   Network    StaleWhile     CacheFirst        pass through     │        │
//! │   First      Revalidate                                        │        │
//! │   pages-vN   assets-vN      images-vN                          │        │
//! │                                                                         │
//! │  LIFECYCLE:                                                             │
//! │  install()  → start page into pages-vN, precache list into assets-vN    │
//! │  activate() → delete every set not in {pages,assets,images}-vN          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod fetch;
pub mod server;
pub mod store;
pub mod strategy;

use axum::http::{header, HeaderMap, Method};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use depot_db::CachedResponse;

use crate::config::GatewaySettings;
use crate::error::{SyncError, SyncResult};

pub use fetch::{Fetcher, HttpFetcher};
pub use server::{GatewayHandle, GatewayServer};
pub use store::{CacheStore, MemoryCacheStore};

// =============================================================================
// Requests
// =============================================================================

/// A request as seen by the gateway, already pointed at the origin.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    /// Absolute upstream URL; also the cache key.
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl GatewayRequest {
    pub fn get(url: Url) -> Self {
        GatewayRequest {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

/// Which caching policy applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Page,
    Asset,
    Image,
    Other,
}

const ASSET_EXTENSIONS: &[&str] = &["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "webmanifest"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "bmp"];

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Classifies a request by its destination hint, then by its path.
pub fn classify(request: &GatewayRequest) -> RequestClass {
    if header_str(&request.headers, "sec-fetch-mode") == Some("navigate") {
        return RequestClass::Page;
    }

    match header_str(&request.headers, "sec-fetch-dest") {
        Some("document") | Some("iframe") => return RequestClass::Page,
        Some("script") | Some("style") | Some("font") | Some("worker")
        | Some("sharedworker") | Some("manifest") => return RequestClass::Asset,
        Some("image") => return RequestClass::Image,
        // "empty" is fetch()/XHR; fall back to the path.
        _ => {}
    }

    let last_segment = request.url.path().rsplit('/').next().unwrap_or("");
    let extension = last_segment
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => RequestClass::Image,
        Some(ext) if ASSET_EXTENSIONS.contains(&ext) => RequestClass::Asset,
        Some("html") | Some("htm") => RequestClass::Page,
        None if accepts_html(&request.headers) => RequestClass::Page,
        _ => RequestClass::Other,
    }
}

fn accepts_html(headers: &HeaderMap) -> bool {
    header_str(headers, header::ACCEPT.as_str()).is_some_and(|accept| accept.contains("text/html"))
}

// =============================================================================
// Cache Set Names
// =============================================================================

/// Set names for one cache version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheNames {
    pub pages: String,
    pub assets: String,
    pub images: String,
}

impl CacheNames {
    pub fn for_version(version: &str) -> Self {
        CacheNames {
            pages: format!("pages-{version}"),
            assets: format!("assets-{version}"),
            images: format!("images-{version}"),
        }
    }

    /// Sets that survive `activate`.
    pub fn whitelist(&self) -> [&str; 3] {
        [&self.pages, &self.assets, &self.images]
    }
}

/// Outcome of `install`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub stored: usize,
    pub failed: usize,
}

// =============================================================================
// Cache Gateway
// =============================================================================

/// Routes origin requests through the caching strategies.
pub struct CacheGateway {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    names: CacheNames,
    start_url: Url,
    precache: Vec<String>,
}

impl CacheGateway {
    pub fn new(
        settings: &GatewaySettings,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> SyncResult<Self> {
        let origin = Url::parse(&settings.origin_url)?;
        let start_url = origin.join(&settings.start_url)?;

        Ok(CacheGateway {
            store,
            fetcher,
            origin,
            names: CacheNames::for_version(&settings.cache_version),
            start_url,
            precache: settings.precache.clone(),
        })
    }

    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    /// Resolves a local path (with query) against the origin.
    pub fn upstream_url(&self, path_and_query: &str) -> SyncResult<Url> {
        if !path_and_query.starts_with('/') || path_and_query.starts_with("//") {
            return Err(SyncError::GatewayError(format!(
                "request target must be a path: {path_and_query}"
            )));
        }
        Ok(self.origin.join(path_and_query)?)
    }

    /// Pre-fetches the start page and the precache list.
    ///
    /// Individual failures are logged and counted; install never aborts, so an
    /// agent started offline still serves whatever an earlier run cached.
    pub async fn install(&self) -> InstallReport {
        let mut report = InstallReport::default();

        let mut targets = vec![(self.names.pages.as_str(), self.start_url.clone())];
        for path in &self.precache {
            match self.upstream_url(path) {
                Ok(url) => targets.push((self.names.assets.as_str(), url)),
                Err(e) => {
                    warn!(%path, error = %e, "Skipping bad precache entry");
                    report.failed += 1;
                }
            }
        }

        for (set, url) in targets {
            let request = GatewayRequest::get(url);
            match self.fetcher.fetch(&request).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    match self.store.put(set, request.url.as_str(), &response).await {
                        Ok(()) => report.stored += 1,
                        Err(e) => {
                            warn!(url = %request.url, error = %e, "Failed to store precached response");
                            report.failed += 1;
                        }
                    }
                }
                Ok(response) => {
                    warn!(url = %request.url, status = response.status, "Precache fetch unsuccessful");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Precache fetch failed");
                    report.failed += 1;
                }
            }
        }

        info!(stored = report.stored, failed = report.failed, "Cache install complete");
        report
    }

    /// Deletes every cache set outside the current version's whitelist.
    /// Returns the deleted names.
    pub async fn activate(&self) -> SyncResult<Vec<String>> {
        let whitelist = self.names.whitelist();
        let mut deleted = Vec::new();

        for name in self.store.set_names().await? {
            if whitelist.contains(&name.as_str()) {
                continue;
            }
            let removed = self.store.delete_set(&name).await?;
            info!(cache = %name, removed, "Deleted stale cache set");
            deleted.push(name);
        }

        Ok(deleted)
    }

    /// Answers one request.
    ///
    /// Never fails: an unreachable origin with nothing cached becomes a 503
    /// (pages, assets, images) or a 502 (pass-through).
    pub async fn intercept(&self, request: GatewayRequest) -> CachedResponse {
        if request.method != Method::GET {
            return self.pass_through(&request).await;
        }

        let class = classify(&request);
        debug!(url = %request.url, ?class, "Intercept");

        let result = match class {
            RequestClass::Page => {
                strategy::network_first(
                    &request,
                    self.store.as_ref(),
                    self.fetcher.as_ref(),
                    &self.names.pages,
                    self.start_url.as_str(),
                )
                .await
            }
            RequestClass::Asset => strategy::stale_while_revalidate(
                &request,
                Arc::clone(&self.store),
                Arc::clone(&self.fetcher),
                &self.names.assets,
            )
            .await
            .map(|(response, _refresh)| response),
            RequestClass::Image => {
                strategy::cache_first(
                    &request,
                    self.store.as_ref(),
                    self.fetcher.as_ref(),
                    &self.names.images,
                )
                .await
            }
            RequestClass::Other => return self.pass_through(&request).await,
        };

        result.unwrap_or_else(|e| {
            warn!(url = %request.url, error = %e, "Offline and not cached");
            error_response(503, "Offline and not cached")
        })
    }

    async fn pass_through(&self, request: &GatewayRequest) -> CachedResponse {
        self.fetcher.fetch(request).await.unwrap_or_else(|e| {
            warn!(method = %request.method, url = %request.url, error = %e, "Upstream unreachable");
            error_response(502, "Upstream unreachable")
        })
    }
}

fn error_response(status: u16, message: &str) -> CachedResponse {
    CachedResponse::new(
        status,
        vec![("content-type".to_string(), "text/plain; charset=utf-8".to_string())],
        message.as_bytes().to_vec(),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::strategy::tests::{get, MockFetcher};
    use axum::http::HeaderValue;
    use depot_db::{Database, DbConfig};

    fn settings() -> GatewaySettings {
        GatewaySettings {
            origin_url: "http://o".to_string(),
            cache_version: "v2".to_string(),
            start_url: "/".to_string(),
            precache: vec!["/app.js".to_string(), "/app.css".to_string()],
            ..GatewaySettings::default()
        }
    }

    fn with_header(mut request: GatewayRequest, name: &'static str, value: &'static str) -> GatewayRequest {
        request.headers.insert(name, HeaderValue::from_static(value));
        request
    }

    #[test]
    fn test_classify_by_destination_hint() {
        let nav = with_header(get("http://o/orders"), "sec-fetch-mode", "navigate");
        assert_eq!(classify(&nav), RequestClass::Page);

        // The hint wins over the extension.
        let script = with_header(get("http://o/bundle.png"), "sec-fetch-dest", "script");
        assert_eq!(classify(&script), RequestClass::Asset);

        let image = with_header(get("http://o/avatar"), "sec-fetch-dest", "image");
        assert_eq!(classify(&image), RequestClass::Image);
    }

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(classify(&get("http://o/static/app.JS")), RequestClass::Asset);
        assert_eq!(classify(&get("http://o/img/logo.webp?v=3")), RequestClass::Image);
        assert_eq!(classify(&get("http://o/index.html")), RequestClass::Page);
        assert_eq!(classify(&get("http://o/api/products")), RequestClass::Other);
        assert_eq!(classify(&get("http://o/data.json")), RequestClass::Other);

        let html = with_header(get("http://o/orders"), "accept", "text/html,application/xhtml+xml");
        assert_eq!(classify(&html), RequestClass::Page);
    }

    #[test]
    fn test_cache_names() {
        let names = CacheNames::for_version("v7");
        assert_eq!(names.whitelist(), ["pages-v7", "assets-v7", "images-v7"]);
    }

    #[tokio::test]
    async fn test_install_and_activate() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(db.cache_sets());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("http://o/", 200, "home").await;
        fetcher.serve("http://o/app.js", 200, "js").await;

        // Left over by an older version.
        let old = CachedResponse::new(200, vec![], b"old".to_vec());
        store.put("pages-v1", "http://o/", &old).await.unwrap();
        store.put("images-v1", "http://o/a.png", &old).await.unwrap();

        let gateway = CacheGateway::new(&settings(), store.clone(), fetcher.clone()).unwrap();

        // app.css is a 404 upstream.
        let report = gateway.install().await;
        assert_eq!(report, InstallReport { stored: 2, failed: 1 });

        let deleted = gateway.activate().await.unwrap();
        assert_eq!(deleted, vec!["images-v1".to_string(), "pages-v1".to_string()]);
        assert_eq!(
            store.set_names().await.unwrap(),
            vec!["assets-v2".to_string(), "pages-v2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_non_get_passes_through_uncached() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("http://o/logo.png", 200, "png").await;
        let gateway = CacheGateway::new(&settings(), store.clone(), fetcher.clone()).unwrap();

        let mut post = get("http://o/logo.png");
        post.method = Method::POST;
        let response = gateway.intercept(post.clone()).await;
        assert_eq!(response.status, 200);
        gateway.intercept(post).await;

        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(store.len("images-v2").await, 0);
    }

    #[tokio::test]
    async fn test_intercept_routes_by_class() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("http://o/", 200, "home").await;
        fetcher.serve("http://o/logo.png", 200, "png").await;
        fetcher.serve("http://o/api/stock", 200, "[]").await;
        let gateway = CacheGateway::new(&settings(), store.clone(), fetcher.clone()).unwrap();

        gateway.intercept(get("http://o/logo.png")).await;
        gateway.intercept(get("http://o/api/stock")).await;
        gateway
            .intercept(with_header(get("http://o/"), "sec-fetch-mode", "navigate"))
            .await;

        assert_eq!(store.len("images-v2").await, 1);
        assert_eq!(store.len("pages-v2").await, 1);
        assert_eq!(store.set_names().await.unwrap().len(), 2);

        fetcher.set_offline(true);

        let page = gateway
            .intercept(with_header(get("http://o/customers"), "sec-fetch-mode", "navigate"))
            .await;
        assert_eq!(page.body, b"home");

        let other = gateway.intercept(get("http://o/api/stock")).await;
        assert_eq!(other.status, 502);

        let script = gateway.intercept(get("http://o/never.js")).await;
        assert_eq!(script.status, 503);
    }

    #[test]
    fn test_upstream_url_requires_path() {
        let gateway = CacheGateway::new(
            &settings(),
            Arc::new(MemoryCacheStore::new()),
            Arc::new(MockFetcher::default()),
        )
        .unwrap();

        assert_eq!(
            gateway.upstream_url("/orders?page=2").unwrap().as_str(),
            "http://o/orders?page=2"
        );
        assert!(gateway.upstream_url("http://evil.example/").is_err());
        assert!(gateway.upstream_url("//evil.example/").is_err());
    }
}
