//! # Caching Strategies
//!
//! Free functions over (request, cache store, fetcher). The gateway picks one
//! per request class.
//!
//! ```text
//! NetworkFirst (pages)
//!   network ──ok──► store 2xx in pages set ──► response
//!      └─err──► cached URL? ──► cached start page? ──► Err (gateway answers 503)
//!
//! StaleWhileRevalidate (assets)
//!   cached? ──yes──► response now, refresh the copy in the background
//!      └─no──► network ──► store 2xx ──► response
//!
//! CacheFirst (images)
//!   cached? ──yes──► response (no network)
//!      └─no──► network ──► store 2xx ──► response
//! ```
//!
//! Only successful (2xx) responses are ever stored. A failing store write is
//! logged and the response is still returned.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use depot_db::CachedResponse;

use super::fetch::Fetcher;
use super::store::CacheStore;
use super::GatewayRequest;
use crate::error::{SyncError, SyncResult};

fn is_storable(response: &CachedResponse) -> bool {
    (200..300).contains(&response.status)
}

async fn store_if_ok(store: &dyn CacheStore, set: &str, url: &str, response: &CachedResponse) {
    if !is_storable(response) {
        debug!(%set, %url, status = response.status, "Not caching unsuccessful response");
        return;
    }
    if let Err(e) = store.put(set, url, response).await {
        warn!(%set, %url, error = %e, "Failed to store response");
    }
}

async fn lookup(store: &dyn CacheStore, set: &str, url: &str) -> Option<CachedResponse> {
    match store.get(set, url).await {
        Ok(hit) => hit,
        Err(e) => {
            warn!(%set, %url, error = %e, "Cache lookup failed");
            None
        }
    }
}

/// Network first, falling back to the cached page, then the start page.
pub async fn network_first(
    request: &GatewayRequest,
    store: &dyn CacheStore,
    fetcher: &dyn Fetcher,
    set: &str,
    start_url: &str,
) -> SyncResult<CachedResponse> {
    let url = request.url.as_str();

    let network_err = match fetcher.fetch(request).await {
        Ok(response) => {
            store_if_ok(store, set, url, &response).await;
            return Ok(response);
        }
        Err(e) => e,
    };

    debug!(%url, error = %network_err, "Network failed, trying cached page");

    if let Some(hit) = lookup(store, set, url).await {
        return Ok(hit);
    }
    if let Some(start) = lookup(store, set, start_url).await {
        debug!(%url, %start_url, "Serving cached start page");
        return Ok(start);
    }

    Err(SyncError::GatewayError(format!(
        "{url} is unreachable and not cached: {network_err}"
    )))
}

/// Cached copy now, fresh copy next time.
///
/// Returns the response and, when a cached copy was served, the background
/// revalidation task.
pub async fn stale_while_revalidate(
    request: &GatewayRequest,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    set: &str,
) -> SyncResult<(CachedResponse, Option<JoinHandle<()>>)> {
    let url = request.url.to_string();

    if let Some(hit) = lookup(store.as_ref(), set, &url).await {
        let request = request.clone();
        let set = set.to_string();

        let refresh = tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) => store_if_ok(store.as_ref(), &set, &url, &response).await,
                Err(e) => debug!(%url, error = %e, "Background revalidation failed"),
            }
        });

        return Ok((hit, Some(refresh)));
    }

    let response = fetcher.fetch(request).await?;
    store_if_ok(store.as_ref(), set, &url, &response).await;
    Ok((response, None))
}

/// Cached copy if present, otherwise fetch and keep.
pub async fn cache_first(
    request: &GatewayRequest,
    store: &dyn CacheStore,
    fetcher: &dyn Fetcher,
    set: &str,
) -> SyncResult<CachedResponse> {
    let url = request.url.as_str();

    if let Some(hit) = lookup(store, set, url).await {
        return Ok(hit);
    }

    let response = fetcher.fetch(request).await?;
    store_if_ok(store, set, url, &response).await;
    Ok(response)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gateway::store::MemoryCacheStore;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, Method};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use url::Url;

    /// Origin stand-in: fixed bodies per URL, a global offline switch.
    #[derive(Default)]
    pub(crate) struct MockFetcher {
        pub offline: AtomicBool,
        pub fetches: AtomicUsize,
        pub bodies: Mutex<HashMap<String, (u16, String)>>,
    }

    impl MockFetcher {
        pub async fn serve(&self, url: &str, status: u16, body: &str) {
            self.bodies
                .lock()
                .await
                .insert(url.to_string(), (status, body.to_string()));
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, request: &GatewayRequest) -> SyncResult<CachedResponse> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(SyncError::ConnectionFailed("origin offline".into()));
            }
            let (status, body) = self
                .bodies
                .lock()
                .await
                .get(request.url.as_str())
                .cloned()
                .unwrap_or((404, "not found".to_string()));
            Ok(CachedResponse::new(status, vec![], body.into_bytes()))
        }
    }

    pub(crate) fn get(url: &str) -> GatewayRequest {
        GatewayRequest {
            method: Method::GET,
            url: Url::parse(url).unwrap(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    const START: &str = "http://o/";

    #[tokio::test]
    async fn test_cache_first_second_request_skips_network() {
        let store = MemoryCacheStore::new();
        let fetcher = MockFetcher::default();
        fetcher.serve("http://o/logo.png", 200, "png").await;

        let first = cache_first(&get("http://o/logo.png"), &store, &fetcher, "images-v1")
            .await
            .unwrap();
        let second = cache_first(&get("http://o/logo.png"), &store, &fetcher, "images-v1")
            .await
            .unwrap();

        assert_eq!(first.body, b"png");
        assert_eq!(second, first);
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_unsuccessful_responses_are_not_stored() {
        let store = MemoryCacheStore::new();
        let fetcher = MockFetcher::default();

        let missing = cache_first(&get("http://o/gone.png"), &store, &fetcher, "images-v1")
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(store.len("images-v1").await, 0);

        cache_first(&get("http://o/gone.png"), &store, &fetcher, "images-v1")
            .await
            .unwrap();
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cached_url() {
        let store = MemoryCacheStore::new();
        let fetcher = MockFetcher::default();
        fetcher.serve("http://o/orders", 200, "orders page").await;
        fetcher.serve(START, 200, "home").await;

        network_first(&get("http://o/orders"), &store, &fetcher, "pages-v1", START)
            .await
            .unwrap();
        network_first(&get(START), &store, &fetcher, "pages-v1", START)
            .await
            .unwrap();

        fetcher.set_offline(true);

        let cached = network_first(&get("http://o/orders"), &store, &fetcher, "pages-v1", START)
            .await
            .unwrap();
        assert_eq!(cached.body, b"orders page");

        let fallback = network_first(&get("http://o/never-seen"), &store, &fetcher, "pages-v1", START)
            .await
            .unwrap();
        assert_eq!(fallback.body, b"home");
    }

    #[tokio::test]
    async fn test_network_first_with_empty_cache_errors() {
        let store = MemoryCacheStore::new();
        let fetcher = MockFetcher::default();
        fetcher.set_offline(true);

        let err = network_first(&get("http://o/orders"), &store, &fetcher, "pages-v1", START)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::GatewayError(_)));
    }

    #[tokio::test]
    async fn test_network_first_prefers_fresh_copy() {
        let store = MemoryCacheStore::new();
        let fetcher = MockFetcher::default();
        fetcher.serve("http://o/orders", 200, "v1").await;
        network_first(&get("http://o/orders"), &store, &fetcher, "pages-v1", START)
            .await
            .unwrap();

        fetcher.serve("http://o/orders", 200, "v2").await;
        let fresh = network_first(&get("http://o/orders"), &store, &fetcher, "pages-v1", START)
            .await
            .unwrap();
        assert_eq!(fresh.body, b"v2");
        assert_eq!(
            store.get("pages-v1", "http://o/orders").await.unwrap().unwrap().body,
            b"v2"
        );
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_stale_then_refreshes() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("http://o/app.js", 200, "old").await;

        // Miss: waits for the network.
        let (first, refresh) =
            stale_while_revalidate(&get("http://o/app.js"), store.clone(), fetcher.clone(), "assets-v1")
                .await
                .unwrap();
        assert_eq!(first.body, b"old");
        assert!(refresh.is_none());

        fetcher.serve("http://o/app.js", 200, "new").await;

        // Hit: stale copy now, fresh copy stored behind it.
        let (second, refresh) =
            stale_while_revalidate(&get("http://o/app.js"), store.clone(), fetcher.clone(), "assets-v1")
                .await
                .unwrap();
        assert_eq!(second.body, b"old");
        refresh.unwrap().await.unwrap();

        let (third, _) =
            stale_while_revalidate(&get("http://o/app.js"), store.clone(), fetcher.clone(), "assets-v1")
                .await
                .unwrap();
        assert_eq!(third.body, b"new");
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_offline_keeps_copy() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("http://o/app.css", 200, "css").await;

        stale_while_revalidate(&get("http://o/app.css"), store.clone(), fetcher.clone(), "assets-v1")
            .await
            .unwrap();
        fetcher.set_offline(true);

        let (hit, refresh) =
            stale_while_revalidate(&get("http://o/app.css"), store.clone(), fetcher.clone(), "assets-v1")
                .await
                .unwrap();
        refresh.unwrap().await.unwrap();
        assert_eq!(hit.body, b"css");
        assert_eq!(store.len("assets-v1").await, 1);
    }
}
