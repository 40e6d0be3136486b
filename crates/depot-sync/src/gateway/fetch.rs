//! Upstream fetches for the cache gateway.

use async_trait::async_trait;
use axum::http::header::{self, HeaderName};
use std::time::Duration;
use tracing::debug;

use depot_db::CachedResponse;

use super::GatewayRequest;
use crate::error::{SyncError, SyncResult};

/// Headers that describe one hop and must not be forwarded or stored.
static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::HOST,
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
    header::UPGRADE,
    header::TE,
    header::TRAILER,
];

/// Performs the network leg of a gateway request.
///
/// `Ok` means the origin answered, whatever the status. `Err` means it could
/// not be reached; that is what sends the strategies to the cache.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &GatewayRequest) -> SyncResult<CachedResponse>;
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        Ok(HttpFetcher { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpFetcher { client }
    }
}

fn is_forwarded(name: &HeaderName) -> bool {
    !HOP_BY_HOP.contains(name)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &GatewayRequest) -> SyncResult<CachedResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter().filter(|(n, _)| is_forwarded(n)) {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::GatewayError(format!("upstream timeout: {e}"))
            } else {
                SyncError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(n, _)| is_forwarded(n))
            .filter_map(|(n, v)| Some((n.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::ConnectionFailed(e.to_string()))?;

        debug!(url = %request.url, status, bytes = body.len(), "Upstream fetch");
        Ok(CachedResponse::new(status, headers, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers_are_not_forwarded() {
        assert!(!is_forwarded(&header::CONNECTION));
        assert!(!is_forwarded(&header::HOST));
        assert!(!is_forwarded(&header::TRANSFER_ENCODING));
        assert!(is_forwarded(&header::ACCEPT));
        assert!(is_forwarded(&HeaderName::from_static("sec-fetch-mode")));
    }
}
