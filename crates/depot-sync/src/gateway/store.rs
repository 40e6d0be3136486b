//! Cache-set storage seen by the strategies.
//!
//! The agent uses the SQLite-backed [`CacheSetRepository`]; tests and
//! throwaway setups can use [`MemoryCacheStore`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use depot_db::{CacheSetRepository, CachedResponse};

use crate::error::SyncResult;

/// Named, versioned sets of stored GET responses keyed by URL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, set: &str, url: &str) -> SyncResult<Option<CachedResponse>>;

    /// Stores or replaces the response for `url` in `set`.
    async fn put(&self, set: &str, url: &str, response: &CachedResponse) -> SyncResult<()>;

    /// Every set holding at least one response.
    async fn set_names(&self) -> SyncResult<Vec<String>>;

    /// Drops a whole set, returning how many responses it held.
    async fn delete_set(&self, set: &str) -> SyncResult<u64>;
}

#[async_trait]
impl CacheStore for CacheSetRepository {
    async fn get(&self, set: &str, url: &str) -> SyncResult<Option<CachedResponse>> {
        Ok(CacheSetRepository::get(self, set, url).await?)
    }

    async fn put(&self, set: &str, url: &str, response: &CachedResponse) -> SyncResult<()> {
        Ok(CacheSetRepository::put(self, set, url, response).await?)
    }

    async fn set_names(&self) -> SyncResult<Vec<String>> {
        Ok(CacheSetRepository::set_names(self).await?)
    }

    async fn delete_set(&self, set: &str) -> SyncResult<u64> {
        Ok(CacheSetRepository::delete_set(self, set).await?)
    }
}

/// In-process cache store. Contents are lost with the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    sets: RwLock<BTreeMap<String, BTreeMap<String, CachedResponse>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of responses in one set.
    pub async fn len(&self, set: &str) -> usize {
        self.sets.read().await.get(set).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, set: &str, url: &str) -> SyncResult<Option<CachedResponse>> {
        Ok(self
            .sets
            .read()
            .await
            .get(set)
            .and_then(|entries| entries.get(url))
            .cloned())
    }

    async fn put(&self, set: &str, url: &str, response: &CachedResponse) -> SyncResult<()> {
        self.sets
            .write()
            .await
            .entry(set.to_string())
            .or_default()
            .insert(url.to_string(), response.clone());
        Ok(())
    }

    async fn set_names(&self) -> SyncResult<Vec<String>> {
        Ok(self
            .sets
            .read()
            .await
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn delete_set(&self, set: &str) -> SyncResult<u64> {
        let removed = self.sets.write().await.remove(set);
        Ok(removed.map_or(0, |entries| entries.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_db::{Database, DbConfig};

    async fn exercise(store: &dyn CacheStore) {
        let page = CachedResponse::new(200, vec![], b"home".to_vec());

        store.put("pages-v1", "http://o/", &page).await.unwrap();
        store.put("images-v1", "http://o/a.png", &page).await.unwrap();
        assert_eq!(store.get("pages-v1", "http://o/").await.unwrap().unwrap().body, b"home");
        assert!(store.get("pages-v1", "http://o/other").await.unwrap().is_none());

        assert_eq!(
            store.set_names().await.unwrap(),
            vec!["images-v1".to_string(), "pages-v1".to_string()]
        );
        assert_eq!(store.delete_set("images-v1").await.unwrap(), 1);
        assert_eq!(store.delete_set("images-v1").await.unwrap(), 0);
        assert_eq!(store.set_names().await.unwrap(), vec!["pages-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryCacheStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        exercise(&db.cache_sets()).await;
    }
}
