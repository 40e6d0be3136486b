//! # Cache Set Repository
//!
//! Persistent storage for the cache gateway: GET responses grouped into
//! versioned, named sets.
//!
//! ```text
//! cache_entries
//! ┌──────────────┬──────────────────────────┬────────┬─────────┬──────┐
//! │ cache_name   │ url                      │ status │ headers │ body │
//! ├──────────────┼──────────────────────────┼────────┼─────────┼──────┤
//! │ pages-v2     │ http://origin/           │ 200    │ [...]   │ ...  │
//! │ assets-v2    │ http://origin/app.js     │ 200    │ [...]   │ ...  │
//! │ images-v2    │ http://origin/logo.png   │ 200    │ [...]   │ ...  │
//! │ pages-v1     │ http://origin/           │ 200    │ [...]   │ ...  │ ← deleted on
//! └──────────────┴──────────────────────────┴────────┴─────────┴──────┘   activate(v2)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// A stored response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    /// Header name/value pairs, in the order they were received.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        CachedResponse {
            status,
            headers,
            body,
            stored_at: Utc::now(),
        }
    }
}

/// Repository for cache sets.
#[derive(Debug, Clone)]
pub struct CacheSetRepository {
    pool: SqlitePool,
}

impl CacheSetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CacheSetRepository { pool }
    }

    /// Looks up a stored response.
    ///
    /// An undecodable row is dropped and reported as a miss.
    pub async fn get(&self, cache_name: &str, url: &str) -> DbResult<Option<CachedResponse>> {
        let row = sqlx::query(
            r#"
            SELECT status, headers, body, stored_at
            FROM cache_entries
            WHERE cache_name = ?1 AND url = ?2
            "#,
        )
        .bind(cache_name)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decoded = (|| -> DbResult<CachedResponse> {
            let status: i64 = row.try_get("status")?;
            let headers: String = row.try_get("headers")?;
            Ok(CachedResponse {
                status: u16::try_from(status)
                    .map_err(|e| DbError::corrupt("cache_entries", url, e))?,
                headers: serde_json::from_str(&headers)
                    .map_err(|e| DbError::corrupt("cache_entries", url, e))?,
                body: row.try_get("body")?,
                stored_at: row.try_get("stored_at")?,
            })
        })();

        match decoded {
            Ok(response) => Ok(Some(response)),
            Err(err) => {
                warn!(cache = %cache_name, url = %url, error = %err, "Dropping corrupt cache entry");
                self.delete(cache_name, url).await?;
                Ok(None)
            }
        }
    }

    /// Stores (or replaces) a response.
    pub async fn put(&self, cache_name: &str, url: &str, response: &CachedResponse) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_name, url, status, headers, body, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (cache_name, url) DO UPDATE SET
                status = excluded.status,
                headers = excluded.headers,
                body = excluded.body,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(cache_name)
        .bind(url)
        .bind(i64::from(response.status))
        .bind(serde_json::to_string(&response.headers)?)
        .bind(&response.body)
        .bind(response.stored_at)
        .execute(&self.pool)
        .await?;

        debug!(cache = %cache_name, url = %url, bytes = response.body.len(), "Cached response");
        Ok(())
    }

    pub async fn delete(&self, cache_name: &str, url: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_name = ?1 AND url = ?2")
            .bind(cache_name)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Names of every set that currently holds at least one entry.
    pub async fn set_names(&self) -> DbResult<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT cache_name FROM cache_entries ORDER BY cache_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    /// Deletes a whole set. Returns the number of removed entries.
    pub async fn delete_set(&self, cache_name: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE cache_name = ?1")
            .bind(cache_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of entries in one set.
    pub async fn count(&self, cache_name: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?1")
            .bind(cache_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn page(body: &str) -> CachedResponse {
        CachedResponse::new(
            200,
            vec![("content-type".to_string(), "text/html".to_string())],
            body.as_bytes().to_vec(),
        )
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cache_sets();

        repo.put("pages-v1", "http://o/", &page("old")).await.unwrap();
        repo.put("pages-v1", "http://o/", &page("new")).await.unwrap();

        let hit = repo.get("pages-v1", "http://o/").await.unwrap().unwrap();
        assert_eq!(hit.body, b"new");
        assert_eq!(hit.headers[0].1, "text/html");
        assert_eq!(repo.count("pages-v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sets_are_isolated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cache_sets();

        repo.put("pages-v1", "http://o/", &page("v1")).await.unwrap();
        repo.put("pages-v2", "http://o/", &page("v2")).await.unwrap();

        assert_eq!(
            repo.set_names().await.unwrap(),
            vec!["pages-v1".to_string(), "pages-v2".to_string()]
        );

        assert_eq!(repo.delete_set("pages-v1").await.unwrap(), 1);
        assert!(repo.get("pages-v1", "http://o/").await.unwrap().is_none());
        assert!(repo.get("pages-v2", "http://o/").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_miss() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.cache_sets().get("images-v1", "http://o/a.png").await.unwrap().is_none());
    }
}
