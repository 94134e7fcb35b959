//! Durable, per-fingerprint HTTP response cache.
//!
//! Grounded on `original_source/cs_tools/api/_transport.py`'s `CachePolicy` and
//! its `http_cache` table. Storage is embedded SQLite via `rusqlite` (bundled),
//! matching the corpus's preference for self-contained native dependencies.

use crate::error::{CsToolsError, CsToolsResult};
use crate::logging::{log_debug, log_warn};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sentinel header that opts a request into caching.
pub const CACHE_CONTROL_HEADER: &str = "x-cs-tools-cache-control";
/// Sentinel header that, when present, evicts the entry before the request proceeds.
pub const CACHE_BUSTING_HEADER: &str = "x-cs-tools-cache-bust";
/// Header stamped onto a response served from cache.
pub const CACHE_FETCHED_HEADER: &str = "x-cs-tools-cache-hit";

/// Deterministic cache key derived from an HTTP request. Stable across runs,
/// identical for byte-equivalent requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn new(method: &str, host: &str, port: Option<u16>, path: &str, query: &str, body: &[u8]) -> Self {
        let authority = match port {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        };
        let body_repr = String::from_utf8_lossy(body);
        Self(format!(
            "{method} {authority}{path}?::params::{query}::data::{body_repr}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored HTTP response, keyed by [`RequestFingerprint`].
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub hit_count: u32,
    pub created_at_utc: DateTime<Utc>,
}

/// Embedded SQLite-backed response cache. One writer connection per process,
/// serialized by a mutex; the database itself serializes concurrent writers
/// further.
pub struct CacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl CacheStore {
    /// Open (creating if needed) the cache database at `directory/http_cache.db`.
    pub fn open(directory: &Path) -> CsToolsResult<Self> {
        std::fs::create_dir_all(directory).map_err(|e| {
            CsToolsError::cache_backend(format!("could not create cache directory: {e}"))
        })?;

        let db_path = directory.join("http_cache.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| CsToolsError::cache_backend(format!("could not open cache db: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS http_cache (
                key TEXT PRIMARY KEY,
                status_code INTEGER NOT NULL,
                headers BLOB NOT NULL,
                stream TEXT NOT NULL,
                cache_hits INTEGER NOT NULL DEFAULT 0,
                created_at_utc DATETIME NOT NULL
            )",
            [],
        )
        .map_err(|e| CsToolsError::cache_backend(format!("could not create http_cache table: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory cache, for tests.
    pub fn open_in_memory() -> CsToolsResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CsToolsError::cache_backend(format!("could not open in-memory cache db: {e}")))?;
        conn.execute(
            "CREATE TABLE http_cache (
                key TEXT PRIMARY KEY,
                status_code INTEGER NOT NULL,
                headers BLOB NOT NULL,
                stream TEXT NOT NULL,
                cache_hits INTEGER NOT NULL DEFAULT 0,
                created_at_utc DATETIME NOT NULL
            )",
            [],
        )
        .map_err(|e| CsToolsError::cache_backend(format!("could not create http_cache table: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn db_path(directory: &Path) -> PathBuf {
        directory.join("http_cache.db")
    }

    /// Look up a stored response. Never surfaces an error to the caller: on
    /// backend failure, logs and returns `None` so the request proceeds as a miss.
    pub async fn check(&self, fingerprint: &RequestFingerprint) -> Option<CachedResponse> {
        let conn = self.conn.lock().await;
        let result = conn.query_row(
            "SELECT status_code, headers, stream, cache_hits, created_at_utc FROM http_cache WHERE key = ?1",
            params![fingerprint.as_str()],
            |row| {
                let status_code: i64 = row.get(0)?;
                let headers_blob: Vec<u8> = row.get(1)?;
                let stream: String = row.get(2)?;
                let cache_hits: i64 = row.get(3)?;
                let created_at_utc: DateTime<Utc> = row.get(4)?;
                Ok((status_code, headers_blob, stream, cache_hits, created_at_utc))
            },
        );
        drop(conn);

        let (status_code, headers_blob, stream, cache_hits, created_at_utc) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return None,
            Err(e) => {
                log_warn!(error = %e, "cache lookup failed, proceeding as a miss");
                return None;
            }
        };

        let headers = decode_headers(&headers_blob);
        let body = match base64_decode(&stream) {
            Ok(b) => b,
            Err(e) => {
                log_warn!(error = %e, "cached body was not valid base64, proceeding as a miss");
                return None;
            }
        };

        self.bump_hit_count(fingerprint.clone());

        Some(CachedResponse {
            status: status_code as u16,
            headers,
            body,
            hit_count: cache_hits as u32,
            created_at_utc,
        })
    }

    /// Fire-and-forget hit-count increment, mirroring the Python
    /// `_background_task` pattern. Losing an update under concurrent access
    /// is fine; the count is informational, not load-bearing.
    fn bump_hit_count(&self, fingerprint: RequestFingerprint) {
        let conn = self.conn.clone();
        tokio::spawn(async move {
            let conn = conn.lock().await;
            if let Err(e) = conn.execute(
                "UPDATE http_cache SET cache_hits = cache_hits + 1 WHERE key = ?1",
                params![fingerprint.as_str()],
            ) {
                log_warn!(error = %e, "failed to bump cache hit count");
            }
        });
    }

    /// Write or replace the row for this fingerprint. Last writer wins on body.
    pub async fn store(&self, fingerprint: &RequestFingerprint, status: u16, headers: &[(String, String)], body: &[u8]) {
        let conn = self.conn.lock().await;
        let headers_blob = encode_headers(headers);
        let stream = base64_encode(body);
        let now = Utc::now();

        if let Err(e) = conn.execute(
            "INSERT INTO http_cache (key, status_code, headers, stream, cache_hits, created_at_utc)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT(key) DO UPDATE SET
                status_code = excluded.status_code,
                headers = excluded.headers,
                stream = excluded.stream,
                created_at_utc = excluded.created_at_utc",
            params![fingerprint.as_str(), status as i64, headers_blob, stream, now],
        ) {
            log_warn!(error = %e, "cache store failed, request succeeded but was not cached");
        } else {
            log_debug!(fingerprint = %fingerprint, "stored response in cache");
        }
    }

    /// Remove the row for this fingerprint, if present.
    pub async fn expire(&self, fingerprint: &RequestFingerprint) {
        let conn = self.conn.lock().await;
        if let Err(e) = conn.execute(
            "DELETE FROM http_cache WHERE key = ?1",
            params![fingerprint.as_str()],
        ) {
            log_warn!(error = %e, "cache expire failed");
        }
    }

    /// Drop all rows.
    pub async fn clear(&self) {
        let conn = self.conn.lock().await;
        if let Err(e) = conn.execute("DELETE FROM http_cache", []) {
            log_warn!(error = %e, "cache clear failed");
        }
    }
}

/// Responses are only ever cached on success.
pub fn should_cache(status: u16) -> bool {
    status < 300
}

fn encode_headers(headers: &[(String, String)]) -> Vec<u8> {
    serde_json::to_vec(headers).unwrap_or_default()
}

fn decode_headers(blob: &[u8]) -> Vec<(String, String)> {
    serde_json::from_slice(blob).unwrap_or_default()
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_identical_requests() {
        let a = RequestFingerprint::new("GET", "host", Some(443), "/path", "a=1", b"");
        let b = RequestFingerprint::new("GET", "host", Some(443), "/path", "a=1", b"");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_body() {
        let a = RequestFingerprint::new("POST", "host", None, "/path", "", b"one");
        let b = RequestFingerprint::new("POST", "host", None, "/path", "", b"two");
        assert_ne!(a, b);
    }

    #[test]
    fn base64_round_trips() {
        let data = b"hello cs tools cache, \x00\x01\xff";
        let encoded = base64_encode(data);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[tokio::test]
    async fn store_then_check_round_trips() {
        let store = CacheStore::open_in_memory().unwrap();
        let fp = RequestFingerprint::new("GET", "host", None, "/api/rest/2.0/system", "", b"");

        assert!(store.check(&fp).await.is_none());

        store.store(&fp, 200, &[("content-type".into(), "application/json".into())], b"{}").await;

        let cached = store.check(&fp).await.expect("should be a hit after store");
        assert_eq!(cached.status, 200);
        assert_eq!(cached.body, b"{}");
    }

    #[tokio::test]
    async fn expire_removes_the_row() {
        let store = CacheStore::open_in_memory().unwrap();
        let fp = RequestFingerprint::new("GET", "host", None, "/x", "", b"");
        store.store(&fp, 200, &[], b"body").await;
        store.expire(&fp).await;
        assert!(store.check(&fp).await.is_none());
    }

    #[test]
    fn only_successes_are_cacheable() {
        assert!(should_cache(200));
        assert!(should_cache(299));
        assert!(!should_cache(300));
        assert!(!should_cache(500));
    }
}
