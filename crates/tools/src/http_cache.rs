//! Single-file SQLite-backed HTTP response cache (spec §4.8).

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

pub struct HttpCache {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub text: String,
    pub stored_ts: f64,
}

impl HttpCache {
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("opening http cache: {e}"))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS http_cache (
                url TEXT PRIMARY KEY,
                status INTEGER NOT NULL,
                text TEXT NOT NULL,
                stored_ts REAL NOT NULL
            )",
            [],
        )
        .map_err(|e| format!("creating http cache schema: {e}"))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Returns `None` on a cache miss or an expired entry (TTL exceeded).
    pub fn get(&self, url: &str, ttl_s: u64, now: f64) -> Result<Option<CachedResponse>, String> {
        let conn = self.conn.lock().map_err(|_| "http cache lock poisoned".to_string())?;
        let row: Option<(i64, String, f64)> = conn
            .query_row(
                "SELECT status, text, stored_ts FROM http_cache WHERE url = ?1",
                params![url],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| format!("querying http cache: {e}"))?;

        Ok(row.and_then(|(status, text, stored_ts)| {
            if now - stored_ts > ttl_s as f64 {
                None
            } else {
                Some(CachedResponse { status: status as u16, text, stored_ts })
            }
        }))
    }

    pub fn set(&self, url: &str, status: u16, text: &str, now: f64) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|_| "http cache lock poisoned".to_string())?;
        conn.execute(
            "INSERT INTO http_cache (url, status, text, stored_ts) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET status = excluded.status, text = excluded.text, stored_ts = excluded.stored_ts",
            params![url, status as i64, text, now],
        )
        .map_err(|e| format!("writing http cache: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpCache::open(&dir.path().join("cache.sqlite")).unwrap();
        cache.set("https://example.invalid", 200, "hello", 100.0).unwrap();
        let hit = cache.get("https://example.invalid", 3600, 150.0).unwrap();
        assert_eq!(hit.unwrap().text, "hello");
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpCache::open(&dir.path().join("cache.sqlite")).unwrap();
        cache.set("https://example.invalid", 200, "hello", 100.0).unwrap();
        let miss = cache.get("https://example.invalid", 10, 1000.0).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn upsert_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpCache::open(&dir.path().join("cache.sqlite")).unwrap();
        cache.set("https://example.invalid", 200, "first", 100.0).unwrap();
        cache.set("https://example.invalid", 200, "second", 200.0).unwrap();
        let hit = cache.get("https://example.invalid", 3600, 250.0).unwrap();
        assert_eq!(hit.unwrap().text, "second");
    }
}
