//! Content-addressed result cache.
//!
//! Extraction results are keyed by a fingerprint of their keying material
//! (cleaned page content, or URL plus request variant). An entry is served
//! only while it is younger than the TTL and its payload passes
//! [`validity::is_valid_payload`]; expired or invalid entries are dropped on
//! read. Optionally the map is mirrored to SQLite:
//!
//! - every Nth successful write spawns a background flush
//! - startup reload keeps only unexpired, valid, decodable rows
//! - persistence faults are logged and the cache carries on in memory

pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod validity;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::StoredEntry;
pub use hash::{compute_fingerprint, url_key_material};
pub use validity::{ERROR_MARKERS, is_valid_payload, title_has_error_marker};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One cached result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheStats {
    pub entry_count: usize,
    pub ttl_seconds: u64,
    pub persistent: bool,
}

type EntryMap = Arc<RwLock<HashMap<String, CacheEntry>>>;

/// Process-wide extraction result cache.
pub struct ContentCache {
    entries: EntryMap,
    ttl: chrono::Duration,
    ttl_seconds: u64,
    db: Option<CacheDb>,
    flush_every: u64,
    writes: AtomicU64,
    flush_lock: Arc<tokio::sync::Mutex<()>>,
    clock: Arc<dyn Clock>,
}

impl ContentCache {
    /// A memory-only cache.
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            ttl_seconds: ttl.as_secs(),
            db: None,
            flush_every: 1,
            writes: AtomicU64::new(0),
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
            clock: Arc::new(SystemClock),
        }
    }

    /// A cache mirrored to `db`, preloaded with its usable rows.
    pub async fn persistent(db: CacheDb, ttl: Duration, flush_every: u64) -> Self {
        let mut cache = Self::in_memory(ttl);
        cache.flush_every = flush_every.max(1);
        cache.db = Some(db);
        cache.reload().await;
        cache
    }

    /// Open the persistence file at `path`, degrading to memory-only on failure.
    pub async fn open(path: impl AsRef<Path>, ttl: Duration, flush_every: u64) -> Self {
        match CacheDb::open(path.as_ref()).await {
            Ok(db) => Self::persistent(db, ttl, flush_every).await,
            Err(e) => {
                tracing::warn!(path = %path.as_ref().display(), error = %e, "cache persistence unavailable; running in memory");
                Self::in_memory(ttl)
            }
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Look up a result by keying material.
    ///
    /// Expired and invalid entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        if key.is_empty() {
            return None;
        }
        let fingerprint = compute_fingerprint(key);
        let now = self.clock.now();

        let verdict = {
            let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match map.get(&fingerprint) {
                None => return None,
                Some(entry) if now - entry.created_at > self.ttl => Err("expired"),
                Some(entry) if !is_valid_payload(&entry.payload) => Err("invalid"),
                Some(entry) => Ok(entry.payload.clone()),
            }
        };

        match verdict {
            Ok(payload) => {
                tracing::debug!(fingerprint = %fingerprint, "cache hit");
                Some(payload)
            }
            Err(reason) => {
                self.entries
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&fingerprint);
                tracing::info!(fingerprint = %fingerprint, reason, "cache entry dropped");
                None
            }
        }
    }

    /// Store a result under keying material.
    ///
    /// Invalid payloads and empty keys are ignored. Returns whether the entry was stored.
    pub fn set(&self, key: &str, payload: Value) -> bool {
        if key.is_empty() || !is_valid_payload(&payload) {
            return false;
        }
        let fingerprint = compute_fingerprint(key);
        let entry = CacheEntry { fingerprint: fingerprint.clone(), payload, created_at: self.clock.now() };

        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(fingerprint.clone(), entry);
        tracing::info!(fingerprint = %fingerprint, "cached result");

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.db.is_some() && writes % self.flush_every == 0 {
            self.spawn_flush();
        }
        true
    }

    /// Remove every entry, in memory and on disk. Returns how many in-memory entries were removed.
    pub async fn clear(&self) -> usize {
        let removed = {
            let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let count = map.len();
            map.clear();
            count
        };

        if let Some(db) = &self.db {
            let _guard = self.flush_lock.lock().await;
            if let Err(e) = db.clear_entries().await {
                tracing::warn!(error = %e, "failed to clear persisted cache");
            }
        }

        tracing::info!(removed, "cache cleared");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.read().unwrap_or_else(|e| e.into_inner()).len(),
            ttl_seconds: self.ttl_seconds,
            persistent: self.db.is_some(),
        }
    }

    /// Write the current map to disk now.
    pub async fn flush(&self) {
        if let Some(db) = &self.db {
            flush_to(db, &self.entries, &self.flush_lock).await;
        }
    }

    fn spawn_flush(&self) {
        let Some(db) = self.db.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; skipping cache flush");
            return;
        };

        let entries = Arc::clone(&self.entries);
        let lock = Arc::clone(&self.flush_lock);
        runtime.spawn(async move {
            flush_to(&db, &entries, &lock).await;
        });
    }

    async fn reload(&self) {
        let Some(db) = &self.db else {
            return;
        };
        let rows = match db.load_entries().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load persisted cache");
                return;
            }
        };

        let now = self.clock.now();
        let total = rows.len();
        let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for row in rows {
            let Ok(payload) = serde_json::from_str::<Value>(&row.payload_json) else {
                continue;
            };
            let Ok(created_at) = DateTime::parse_from_rfc3339(&row.created_at) else {
                continue;
            };
            let created_at = created_at.with_timezone(&Utc);
            if now - created_at > self.ttl || !is_valid_payload(&payload) {
                continue;
            }
            map.insert(row.fingerprint.clone(), CacheEntry { fingerprint: row.fingerprint, payload, created_at });
        }

        tracing::info!(loaded = map.len(), dropped = total - map.len(), "reloaded persisted cache");
    }
}

async fn flush_to(db: &CacheDb, entries: &EntryMap, lock: &tokio::sync::Mutex<()>) {
    let _guard = lock.lock().await;

    let rows: Vec<StoredEntry> = {
        let map = entries.read().unwrap_or_else(|e| e.into_inner());
        map.values()
            .filter_map(|entry| {
                Some(StoredEntry {
                    fingerprint: entry.fingerprint.clone(),
                    payload_json: serde_json::to_string(&entry.payload).ok()?,
                    created_at: entry.created_at.to_rfc3339(),
                })
            })
            .collect()
    };

    match db.replace_entries(rows).await {
        Ok(count) => tracing::debug!(count, "flushed cache to disk"),
        Err(e) => tracing::warn!(error = %e, "cache flush failed; continuing in memory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        fn advance(&self, secs: i64) {
            *self.0.lock().unwrap() += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn detail(title: &str) -> Value {
        json!({"type": "detail", "title": title, "full_text": "Body text of the article."})
    }

    #[test]
    fn test_set_then_get() {
        let cache = ContentCache::in_memory(Duration::from_secs(60));
        assert!(cache.set("page content", detail("Rust 2024")));
        assert_eq!(cache.get("page content"), Some(detail("Rust 2024")));
    }

    #[test]
    fn test_miss_on_changed_content() {
        let cache = ContentCache::in_memory(Duration::from_secs(60));
        cache.set("page content", detail("Rust 2024"));
        assert!(cache.get("page content!").is_none());
    }

    #[test]
    fn test_ttl_boundary() {
        let clock = ManualClock::new();
        let cache = ContentCache::in_memory(Duration::from_secs(100)).with_clock(clock.clone());
        cache.set("k", detail("Rust 2024"));

        clock.advance(99);
        assert!(cache.get("k").is_some());

        clock.advance(2);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_unknown_bodyless_not_stored() {
        let cache = ContentCache::in_memory(Duration::from_secs(60));
        assert!(!cache.set("k", json!({"type": "unknown", "title": "Home"})));
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_error_titles_never_served() {
        let cache = ContentCache::in_memory(Duration::from_secs(60));
        for (i, marker) in ERROR_MARKERS.iter().enumerate() {
            let key = format!("key-{i}");
            cache.set(&key, detail(&format!("Page {}", marker.to_uppercase())));
            assert!(cache.get(&key).is_none(), "{marker} was served");
        }
    }

    #[test]
    fn test_empty_key_ignored() {
        let cache = ContentCache::in_memory(Duration::from_secs(60));
        assert!(!cache.set("", detail("Rust")));
        assert!(cache.get("").is_none());
    }

    #[test]
    fn test_replace_on_write() {
        let cache = ContentCache::in_memory(Duration::from_secs(60));
        cache.set("k", detail("First"));
        cache.set("k", detail("Second"));
        assert_eq!(cache.get("k"), Some(detail("Second")));
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let cache = ContentCache::in_memory(Duration::from_secs(60));
        cache.set("a", detail("A title"));
        cache.set("b", detail("B title"));

        let stats = cache.stats();
        assert_eq!(stats, CacheStats { entry_count: 2, ttl_seconds: 60, persistent: false });

        assert_eq!(cache.clear().await, 2);
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_persistent_reload_filters_stale_and_invalid() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(7200);
        db.replace_entries(vec![
            StoredEntry {
                fingerprint: compute_fingerprint("fresh"),
                payload_json: detail("Fresh").to_string(),
                created_at: now.to_rfc3339(),
            },
            StoredEntry {
                fingerprint: compute_fingerprint("stale"),
                payload_json: detail("Stale").to_string(),
                created_at: old.to_rfc3339(),
            },
            StoredEntry {
                fingerprint: compute_fingerprint("blocked"),
                payload_json: detail("Access Denied").to_string(),
                created_at: now.to_rfc3339(),
            },
            StoredEntry {
                fingerprint: compute_fingerprint("corrupt"),
                payload_json: "{not json".to_string(),
                created_at: now.to_rfc3339(),
            },
            StoredEntry {
                fingerprint: compute_fingerprint("bad-time"),
                payload_json: detail("Bad time").to_string(),
                created_at: "yesterday".to_string(),
            },
        ])
        .await
        .unwrap();

        let cache = ContentCache::persistent(db, Duration::from_secs(3600), 10).await;
        assert_eq!(cache.stats().entry_count, 1);
        assert!(cache.stats().persistent);
        assert_eq!(cache.get("fresh"), Some(detail("Fresh")));
    }

    #[tokio::test]
    async fn test_flush_round_trips_through_disk() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = ContentCache::persistent(db.clone(), Duration::from_secs(3600), 100).await;
        cache.set("page", detail("Persisted"));
        cache.flush().await;

        let reloaded = ContentCache::persistent(db, Duration::from_secs(3600), 100).await;
        assert_eq!(reloaded.get("page"), Some(detail("Persisted")));
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_copy() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = ContentCache::persistent(db.clone(), Duration::from_secs(3600), 100).await;
        cache.set("page", detail("Persisted"));
        cache.flush().await;

        cache.clear().await;
        assert!(db.load_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_bad_path_degrades_to_memory() {
        let cache = ContentCache::open("/nonexistent-dir/for/sure/cache.sqlite", Duration::from_secs(60), 1).await;
        assert!(!cache.stats().persistent);
        assert!(cache.set("k", detail("Still works")));
    }
}
