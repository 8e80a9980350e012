//! TTL-agnostic persistent key/value cache.
//!
//! The cache stores `CacheEntry` envelopes (payload + `written_at` +
//! optional version token) as JSON. Freshness is a *caller* policy: the
//! cache records when an entry was written and nothing else, which keeps
//! one primitive reusable for conversations, message windows and the
//! social graph, each with their own TTL.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{FriendRequestKind, Timestamp};

/// Namespaced cache keys, one prefix per domain.
pub mod keys {
    use super::FriendRequestKind;
    use crate::types::ConversationId;

    pub const CONVERSATIONS: &str = "conversations";
    pub const FRIENDS: &str = "friends";
    pub const FRIEND_IDS: &str = "friend-ids";
    pub const MESSAGES_PREFIX: &str = "messages:";

    pub fn messages(conversation_id: &ConversationId) -> String {
        format!("{MESSAGES_PREFIX}{conversation_id}")
    }

    pub fn friend_requests(kind: FriendRequestKind) -> String {
        format!("friend-requests:{}", kind.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub written_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Raw string storage behind the typed cache. Implementations log and
/// swallow their own storage errors: a failed read is a miss, a failed
/// write leaves the previous value in place.
pub trait CacheStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
    fn remove_prefix(&mut self, prefix: &str);
    fn clear(&mut self);
}

/// On-disk store, one table in `sync_cache.sqlite3` under the app data dir.
pub struct SqliteCacheStore {
    conn: Connection,
}

impl SqliteCacheStore {
    pub fn open(data_dir: &str) -> Result<Self, rusqlite::Error> {
        let path = Path::new(data_dir).join("sync_cache.sqlite3");
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.conn.query_row(
            "SELECT value FROM cache WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                tracing::warn!(%e, key, "cache read failed; treating as miss");
                None
            }
        }
    }

    fn put(&mut self, key: &str, value: &str) {
        if let Err(e) = self.conn.execute(
            "INSERT INTO cache (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        ) {
            tracing::warn!(%e, key, "cache write failed");
        }
    }

    fn remove(&mut self, key: &str) {
        if let Err(e) = self
            .conn
            .execute("DELETE FROM cache WHERE key = ?1", [key])
        {
            tracing::warn!(%e, key, "cache remove failed");
        }
    }

    fn remove_prefix(&mut self, prefix: &str) {
        // Keys are crate-controlled and contain no LIKE metacharacters.
        if let Err(e) = self.conn.execute(
            "DELETE FROM cache WHERE key LIKE ?1 || '%'",
            [prefix],
        ) {
            tracing::warn!(%e, prefix, "cache prefix remove failed");
        }
    }

    fn clear(&mut self) {
        if let Err(e) = self.conn.execute("DELETE FROM cache", []) {
            tracing::warn!(%e, "cache clear failed");
        }
    }
}

/// In-memory store for tests and ephemeral (logged-out browse) sessions.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: HashMap<String, String>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn remove_prefix(&mut self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Typed envelope layer over a [`CacheStore`].
pub struct PersistentCache {
    store: Box<dyn CacheStore>,
}

impl PersistentCache {
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn open_sqlite(data_dir: &str) -> Result<Self, rusqlite::Error> {
        Ok(Self::new(Box::new(SqliteCacheStore::open(data_dir)?)))
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryCacheStore::new()))
    }

    /// Read a typed entry. A malformed stored value logs a warning and reads
    /// as a miss; the key is deliberately left in place so the next
    /// successful write overwrites it.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(%e, key, "malformed cache entry; treating as miss");
                None
            }
        }
    }

    pub fn put<T: Serialize>(
        &mut self,
        key: &str,
        payload: &T,
        written_at: Timestamp,
        version: Option<String>,
    ) {
        let entry = CacheEntry {
            payload,
            written_at,
            version,
        };
        match serde_json::to_string(&entry) {
            Ok(raw) => self.store.put(key, &raw),
            Err(e) => tracing::warn!(%e, key, "cache serialize failed"),
        }
    }

    /// Refresh `written_at` (and optionally the version) without touching
    /// the payload. Used for the `unchanged` delta-fetch outcome.
    pub fn touch(&mut self, key: &str, written_at: Timestamp, version: Option<String>) {
        let Some(raw) = self.store.get(key) else {
            return;
        };
        let Ok(mut value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            tracing::warn!(key, "malformed cache entry; skipping touch");
            return;
        };
        let Some(obj) = value.as_object_mut() else {
            tracing::warn!(key, "malformed cache entry; skipping touch");
            return;
        };
        obj.insert("written_at".to_string(), serde_json::json!(written_at));
        if let Some(v) = version {
            obj.insert("version".to_string(), serde_json::json!(v));
        }
        match serde_json::to_string(&value) {
            Ok(raw) => self.store.put(key, &raw),
            Err(e) => tracing::warn!(%e, key, "cache touch failed"),
        }
    }

    /// `written_at` of the stored entry, if any. Cheap freshness probe that
    /// avoids deserializing the payload.
    pub fn written_at(&self, key: &str) -> Option<Timestamp> {
        let raw = self.store.get(key)?;
        let value = serde_json::from_str::<serde_json::Value>(&raw).ok()?;
        value.get("written_at")?.as_i64()
    }

    pub fn remove(&mut self, key: &str) {
        self.store.remove(key);
    }

    pub fn remove_prefix(&mut self, prefix: &str) {
        self.store.remove_prefix(prefix);
    }

    /// Full wipe: logout and account deletion.
    pub fn clear(&mut self) {
        self.store.clear();
    }
}
