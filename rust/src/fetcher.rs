//! Fetch-with-version over the persistent cache.
//!
//! The same pattern serves the chat list, the friends list, friend ids and
//! friend requests: serve from cache while fresh, refresh in the background
//! once past half the TTL, and ask the backend only for what changed since
//! the last version token.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::VersionedResponse;
use crate::cache::PersistentCache;
use crate::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Serve from cache, no network.
    Fresh,
    /// Serve from cache *and* refresh in the background
    /// (stale-while-revalidate band: past half the TTL, not yet expired).
    RefreshWorthy,
    /// Treat as a miss; the caller must hit the network before serving.
    Expired,
}

impl Freshness {
    pub fn classify(age_ms: i64, ttl_ms: i64) -> Self {
        if age_ms < 0 {
            // Entry written "in the future": clock moved backwards. Serve it.
            return Self::Fresh;
        }
        if age_ms >= ttl_ms {
            Self::Expired
        } else if age_ms * 2 > ttl_ms {
            Self::RefreshWorthy
        } else {
            Self::Fresh
        }
    }

    pub fn is_servable(&self) -> bool {
        !matches!(self, Self::Expired)
    }
}

/// A cached collection plus the bookkeeping a delta fetch needs.
#[derive(Clone, Debug)]
pub struct CachedCollection<T> {
    pub items: Vec<T>,
    pub version: Option<String>,
    pub freshness: Freshness,
}

/// Read a collection entry and classify its age. Expired entries are still
/// returned (the version token remains valid for a delta fetch); callers
/// check `freshness` before serving the payload.
pub fn read_collection<T: DeserializeOwned>(
    cache: &PersistentCache,
    clock: &dyn Clock,
    key: &str,
    ttl_ms: i64,
) -> Option<CachedCollection<T>> {
    let entry = cache.get::<Vec<T>>(key)?;
    let freshness = Freshness::classify(clock.now_ms() - entry.written_at, ttl_ms);
    Some(CachedCollection {
        items: entry.payload,
        version: entry.version,
        freshness,
    })
}

/// Background-refresh write guard: a refresh that raced a foreground fetch
/// must not overwrite a result persisted after the refresh started.
/// Last-write-wins is decided by what is cached now, not by arrival order.
pub fn write_is_stale(cache: &PersistentCache, key: &str, fetch_started_at: i64) -> bool {
    cache
        .written_at(key)
        .is_some_and(|written| written > fetch_started_at)
}

/// Fold a [`VersionedResponse`] into the cached collection and persist the
/// result. Returns the collection now considered authoritative, or `None`
/// when the write was suppressed by the staleness guard.
///
/// - `Unchanged`: payload kept, only `written_at`/version bookkeeping moves.
/// - full replace: response supersedes the cache entirely.
/// - delta: response is appended to `cached_items`.
pub fn store_response<T: Serialize + Clone>(
    cache: &mut PersistentCache,
    clock: &dyn Clock,
    key: &str,
    cached_items: Vec<T>,
    response: VersionedResponse<T>,
    fetch_started_at: i64,
) -> Option<Vec<T>> {
    if write_is_stale(cache, key, fetch_started_at) {
        tracing::debug!(key, "discarding fetch result; cache has a newer write");
        return None;
    }
    let now = clock.now_ms();
    match response {
        VersionedResponse::Unchanged => {
            cache.touch(key, now, None);
            Some(cached_items)
        }
        VersionedResponse::Changed {
            items,
            version,
            delta_update,
        } => {
            let merged = if delta_update {
                let mut merged = cached_items;
                merged.extend(items);
                merged
            } else {
                items
            };
            cache.put(key, &merged, now, Some(version));
            Some(merged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const TTL: i64 = 10_000;

    #[test]
    fn classify_covers_the_three_bands() {
        assert_eq!(Freshness::classify(0, TTL), Freshness::Fresh);
        assert_eq!(Freshness::classify(4_999, TTL), Freshness::Fresh);
        assert_eq!(Freshness::classify(5_001, TTL), Freshness::RefreshWorthy);
        // 0.9 * TTL: still servable, schedules a refresh.
        assert_eq!(Freshness::classify(9_000, TTL), Freshness::RefreshWorthy);
        // 1.1 * TTL: a miss.
        assert_eq!(Freshness::classify(11_000, TTL), Freshness::Expired);
        assert_eq!(Freshness::classify(TTL, TTL), Freshness::Expired);
    }

    #[test]
    fn unchanged_keeps_payload_and_touches_bookkeeping() {
        let clock = ManualClock::new(1_000);
        let mut cache = PersistentCache::in_memory();
        cache.put("friends", &vec!["a".to_string()], 1_000, Some("v5".into()));

        clock.set(6_000);
        let out = store_response(
            &mut cache,
            &clock,
            "friends",
            vec!["a".to_string()],
            VersionedResponse::Unchanged,
            6_000,
        )
        .unwrap();
        assert_eq!(out, vec!["a".to_string()]);

        let entry = cache.get::<Vec<String>>("friends").unwrap();
        assert_eq!(entry.payload, vec!["a".to_string()]);
        assert_eq!(entry.written_at, 6_000);
        assert_eq!(entry.version.as_deref(), Some("v5"));
    }

    #[test]
    fn delta_appends_and_advances_version() {
        let clock = ManualClock::new(1_000);
        let mut cache = PersistentCache::in_memory();
        let original: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        cache.put("friends", &original, 1_000, Some("v5".into()));

        clock.set(2_000);
        let out = store_response(
            &mut cache,
            &clock,
            "friends",
            original.clone(),
            VersionedResponse::Changed {
                items: vec!["d".into(), "e".into()],
                version: "v6".into(),
                delta_update: true,
            },
            2_000,
        )
        .unwrap();
        assert_eq!(out, vec!["a", "b", "c", "d", "e"]);

        let entry = cache.get::<Vec<String>>("friends").unwrap();
        assert_eq!(entry.version.as_deref(), Some("v6"));
    }

    #[test]
    fn full_replace_supersedes_cache() {
        let clock = ManualClock::new(1_000);
        let mut cache = PersistentCache::in_memory();
        cache.put("friends", &vec!["a".to_string()], 1_000, Some("v5".into()));

        let out = store_response(
            &mut cache,
            &clock,
            "friends",
            vec!["a".to_string()],
            VersionedResponse::Changed {
                items: vec!["x".into(), "y".into()],
                version: "v7".into(),
                delta_update: false,
            },
            1_000,
        )
        .unwrap();
        assert_eq!(out, vec!["x", "y"]);
    }

    #[test]
    fn stale_background_write_is_suppressed() {
        let clock = ManualClock::new(1_000);
        let mut cache = PersistentCache::in_memory();
        // A foreground fetch persisted at t=5000, after our refresh started
        // at t=2000.
        cache.put("friends", &vec!["fresh".to_string()], 5_000, Some("v9".into()));

        let out = store_response(
            &mut cache,
            &clock,
            "friends",
            vec!["stale".to_string()],
            VersionedResponse::Changed {
                items: vec!["old".into()],
                version: "v6".into(),
                delta_update: false,
            },
            2_000,
        );
        assert!(out.is_none());

        let entry = cache.get::<Vec<String>>("friends").unwrap();
        assert_eq!(entry.payload, vec!["fresh".to_string()]);
        assert_eq!(entry.version.as_deref(), Some("v9"));
    }

    #[test]
    fn expired_entries_are_not_servable_but_keep_their_version() {
        let clock = ManualClock::new(20_000);
        let mut cache = PersistentCache::in_memory();
        cache.put("friends", &vec!["a".to_string()], 1_000, Some("v5".into()));

        let col = read_collection::<String>(&cache, &clock, "friends", TTL).unwrap();
        assert!(!col.freshness.is_servable());
        assert_eq!(col.version.as_deref(), Some("v5"));
    }
}
