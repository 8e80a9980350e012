//! Friends / friend-request caching: the delta-versioned fetch pattern
//! applied to three independently versioned collections, with
//! stale-while-revalidate refresh and hard invalidation on graph mutations.

use crate::cache::{keys, PersistentCache};
use crate::clock::Clock;
use crate::fetcher::{read_collection, store_response, Freshness};
use crate::types::{Friend, FriendRequest, FriendRequestKind, UserId};
use crate::updates::SocialResponse;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocialCollection {
    Friends,
    FriendIds,
    Requests(FriendRequestKind),
}

impl SocialCollection {
    pub fn cache_key(&self) -> String {
        match self {
            Self::Friends => keys::FRIENDS.to_string(),
            Self::FriendIds => keys::FRIEND_IDS.to_string(),
            Self::Requests(kind) => keys::friend_requests(*kind),
        }
    }
}

/// What `hydrate` found in the cache, so the caller knows whether to hit
/// the network and whether that fetch may run in the background.
#[derive(Debug)]
pub struct HydrateOutcome {
    pub freshness: Option<Freshness>,
    /// Version token to present to the backend. Survives expiry: an expired
    /// entry is not servable but its token still enables a delta fetch.
    pub since_version: Option<String>,
}

impl HydrateOutcome {
    pub fn servable(&self) -> bool {
        self.freshness.is_some_and(|f| f.is_servable())
    }

    /// Stale-while-revalidate band: serve from cache and refresh without
    /// blocking the caller.
    pub fn wants_background_refresh(&self) -> bool {
        self.freshness == Some(Freshness::RefreshWorthy)
    }
}

#[derive(Debug, Default)]
pub struct SocialGraphDeltaCache {
    ttl_ms: i64,
    friends: Vec<Friend>,
    friend_ids: Vec<UserId>,
    incoming_requests: Vec<FriendRequest>,
    outgoing_requests: Vec<FriendRequest>,
}

impl SocialGraphDeltaCache {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            ..Self::default()
        }
    }

    pub fn friends(&self) -> &[Friend] {
        &self.friends
    }

    pub fn friend_ids(&self) -> &[UserId] {
        &self.friend_ids
    }

    pub fn requests(&self, kind: FriendRequestKind) -> &[FriendRequest] {
        match kind {
            FriendRequestKind::Incoming => &self.incoming_requests,
            FriendRequestKind::Outgoing => &self.outgoing_requests,
        }
    }

    /// Populate the in-memory collection from cache when servable. Always
    /// reports what was found so the caller can plan the fetch.
    pub fn hydrate(
        &mut self,
        cache: &PersistentCache,
        clock: &dyn Clock,
        collection: SocialCollection,
    ) -> HydrateOutcome {
        let key = collection.cache_key();
        match collection {
            SocialCollection::Friends => {
                let Some(col) = read_collection::<Friend>(cache, clock, &key, self.ttl_ms) else {
                    return HydrateOutcome { freshness: None, since_version: None };
                };
                if col.freshness.is_servable() {
                    self.friends = col.items;
                }
                HydrateOutcome {
                    freshness: Some(col.freshness),
                    since_version: col.version,
                }
            }
            SocialCollection::FriendIds => {
                let Some(col) = read_collection::<UserId>(cache, clock, &key, self.ttl_ms) else {
                    return HydrateOutcome { freshness: None, since_version: None };
                };
                if col.freshness.is_servable() {
                    self.friend_ids = col.items;
                }
                HydrateOutcome {
                    freshness: Some(col.freshness),
                    since_version: col.version,
                }
            }
            SocialCollection::Requests(kind) => {
                let Some(col) =
                    read_collection::<FriendRequest>(cache, clock, &key, self.ttl_ms)
                else {
                    return HydrateOutcome { freshness: None, since_version: None };
                };
                if col.freshness.is_servable() {
                    match kind {
                        FriendRequestKind::Incoming => self.incoming_requests = col.items,
                        FriendRequestKind::Outgoing => self.outgoing_requests = col.items,
                    }
                }
                HydrateOutcome {
                    freshness: Some(col.freshness),
                    since_version: col.version,
                }
            }
        }
    }

    /// Fold a fetched response into cache and memory. Returns true when the
    /// in-memory collection changed. A write suppressed by the staleness
    /// guard leaves memory as-is (the cache already holds a newer result).
    pub fn apply(
        &mut self,
        cache: &mut PersistentCache,
        clock: &dyn Clock,
        response: SocialResponse,
        fetch_started_at: i64,
    ) -> bool {
        match response {
            SocialResponse::Friends(resp) => {
                let cached = cache
                    .get::<Vec<Friend>>(keys::FRIENDS)
                    .map(|e| e.payload)
                    .unwrap_or_default();
                match store_response(cache, clock, keys::FRIENDS, cached, resp, fetch_started_at)
                {
                    Some(items) => {
                        self.friends = items;
                        true
                    }
                    None => false,
                }
            }
            SocialResponse::FriendIds(resp) => {
                let cached = cache
                    .get::<Vec<UserId>>(keys::FRIEND_IDS)
                    .map(|e| e.payload)
                    .unwrap_or_default();
                match store_response(
                    cache,
                    clock,
                    keys::FRIEND_IDS,
                    cached,
                    resp,
                    fetch_started_at,
                ) {
                    Some(items) => {
                        self.friend_ids = items;
                        true
                    }
                    None => false,
                }
            }
            SocialResponse::Requests(kind, resp) => {
                let key = keys::friend_requests(kind);
                let cached = cache
                    .get::<Vec<FriendRequest>>(&key)
                    .map(|e| e.payload)
                    .unwrap_or_default();
                match store_response(cache, clock, &key, cached, resp, fetch_started_at) {
                    Some(items) => {
                        match kind {
                            FriendRequestKind::Incoming => self.incoming_requests = items,
                            FriendRequestKind::Outgoing => self.outgoing_requests = items,
                        }
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Hard invalidation after accepting/rejecting a request or removing a
    /// friend: the entries are deleted (not merely marked stale) so the
    /// next read is forced to the network.
    pub fn invalidate_after_mutation(&mut self, cache: &mut PersistentCache) {
        cache.remove(keys::FRIENDS);
        cache.remove(keys::FRIEND_IDS);
        cache.remove(&keys::friend_requests(FriendRequestKind::Incoming));
        cache.remove(&keys::friend_requests(FriendRequestKind::Outgoing));
    }

    /// Optimistic local append of a just-sent request, for immediate UI
    /// feedback. Memory-only: the next authoritative fetch supersedes it,
    /// and nothing provisional ever lands in the persistent cache.
    pub fn note_outgoing_request(&mut self, request: FriendRequest) {
        if self.outgoing_requests.iter().any(|r| r.id == request.id) {
            return;
        }
        self.outgoing_requests.push(request);
    }

    /// Drop an optimistic entry whose send failed.
    pub fn forget_outgoing_request(&mut self, request_id: &str) {
        self.outgoing_requests.retain(|r| r.id != request_id);
    }

    pub fn clear(&mut self) {
        self.friends.clear();
        self.friend_ids.clear();
        self.incoming_requests.clear();
        self.outgoing_requests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VersionedResponse;
    use crate::clock::ManualClock;

    const TTL: i64 = 10_000;

    fn friend(id: &str) -> Friend {
        Friend {
            user_id: id.to_string(),
            display_name: None,
            avatar_url: None,
        }
    }

    fn friend_names(social: &SocialGraphDeltaCache) -> Vec<&str> {
        social.friends().iter().map(|f| f.user_id.as_str()).collect()
    }

    #[test]
    fn unchanged_keeps_cache_and_memory() {
        let clock = ManualClock::new(0);
        let mut cache = PersistentCache::in_memory();
        let mut social = SocialGraphDeltaCache::new(TTL);

        let original: Vec<Friend> = (0..3).map(|i| friend(&format!("f{i}"))).collect();
        cache.put(keys::FRIENDS, &original, 0, Some("v5".into()));
        social.hydrate(&cache, &clock, SocialCollection::Friends);

        social.apply(
            &mut cache,
            &clock,
            SocialResponse::Friends(VersionedResponse::Unchanged),
            0,
        );
        assert_eq!(friend_names(&social), vec!["f0", "f1", "f2"]);
        let entry = cache.get::<Vec<Friend>>(keys::FRIENDS).unwrap();
        assert_eq!(entry.version.as_deref(), Some("v5"));
    }

    #[test]
    fn delta_appends_exactly_the_new_friends() {
        let clock = ManualClock::new(0);
        let mut cache = PersistentCache::in_memory();
        let mut social = SocialGraphDeltaCache::new(TTL);

        let original: Vec<Friend> = (0..3).map(|i| friend(&format!("f{i}"))).collect();
        cache.put(keys::FRIENDS, &original, 0, Some("v5".into()));
        social.hydrate(&cache, &clock, SocialCollection::Friends);

        let changed = social.apply(
            &mut cache,
            &clock,
            SocialResponse::Friends(VersionedResponse::Changed {
                items: vec![friend("f3"), friend("f4")],
                version: "v6".into(),
                delta_update: true,
            }),
            0,
        );
        assert!(changed);
        assert_eq!(friend_names(&social), vec!["f0", "f1", "f2", "f3", "f4"]);
        let entry = cache.get::<Vec<Friend>>(keys::FRIENDS).unwrap();
        assert_eq!(entry.version.as_deref(), Some("v6"));
    }

    #[test]
    fn hydrate_reports_refresh_band() {
        let clock = ManualClock::new(9_000);
        let mut cache = PersistentCache::in_memory();
        let mut social = SocialGraphDeltaCache::new(TTL);
        // Written at now - 0.9*TTL: servable, refresh-worthy.
        cache.put(keys::FRIENDS, &vec![friend("f0")], 0, Some("v1".into()));

        let outcome = social.hydrate(&cache, &clock, SocialCollection::Friends);
        assert!(outcome.servable());
        assert!(outcome.wants_background_refresh());
        assert_eq!(friend_names(&social), vec!["f0"]);

        // Written at now - 1.1*TTL: a miss, but the token survives.
        clock.set(11_000);
        let mut social = SocialGraphDeltaCache::new(TTL);
        let outcome = social.hydrate(&cache, &clock, SocialCollection::Friends);
        assert!(!outcome.servable());
        assert_eq!(outcome.since_version.as_deref(), Some("v1"));
        assert!(social.friends().is_empty());
    }

    #[test]
    fn mutation_invalidates_all_graph_entries() {
        let clock = ManualClock::new(0);
        let mut cache = PersistentCache::in_memory();
        let mut social = SocialGraphDeltaCache::new(TTL);
        cache.put(keys::FRIENDS, &vec![friend("f0")], 0, Some("v1".into()));
        cache.put(keys::FRIEND_IDS, &vec!["f0".to_string()], 0, Some("v1".into()));

        social.invalidate_after_mutation(&mut cache);
        let outcome = social.hydrate(&cache, &clock, SocialCollection::Friends);
        assert!(outcome.freshness.is_none());
        assert!(outcome.since_version.is_none());
    }

    #[test]
    fn optimistic_request_is_superseded_by_authoritative_fetch() {
        let clock = ManualClock::new(0);
        let mut cache = PersistentCache::in_memory();
        let mut social = SocialGraphDeltaCache::new(TTL);

        social.note_outgoing_request(FriendRequest {
            id: "local-1".into(),
            from_user_id: "me".into(),
            to_user_id: "them".into(),
            created_at: 0,
        });
        assert_eq!(social.requests(FriendRequestKind::Outgoing).len(), 1);
        // Nothing provisional in the cache.
        assert!(cache
            .get::<Vec<FriendRequest>>(&keys::friend_requests(FriendRequestKind::Outgoing))
            .is_none());

        social.apply(
            &mut cache,
            &clock,
            SocialResponse::Requests(
                FriendRequestKind::Outgoing,
                VersionedResponse::Changed {
                    items: vec![FriendRequest {
                        id: "srv-9".into(),
                        from_user_id: "me".into(),
                        to_user_id: "them".into(),
                        created_at: 5,
                    }],
                    version: "v2".into(),
                    delta_update: false,
                },
            ),
            0,
        );
        let outgoing = social.requests(FriendRequestKind::Outgoing);
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].id, "srv-9");
    }
}
