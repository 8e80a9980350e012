//! Client-side conversation sync and social-graph caching for Remed.
//!
//! The crate is organized around a single actor, [`SyncEngine`]: the app
//! shell dispatches [`SyncAction`]s and renders the [`SyncUpdate`] stream it
//! gets back. Remote reads go through a persistent cache (TTL plus
//! stale-while-revalidate, delta fetches keyed by server version tokens);
//! the open conversation additionally holds a live subscription with a
//! monotonic resume cursor. Sends are optimistic and reconciled in place.

mod actions;
mod backend;
mod cache;
mod clock;
mod config;
mod engine;
mod error;
mod fetcher;
mod http;
mod listener;
mod logging;
mod pagination;
mod send;
mod social;
mod store;
mod types;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use flume::{Receiver, Sender};

pub use actions::SyncAction;
pub use backend::{
    BackendApi, CredentialProvider, MessageBatchStream, RealtimeStore, VersionedResponse,
};
pub use cache::{keys, CacheEntry, CacheStore, MemoryCacheStore, PersistentCache, SqliteCacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_sync_config, SyncConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use fetcher::{read_collection, store_response, write_is_stale, CachedCollection, Freshness};
pub use http::HttpBackend;
pub use listener::{AttachOutcome, ListenerCursor, ListenerRegistry};
pub use logging::init_logging;
pub use pagination::PaginationEngine;
pub use send::{correlation_id, provisional_message};
pub use social::{HydrateOutcome, SocialCollection, SocialGraphDeltaCache};
pub use store::MessageStore;
pub use types::{
    Conversation, ConversationId, Friend, FriendRequest, FriendRequestKind, Message, MessageId,
    MessageStatus, Timestamp, UserId,
};
pub use updates::{ConversationView, EngineEvent, SocialResponse, SyncUpdate};

/// Platform-side callback for receiving engine updates.
pub trait UpdateReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: SyncUpdate);
}

/// App-facing handle. Owns the actor thread and the tokio runtime; dispatch
/// never blocks the caller.
pub struct SyncApp {
    actions_tx: Sender<SyncAction>,
    updates_rx: Receiver<SyncUpdate>,
    listening: AtomicBool,
}

impl SyncApp {
    pub fn new(
        me: String,
        data_dir: String,
        credentials: Arc<dyn CredentialProvider>,
        realtime: Arc<dyn RealtimeStore>,
    ) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, "SyncApp starting");

        let config = load_sync_config(&data_dir);
        let cache = PersistentCache::open_sqlite(&data_dir).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cache db unavailable; running with in-memory cache");
            PersistentCache::in_memory()
        });
        let backend: Arc<dyn BackendApi> =
            Arc::new(HttpBackend::new(config.api_base_url.clone(), credentials));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("tokio runtime");

        let (actions_tx, actions_rx) = flume::unbounded();
        let (engine, updates_rx) = SyncEngine::new(
            me,
            config,
            cache,
            backend,
            realtime,
            Arc::new(SystemClock),
            runtime.handle().clone(),
        );

        // Actor loop thread; the runtime lives and dies with it.
        thread::spawn(move || {
            let _runtime = runtime;
            engine.run(actions_rx);
        });

        Arc::new(Self {
            actions_tx,
            updates_rx,
            listening: AtomicBool::new(false),
        })
    }

    pub fn dispatch(&self, action: SyncAction) {
        // Contract: never block caller.
        let _ = self.actions_tx.send(action);
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn UpdateReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split updates.
            return;
        }

        let rx = self.updates_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}
