//! The sync engine actor.
//!
//! Owns every component, the persistent cache and all mutable state. The
//! app shell drives it with [`SyncAction`]s and renders [`SyncUpdate`]s;
//! spawned async work (fetches, sends, the live stream) re-enters through
//! the internal [`EngineEvent`] channel, so every state transition happens
//! on the actor and the component state machines need no locks.

use std::sync::Arc;
use std::time::Duration;

use crate::actions::SyncAction;
use crate::backend::{BackendApi, RealtimeStore};
use crate::cache::{keys, PersistentCache};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fetcher::{read_collection, write_is_stale, Freshness};
use crate::listener::ListenerRegistry;
use crate::pagination::PaginationEngine;
use crate::send;
use crate::social::{SocialCollection, SocialGraphDeltaCache};
use crate::store::MessageStore;
use crate::types::{
    Conversation, ConversationId, FriendRequest, FriendRequestKind, Message, MessageId,
    MessageStatus, Timestamp, UserId,
};
use crate::updates::{ConversationView, EngineEvent, SocialResponse, SyncUpdate};

struct ActiveConversation {
    id: ConversationId,
    other_user_id: UserId,
    store: MessageStore,
    has_more: bool,
    /// Monotonic per-open token; initial-window fetches that finish after
    /// the view was reopened or replaced are dropped.
    open_token: u64,
}

pub struct SyncEngine {
    me: UserId,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    cache: PersistentCache,
    backend: Arc<dyn BackendApi>,

    listeners: ListenerRegistry,
    pagination: PaginationEngine,
    social: SocialGraphDeltaCache,

    conversations: Vec<Conversation>,
    active: Option<ActiveConversation>,

    rev: u64,
    open_token: u64,
    background_token: u64,
    backgrounded: bool,

    runtime: tokio::runtime::Handle,
    updates: flume::Sender<SyncUpdate>,
    events_tx: flume::Sender<EngineEvent>,
    events_rx: flume::Receiver<EngineEvent>,
}

impl SyncEngine {
    pub fn new(
        me: impl Into<UserId>,
        config: SyncConfig,
        cache: PersistentCache,
        backend: Arc<dyn BackendApi>,
        realtime: Arc<dyn RealtimeStore>,
        clock: Arc<dyn Clock>,
        runtime: tokio::runtime::Handle,
    ) -> (Self, flume::Receiver<SyncUpdate>) {
        let (updates_tx, updates_rx) = flume::unbounded();
        let (events_tx, events_rx) = flume::unbounded();

        let listeners = ListenerRegistry::new(
            realtime,
            events_tx.clone(),
            runtime.clone(),
            config.live_page_size,
            config.initial_burst_limit,
        );
        let pagination = PaginationEngine::new(config.page_size);
        let social = SocialGraphDeltaCache::new(config.social_ttl_ms());

        let engine = Self {
            me: me.into(),
            config,
            clock,
            cache,
            backend,
            listeners,
            pagination,
            social,
            conversations: Vec::new(),
            active: None,
            rev: 0,
            open_token: 0,
            background_token: 0,
            backgrounded: false,
            runtime,
            updates: updates_tx,
            events_tx,
            events_rx,
        };
        (engine, updates_rx)
    }

    /// Dedicated actor loop: actions from the shell, events from spawned
    /// work, strictly interleaved. Returns when the action channel closes.
    pub fn run(mut self, actions: flume::Receiver<SyncAction>) {
        enum Next {
            Action(Option<SyncAction>),
            Event(Option<EngineEvent>),
        }
        let events = self.events_rx.clone();
        loop {
            let next = flume::Selector::new()
                .recv(&actions, |r| Next::Action(r.ok()))
                .recv(&events, |r| Next::Event(r.ok()))
                .wait();
            match next {
                Next::Action(Some(action)) => self.handle_action(action),
                Next::Event(Some(event)) => self.handle_event(event),
                Next::Action(None) => break,
                // The engine holds a sender; this channel cannot close.
                Next::Event(None) => break,
            }
        }
    }

    /// Drain completed async work without blocking. Test driver.
    pub fn pump(&mut self) -> usize {
        let events = self.events_rx.clone();
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait up to `timeout` for one completed async work item and apply it.
    pub fn pump_one(&mut self, timeout: Duration) -> bool {
        let events = self.events_rx.clone();
        match events.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                true
            }
            Err(_) => false,
        }
    }

    pub fn handle_action(&mut self, action: SyncAction) {
        tracing::debug!(action = action.tag(), "handling action");
        match action {
            SyncAction::OpenConversation { other_user_id } => {
                self.open_conversation(other_user_id)
            }
            SyncAction::CloseConversation => self.close_conversation(),
            SyncAction::RefreshConversations => self.refresh_conversations(),
            SyncAction::SendMessage {
                receiver_id,
                content,
            } => self.send_message(receiver_id, content),
            SyncAction::RetryMessage { message_id } => self.retry_message(message_id),
            SyncAction::LoadOlderMessages => self.load_older(),

            SyncAction::RefreshFriends => self.refresh_social(SocialCollection::Friends),
            SyncAction::RefreshFriendIds => self.refresh_social(SocialCollection::FriendIds),
            SyncAction::RefreshFriendRequests { kind } => {
                self.refresh_social(SocialCollection::Requests(kind))
            }
            SyncAction::SendFriendRequest { to_user_id } => self.send_friend_request(to_user_id),
            SyncAction::RespondFriendRequest { request_id, accept } => {
                self.respond_friend_request(request_id, accept)
            }
            SyncAction::RemoveFriend { user_id } => self.remove_friend(user_id),

            SyncAction::AppBackgrounded => self.app_backgrounded(),
            SyncAction::AppForegrounded => self.app_foregrounded(),
            SyncAction::ClearAll => self.clear_all(),
        }
    }

    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ConversationsFetched { started_at, result } => {
                self.on_conversations_fetched(started_at, result)
            }
            EngineEvent::MessagesFetched {
                conversation_id,
                open_token,
                result,
            } => self.on_messages_fetched(conversation_id, open_token, result),
            EngineEvent::OlderPageFetched {
                conversation_id,
                result,
            } => self.on_older_page(conversation_id, result),
            EngineEvent::ListenerBatch {
                conversation_id,
                attach_token,
                batch,
            } => self.on_listener_batch(conversation_id, attach_token, batch),
            EngineEvent::ListenerFailed {
                conversation_id,
                attach_token,
                error,
            } => {
                if self.listeners.handle_failure(&conversation_id, attach_token) {
                    tracing::warn!(%conversation_id, %error, "live subscription failed");
                    self.emit_failure_raw("listener", error, true);
                }
            }
            EngineEvent::SendFinished {
                conversation_id,
                temp_id,
                correlation_id,
                result,
            } => self.on_send_finished(conversation_id, temp_id, correlation_id, result),
            EngineEvent::SocialFetched {
                started_at,
                since_version: _,
                result,
            } => self.on_social_fetched(started_at, result),
            EngineEvent::FriendRequestSent {
                temp_request_id,
                result,
            } => self.on_friend_request_sent(temp_request_id, result),
            EngineEvent::FriendMutationFinished { context, result } => {
                self.on_friend_mutation(context, result)
            }
            EngineEvent::BackgroundGraceElapsed { background_token } => {
                if self.backgrounded && background_token == self.background_token {
                    tracing::debug!("background grace elapsed; detaching live subscriptions");
                    self.listeners.detach_all();
                }
            }
        }
    }

    // ----- conversations (chat list) -----

    /// Serve the chat list from cache when servable; hit the network on a
    /// miss or when inside the stale-while-revalidate band. This collection
    /// is full-replace-only (no version parameter).
    fn refresh_conversations(&mut self) {
        let cached = read_collection::<Conversation>(
            &self.cache,
            self.clock.as_ref(),
            keys::CONVERSATIONS,
            self.config.conversations_ttl_ms(),
        );
        let freshness = cached.as_ref().map(|c| c.freshness);
        if let Some(col) = cached {
            if col.freshness.is_servable() {
                self.conversations = col.items;
                self.emit_conversations();
            }
        }
        let need_fetch = !matches!(freshness, Some(Freshness::Fresh));
        if need_fetch && self.network_enabled() {
            let backend = self.backend.clone();
            let events = self.events_tx.clone();
            let started_at = self.now();
            self.runtime.spawn(async move {
                let result = backend.fetch_conversations().await;
                let _ = events.send(EngineEvent::ConversationsFetched { started_at, result });
            });
        }
    }

    fn on_conversations_fetched(
        &mut self,
        started_at: Timestamp,
        result: Result<Vec<Conversation>, SyncError>,
    ) {
        match result {
            Ok(conversations) => {
                if write_is_stale(&self.cache, keys::CONVERSATIONS, started_at) {
                    tracing::debug!("conversations result raced a newer write; dropped");
                    return;
                }
                self.cache
                    .put(keys::CONVERSATIONS, &conversations, self.now(), None);
                self.conversations = conversations;
                self.emit_conversations();
            }
            Err(e) => self.emit_failure("conversations", &e),
        }
    }

    // ----- open conversation -----

    fn open_conversation(&mut self, other_user_id: String) {
        let cid = ConversationId::for_pair(&self.me, &other_user_id);
        self.open_token += 1;
        let open_token = self.open_token;

        let mut store = MessageStore::new();
        let key = keys::messages(&cid);
        let cached = read_collection::<Message>(
            &self.cache,
            self.clock.as_ref(),
            &key,
            self.config.messages_ttl_ms(),
        );

        // Fresh cache: serve it and stay off the network. Refresh band:
        // serve it and refetch in the background. Miss: foreground fetch.
        let mut need_fetch = true;
        if let Some(col) = cached {
            if col.freshness.is_servable() {
                need_fetch = col.freshness == Freshness::RefreshWorthy;
                store.set_messages(col.items);
            }
        }

        let has_more = store.len() >= self.config.page_size;
        self.active = Some(ActiveConversation {
            id: cid.clone(),
            other_user_id: other_user_id.clone(),
            store,
            has_more,
            open_token,
        });
        self.listeners.set_active(Some(cid.clone()));

        if self.network_enabled() {
            let seed = self.live_cursor_seed();
            self.listeners.attach(&cid, seed);
            if need_fetch {
                let backend = self.backend.clone();
                let events = self.events_tx.clone();
                let limit = self.config.page_size;
                self.runtime.spawn(async move {
                    let result = backend.fetch_messages(&other_user_id, limit, None).await;
                    let _ = events.send(EngineEvent::MessagesFetched {
                        conversation_id: cid,
                        open_token,
                        result,
                    });
                });
            }
        }
        self.emit_active();
    }

    fn close_conversation(&mut self) {
        self.listeners.set_active(None);
        self.active = None;
        self.emit_active();
    }

    /// Newest cached timestamp plus the ids at that timestamp, so a (re)
    /// attached subscription only streams strictly-newer data.
    fn live_cursor_seed(&self) -> Option<(Timestamp, Vec<MessageId>)> {
        let a = self.active.as_ref()?;
        let ts = a.store.newest_timestamp()?;
        let ids = a
            .store
            .messages()
            .iter()
            .rev()
            .take_while(|m| m.timestamp == ts)
            .map(|m| m.id.clone())
            .collect();
        Some((ts, ids))
    }

    fn on_messages_fetched(
        &mut self,
        conversation_id: ConversationId,
        open_token: u64,
        result: Result<Vec<Message>, SyncError>,
    ) {
        let matches_active = self
            .active
            .as_ref()
            .is_some_and(|a| a.id == conversation_id && a.open_token == open_token);
        if !matches_active {
            tracing::debug!(%conversation_id, "initial window for stale open dropped");
            return;
        }
        match result {
            Ok(fetched) => {
                let fetched_len = fetched.len();
                let Some(a) = self.active.as_mut() else { return };
                // Wholesale replace must not eat optimistic sends that are
                // still in flight or failed-and-retryable.
                let pending: Vec<Message> = a
                    .store
                    .messages()
                    .iter()
                    .filter(|m| m.status != MessageStatus::Sent)
                    .cloned()
                    .collect();
                a.store.set_messages(fetched);
                for msg in pending {
                    a.store.append_message(msg);
                }
                a.has_more = fetched_len >= self.config.page_size;
                self.persist_active_window();
                self.emit_active();
            }
            Err(e) => self.emit_failure("messages", &e),
        }
    }

    // ----- live updates -----

    fn on_listener_batch(
        &mut self,
        conversation_id: ConversationId,
        attach_token: u64,
        batch: Vec<Message>,
    ) {
        let Some(a) = self.active.as_mut() else {
            return;
        };
        if a.id != conversation_id {
            // Stale callback from a just-detached subscription; the
            // registry would also reject it, but there is no store for it
            // either way.
            return;
        }
        let merged =
            self.listeners
                .handle_batch(&conversation_id, attach_token, batch, &mut a.store);
        if merged > 0 {
            tracing::debug!(%conversation_id, merged, "live messages merged");
            self.persist_active_window();
            self.refresh_preview_from_active();
            self.emit_active();
        }
    }

    /// Keep the chat-list row in step with what the open conversation just
    /// learned (preview text and recency; the next full fetch remains
    /// authoritative).
    fn refresh_preview_from_active(&mut self) {
        let Some(a) = &self.active else { return };
        let Some(last) = a.store.messages().last() else {
            return;
        };
        let (cid, content, ts) = (a.id.clone(), last.content.clone(), last.timestamp);
        let mut changed = false;
        if let Some(convo) = self.conversations.iter_mut().find(|c| c.id == cid) {
            if ts >= convo.last_message_time {
                convo.last_message = content;
                convo.last_message_time = ts;
                changed = true;
            }
        }
        if changed {
            self.conversations
                .sort_by(|x, y| y.last_message_time.cmp(&x.last_message_time));
            self.emit_conversations();
        }
    }

    // ----- sending -----

    fn send_message(&mut self, receiver_id: String, content: String) {
        if content.trim().is_empty() {
            return;
        }
        let provisional = send::provisional_message(&self.me, &receiver_id, &content, self.now());
        let conversation_id = provisional.conversation_id.clone();
        let temp_id = provisional.id.clone();
        let correlation_id = provisional
            .correlation_id
            .clone()
            .expect("provisional messages always carry a correlation id");

        let inserted = match self.active.as_mut() {
            Some(a) if a.id == conversation_id => a.store.append_message(provisional),
            _ => {
                tracing::warn!(%conversation_id, "send for non-open conversation; no optimistic insert");
                false
            }
        };
        if inserted {
            self.emit_active();
        }

        if !self.network_enabled() {
            self.fail_provisional(&conversation_id, &temp_id, "network disabled".to_string());
            return;
        }
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = backend.send_message(&receiver_id, &content).await;
            let _ = events.send(EngineEvent::SendFinished {
                conversation_id,
                temp_id,
                correlation_id,
                result,
            });
        });
    }

    fn retry_message(&mut self, message_id: String) {
        let Some(a) = self.active.as_mut() else {
            return;
        };
        let Some(msg) = a.store.get(&message_id) else {
            tracing::warn!(%message_id, "retry target missing; ignoring");
            return;
        };
        if !matches!(msg.status, MessageStatus::Failed { .. }) {
            return;
        }
        let receiver_id = msg.receiver_id.clone();
        let content = msg.content.clone();
        let conversation_id = a.id.clone();
        a.store.update_status(&message_id, MessageStatus::Sending);
        self.emit_active();

        if !self.network_enabled() {
            self.fail_provisional(&conversation_id, &message_id, "network disabled".to_string());
            return;
        }
        // Fresh correlation id: the retry is a new send attempt.
        let correlation_id = send::correlation_id(&self.me, &receiver_id, self.now());
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = backend.send_message(&receiver_id, &content).await;
            let _ = events.send(EngineEvent::SendFinished {
                conversation_id,
                temp_id: message_id,
                correlation_id,
                result,
            });
        });
    }

    fn fail_provisional(&mut self, conversation_id: &ConversationId, temp_id: &str, reason: String) {
        let failed = match self.active.as_mut() {
            Some(a) if &a.id == conversation_id => a
                .store
                .update_status(temp_id, MessageStatus::Failed { reason }),
            _ => false,
        };
        if failed {
            self.emit_active();
        }
    }

    fn on_send_finished(
        &mut self,
        conversation_id: ConversationId,
        temp_id: String,
        correlation_id: String,
        result: Result<Message, SyncError>,
    ) {
        match result {
            Ok(mut confirmed) => {
                // The REST contract doesn't echo the correlation id; carry
                // it over so later duplicate suppression can key on it.
                confirmed.correlation_id = Some(correlation_id);
                let reconciled = match self.active.as_mut() {
                    Some(a) if a.id == conversation_id => {
                        a.store.reconcile_temporary(&temp_id, confirmed);
                        true
                    }
                    _ => {
                        // The view moved on while the send was in flight.
                        // The server owns the truth now; nothing to patch.
                        tracing::debug!(%conversation_id, "send confirmed after view changed");
                        false
                    }
                };
                if reconciled {
                    self.persist_active_window();
                    self.refresh_preview_from_active();
                    self.emit_active();
                }
            }
            Err(e) => {
                self.fail_provisional(&conversation_id, &temp_id, e.to_string());
                self.emit_failure("send", &e);
            }
        }
    }

    // ----- backward pagination -----

    fn load_older(&mut self) {
        let Some(a) = &self.active else { return };
        let conversation_id = a.id.clone();
        let other_user_id = a.other_user_id.clone();
        let before_ts = a.store.oldest_timestamp();

        if !self.network_enabled() {
            return;
        }
        if !self.pagination.begin(&conversation_id) {
            tracing::debug!(%conversation_id, "older-page load already in flight");
            return;
        }
        self.emit_active();

        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        let limit = self.config.page_size;
        self.runtime.spawn(async move {
            let result = backend.fetch_messages(&other_user_id, limit, before_ts).await;
            let _ = events.send(EngineEvent::OlderPageFetched {
                conversation_id,
                result,
            });
        });
    }

    fn on_older_page(
        &mut self,
        conversation_id: ConversationId,
        result: Result<Vec<Message>, SyncError>,
    ) {
        self.pagination.finish(&conversation_id);
        match result {
            Ok(page) => {
                let has_more = self.pagination.has_more(page.len());
                let Some(a) = self.active.as_mut() else { return };
                if a.id != conversation_id {
                    tracing::debug!(%conversation_id, "older page for stale conversation dropped");
                    return;
                }
                a.store.prepend_older(page);
                a.has_more = has_more;
                self.persist_active_window();
                self.emit_active();
            }
            Err(e) => {
                self.emit_failure("load-older", &e);
                self.emit_active();
            }
        }
    }

    // ----- social graph -----

    fn refresh_social(&mut self, collection: SocialCollection) {
        let outcome = self
            .social
            .hydrate(&self.cache, self.clock.as_ref(), collection);
        if outcome.servable() {
            self.emit_social(collection);
        }
        let need_fetch = !outcome.servable() || outcome.wants_background_refresh();
        if need_fetch && self.network_enabled() {
            self.spawn_social_fetch(collection, outcome.since_version);
        }
    }

    fn spawn_social_fetch(&self, collection: SocialCollection, since_version: Option<String>) {
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        let started_at = self.now();
        self.runtime.spawn(async move {
            let since = since_version.as_deref();
            let result = match collection {
                SocialCollection::Friends => {
                    backend.fetch_friends(since).await.map(SocialResponse::Friends)
                }
                SocialCollection::FriendIds => backend
                    .fetch_friend_ids(since)
                    .await
                    .map(SocialResponse::FriendIds),
                SocialCollection::Requests(kind) => backend
                    .fetch_friend_requests(kind, since)
                    .await
                    .map(|resp| SocialResponse::Requests(kind, resp)),
            };
            let _ = events.send(EngineEvent::SocialFetched {
                started_at,
                since_version,
                result,
            });
        });
    }

    fn on_social_fetched(&mut self, started_at: Timestamp, result: Result<SocialResponse, SyncError>) {
        match result {
            Ok(response) => {
                let collection = match &response {
                    SocialResponse::Friends(_) => SocialCollection::Friends,
                    SocialResponse::FriendIds(_) => SocialCollection::FriendIds,
                    SocialResponse::Requests(kind, _) => SocialCollection::Requests(*kind),
                };
                if self
                    .social
                    .apply(&mut self.cache, self.clock.as_ref(), response, started_at)
                {
                    self.emit_social(collection);
                }
            }
            Err(e) => self.emit_failure("social", &e),
        }
    }

    fn send_friend_request(&mut self, to_user_id: String) {
        let temp = FriendRequest {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            from_user_id: self.me.clone(),
            to_user_id: to_user_id.clone(),
            created_at: self.now(),
        };
        let temp_request_id = temp.id.clone();
        self.social.note_outgoing_request(temp);
        self.emit_social(SocialCollection::Requests(FriendRequestKind::Outgoing));

        if !self.network_enabled() {
            return;
        }
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = backend.send_friend_request(&to_user_id).await;
            let _ = events.send(EngineEvent::FriendRequestSent {
                temp_request_id,
                result,
            });
        });
    }

    fn on_friend_request_sent(
        &mut self,
        temp_request_id: String,
        result: Result<FriendRequest, SyncError>,
    ) {
        match result {
            Ok(confirmed) => {
                self.social.forget_outgoing_request(&temp_request_id);
                self.social.note_outgoing_request(confirmed);
            }
            Err(e) => {
                // Never leave a phantom request behind.
                self.social.forget_outgoing_request(&temp_request_id);
                self.emit_failure("friend-request", &e);
            }
        }
        self.emit_social(SocialCollection::Requests(FriendRequestKind::Outgoing));
    }

    fn respond_friend_request(&mut self, request_id: String, accept: bool) {
        if !self.network_enabled() {
            return;
        }
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = backend.respond_friend_request(&request_id, accept).await;
            let _ = events.send(EngineEvent::FriendMutationFinished {
                context: "respond-request",
                result,
            });
        });
    }

    fn remove_friend(&mut self, user_id: String) {
        if !self.network_enabled() {
            return;
        }
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = backend.remove_friend(&user_id).await;
            let _ = events.send(EngineEvent::FriendMutationFinished {
                context: "remove-friend",
                result,
            });
        });
    }

    fn on_friend_mutation(&mut self, context: &'static str, result: Result<(), SyncError>) {
        match result {
            Ok(()) => {
                // Graph changed server-side: delete (not just stale-mark)
                // the affected entries and refetch everything.
                self.social.invalidate_after_mutation(&mut self.cache);
                if self.network_enabled() {
                    self.spawn_social_fetch(SocialCollection::Friends, None);
                    self.spawn_social_fetch(SocialCollection::FriendIds, None);
                    self.spawn_social_fetch(
                        SocialCollection::Requests(FriendRequestKind::Incoming),
                        None,
                    );
                    self.spawn_social_fetch(
                        SocialCollection::Requests(FriendRequestKind::Outgoing),
                        None,
                    );
                }
            }
            Err(e) => self.emit_failure(context, &e),
        }
    }

    // ----- lifecycle -----

    fn app_backgrounded(&mut self) {
        self.backgrounded = true;
        self.background_token += 1;
        let background_token = self.background_token;
        let grace = Duration::from_secs(self.config.background_grace_secs);
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = events.send(EngineEvent::BackgroundGraceElapsed { background_token });
        });
    }

    fn app_foregrounded(&mut self) {
        self.backgrounded = false;
        // Invalidate any pending grace timer.
        self.background_token += 1;
        if !self.network_enabled() {
            return;
        }
        if let Some(a) = &self.active {
            if !self.listeners.is_live(&a.id) {
                let cid = a.id.clone();
                let seed = self.live_cursor_seed();
                self.listeners.attach(&cid, seed);
            }
        }
    }

    fn clear_all(&mut self) {
        tracing::info!("clearing all sync state");
        self.listeners.clear();
        self.pagination.reset();
        self.social.clear();
        self.cache.clear();
        self.conversations.clear();
        self.active = None;
        self.emit_conversations();
        self.emit_active();
        self.emit_social(SocialCollection::Friends);
        self.emit_social(SocialCollection::FriendIds);
        self.emit_social(SocialCollection::Requests(FriendRequestKind::Incoming));
        self.emit_social(SocialCollection::Requests(FriendRequestKind::Outgoing));
    }

    // ----- plumbing -----

    fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    fn network_enabled(&self) -> bool {
        self.config.network_enabled()
    }

    /// Persist the open conversation's window. Only server-confirmed
    /// messages land in the cache; provisional entries must never outlive
    /// the session through a cache read.
    fn persist_active_window(&mut self) {
        let Some(a) = &self.active else { return };
        let sent: Vec<&Message> = a
            .store
            .messages()
            .iter()
            .filter(|m| m.status == MessageStatus::Sent)
            .collect();
        let key = keys::messages(&a.id);
        let now = self.now();
        self.cache.put(&key, &sent, now, None);
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.rev
    }

    fn emit_conversations(&mut self) {
        let rev = self.next_rev();
        let _ = self.updates.send(SyncUpdate::ConversationsChanged {
            rev,
            conversations: self.conversations.clone(),
        });
    }

    fn emit_active(&mut self) {
        let view = self.active.as_ref().map(|a| ConversationView {
            conversation_id: a.id.clone(),
            other_user_id: a.other_user_id.clone(),
            messages: a.store.messages().to_vec(),
            has_more: a.has_more,
            loading_older: self.pagination.is_loading(&a.id),
        });
        let rev = self.next_rev();
        let _ = self
            .updates
            .send(SyncUpdate::ActiveConversationChanged { rev, view });
    }

    fn emit_social(&mut self, collection: SocialCollection) {
        let rev = self.next_rev();
        let update = match collection {
            SocialCollection::Friends => SyncUpdate::FriendsChanged {
                rev,
                friends: self.social.friends().to_vec(),
            },
            SocialCollection::FriendIds => SyncUpdate::FriendIdsChanged {
                rev,
                friend_ids: self.social.friend_ids().to_vec(),
            },
            SocialCollection::Requests(kind) => SyncUpdate::FriendRequestsChanged {
                rev,
                kind,
                requests: self.social.requests(kind).to_vec(),
            },
        };
        let _ = self.updates.send(update);
    }

    fn emit_failure(&mut self, context: &'static str, error: &SyncError) {
        let (error, retryable) = error.for_update();
        self.emit_failure_raw(context, error, retryable);
    }

    fn emit_failure_raw(&mut self, context: &'static str, error: String, retryable: bool) {
        let rev = self.next_rev();
        let _ = self.updates.send(SyncUpdate::SyncFailed {
            rev,
            context,
            error,
            retryable,
        });
    }
}
