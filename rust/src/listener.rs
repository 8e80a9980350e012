//! Live-subscription management: at most one subscription per conversation,
//! a monotonically advancing cursor per conversation, and duplicate-free
//! merging of streamed batches into the message store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;

use crate::backend::RealtimeStore;
use crate::store::MessageStore;
use crate::types::{ConversationId, Message, MessageId, Timestamp};
use crate::updates::EngineEvent;

/// Resume point for a conversation's subscription.
///
/// Tracks the newest seen timestamp plus the ids observed *at* that
/// timestamp, so resuming excludes exactly what was seen rather than
/// applying timestamp-window arithmetic that assumes millisecond
/// granularity is never reused.
#[derive(Debug, Default)]
pub struct ListenerCursor {
    last_seen_ts: Option<Timestamp>,
    ids_at_last_seen: HashSet<MessageId>,
}

impl ListenerCursor {
    fn seeded(seed: Option<(Timestamp, Vec<MessageId>)>) -> Self {
        match seed {
            Some((ts, ids)) => Self {
                last_seen_ts: Some(ts),
                ids_at_last_seen: ids.into_iter().collect(),
            },
            None => Self::default(),
        }
    }

    pub fn last_seen_ts(&self) -> Option<Timestamp> {
        self.last_seen_ts
    }

    /// Defense in depth against redelivery: admit only what is strictly
    /// newer than the locally tracked high-water mark, or an unseen id at
    /// exactly that mark.
    pub fn admits(&self, msg: &Message) -> bool {
        match self.last_seen_ts {
            None => true,
            Some(ts) => {
                msg.timestamp > ts
                    || (msg.timestamp == ts && !self.ids_at_last_seen.contains(&msg.id))
            }
        }
    }

    /// Advance to the max timestamp observed. Never rewinds.
    pub fn advance(&mut self, msg: &Message) {
        match self.last_seen_ts {
            Some(ts) if msg.timestamp < ts => {}
            Some(ts) if msg.timestamp == ts => {
                self.ids_at_last_seen.insert(msg.id.clone());
            }
            _ => {
                self.last_seen_ts = Some(msg.timestamp);
                self.ids_at_last_seen.clear();
                self.ids_at_last_seen.insert(msg.id.clone());
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Attaching,
    Attached,
}

struct LiveSubscription {
    token: u64,
    phase: Phase,
    task: tokio::task::JoinHandle<()>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    Started { token: u64 },
    /// A subscription for this conversation is already attaching or
    /// attached; the call is a no-op (idempotent attach).
    AlreadyLive,
}

pub struct ListenerRegistry {
    realtime: Arc<dyn RealtimeStore>,
    events: flume::Sender<EngineEvent>,
    runtime: tokio::runtime::Handle,
    live_page_size: usize,
    initial_burst_limit: usize,

    subscriptions: HashMap<ConversationId, LiveSubscription>,
    cursors: HashMap<ConversationId, ListenerCursor>,
    active: Option<ConversationId>,
    next_token: u64,
}

impl ListenerRegistry {
    pub fn new(
        realtime: Arc<dyn RealtimeStore>,
        events: flume::Sender<EngineEvent>,
        runtime: tokio::runtime::Handle,
        live_page_size: usize,
        initial_burst_limit: usize,
    ) -> Self {
        Self {
            realtime,
            events,
            runtime,
            live_page_size,
            initial_burst_limit,
            subscriptions: HashMap::new(),
            cursors: HashMap::new(),
            active: None,
            next_token: 0,
        }
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    pub fn cursor(&self, conversation_id: &ConversationId) -> Option<&ListenerCursor> {
        self.cursors.get(conversation_id)
    }

    pub fn is_live(&self, conversation_id: &ConversationId) -> bool {
        self.subscriptions.contains_key(conversation_id)
    }

    /// True once the subscription's handshake batch has come back, i.e. the
    /// stream is known to be delivering rather than still connecting.
    pub fn is_attached(&self, conversation_id: &ConversationId) -> bool {
        matches!(
            self.subscriptions.get(conversation_id),
            Some(sub) if sub.phase == Phase::Attached
        )
    }

    /// Single source of truth for which subscription is authoritative.
    /// Switching always detaches the previous conversation's subscription;
    /// its cursor stays so a later re-attach resumes without re-reading.
    pub fn set_active(&mut self, conversation_id: Option<ConversationId>) {
        if self.active == conversation_id {
            return;
        }
        if let Some(prev) = self.active.take() {
            self.detach(&prev);
        }
        self.active = conversation_id;
    }

    /// Attach a subscription for `conversation_id`, resuming from the
    /// stored cursor, else from `seed` (newest cached message). With no
    /// cursor at all the subscription has no lower bound but an aggressive
    /// result cap (bounded initial burst).
    pub fn attach(
        &mut self,
        conversation_id: &ConversationId,
        seed: Option<(Timestamp, Vec<MessageId>)>,
    ) -> AttachOutcome {
        if self.subscriptions.contains_key(conversation_id) {
            tracing::debug!(%conversation_id, "attach ignored; subscription already live");
            return AttachOutcome::AlreadyLive;
        }

        let cursor = self
            .cursors
            .entry(conversation_id.clone())
            .or_insert_with(|| ListenerCursor::seeded(seed));
        let after_ts = cursor.last_seen_ts();
        let limit = if after_ts.is_none() {
            self.initial_burst_limit
        } else {
            self.live_page_size
        };

        self.next_token += 1;
        let token = self.next_token;
        let realtime = self.realtime.clone();
        let events = self.events.clone();
        let cid = conversation_id.clone();

        let task = self.runtime.spawn(async move {
            let stream = match realtime.subscribe(&cid, after_ts, limit).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = events.send(EngineEvent::ListenerFailed {
                        conversation_id: cid,
                        attach_token: token,
                        error: e.to_string(),
                    });
                    return;
                }
            };
            // Attach handshake: an empty batch moves the registry from
            // Attaching to Attached.
            let _ = events.send(EngineEvent::ListenerBatch {
                conversation_id: cid.clone(),
                attach_token: token,
                batch: vec![],
            });
            let mut stream = stream;
            while let Some(batch) = stream.next().await {
                if events
                    .send(EngineEvent::ListenerBatch {
                        conversation_id: cid.clone(),
                        attach_token: token,
                        batch,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        self.subscriptions.insert(
            conversation_id.clone(),
            LiveSubscription {
                token,
                phase: Phase::Attaching,
                task,
            },
        );
        tracing::debug!(%conversation_id, token, ?after_ts, "listener attaching");
        AttachOutcome::Started { token }
    }

    /// Unsubscribe. The cursor is deliberately kept so a re-attach resumes
    /// past already-seen data.
    pub fn detach(&mut self, conversation_id: &ConversationId) {
        if let Some(sub) = self.subscriptions.remove(conversation_id) {
            sub.task.abort();
            tracing::debug!(%conversation_id, token = sub.token, "listener detached");
        }
    }

    /// Teardown on backgrounding: all subscriptions go, cursors stay.
    pub fn detach_all(&mut self) {
        let ids: Vec<ConversationId> = self.subscriptions.keys().cloned().collect();
        for id in ids {
            self.detach(&id);
        }
    }

    /// Full teardown on logout: subscriptions, cursors and the active
    /// conversation are all dropped. The only path that rewinds cursors.
    pub fn clear(&mut self) {
        self.detach_all();
        self.cursors.clear();
        self.active = None;
    }

    /// Merge an inbound batch into `store`. Returns how many messages were
    /// actually merged. Batches from a stale attach (token mismatch) or for
    /// a conversation that is no longer active are dropped wholesale.
    pub fn handle_batch(
        &mut self,
        conversation_id: &ConversationId,
        attach_token: u64,
        batch: Vec<Message>,
        store: &mut MessageStore,
    ) -> usize {
        let Some(sub) = self.subscriptions.get_mut(conversation_id) else {
            tracing::debug!(%conversation_id, attach_token, "batch from detached listener dropped");
            return 0;
        };
        if sub.token != attach_token {
            tracing::debug!(%conversation_id, attach_token, "batch from stale attach dropped");
            return 0;
        }
        sub.phase = Phase::Attached;

        if self.active.as_ref() != Some(conversation_id) {
            tracing::debug!(%conversation_id, "batch for non-active conversation dropped");
            return 0;
        }

        let cursor = self.cursors.entry(conversation_id.clone()).or_default();
        // Merge in timestamp order; the cursor guard assumes ascending input.
        let mut batch = batch;
        batch.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        let mut merged = 0;
        for msg in batch {
            if cursor.admits(&msg) && store.append_message(msg.clone()) {
                merged += 1;
            }
            cursor.advance(&msg);
        }
        merged
    }

    /// True when the failure belongs to the current attach; the engine may
    /// then decide whether to re-attach.
    pub fn handle_failure(&mut self, conversation_id: &ConversationId, attach_token: u64) -> bool {
        match self.subscriptions.get(conversation_id) {
            Some(sub) if sub.token == attach_token => {
                self.detach(conversation_id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncResult;
    use crate::types::MessageStatus;
    use async_trait::async_trait;

    fn msg(id: &str, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: ConversationId::for_pair("a", "b"),
            sender_id: "b".into(),
            receiver_id: "a".into(),
            content: "hi".into(),
            timestamp: ts,
            status: MessageStatus::Sent,
            correlation_id: None,
        }
    }

    struct SilentRealtime;

    #[async_trait]
    impl RealtimeStore for SilentRealtime {
        async fn subscribe(
            &self,
            _conversation_id: &ConversationId,
            _after_ts: Option<i64>,
            _limit: usize,
        ) -> SyncResult<crate::backend::MessageBatchStream> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    fn registry(
        runtime: &tokio::runtime::Runtime,
    ) -> (ListenerRegistry, flume::Receiver<EngineEvent>) {
        let (tx, rx) = flume::unbounded();
        let reg = ListenerRegistry::new(
            Arc::new(SilentRealtime),
            tx,
            runtime.handle().clone(),
            25,
            50,
        );
        (reg, rx)
    }

    #[test]
    fn attach_is_idempotent() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (mut reg, _rx) = registry(&rt);
        let cid = ConversationId::for_pair("a", "b");
        reg.set_active(Some(cid.clone()));

        let first = reg.attach(&cid, Some((100, vec!["m1".into()])));
        assert!(matches!(first, AttachOutcome::Started { .. }));
        assert_eq!(reg.attach(&cid, None), AttachOutcome::AlreadyLive);
        assert!(reg.is_live(&cid));
    }

    #[test]
    fn handshake_batch_moves_attaching_to_attached() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (mut reg, _rx) = registry(&rt);
        let cid = ConversationId::for_pair("a", "b");
        reg.set_active(Some(cid.clone()));
        let AttachOutcome::Started { token } = reg.attach(&cid, None) else {
            panic!("attach failed");
        };
        assert!(reg.is_live(&cid));
        assert!(!reg.is_attached(&cid));

        let mut store = MessageStore::new();
        reg.handle_batch(&cid, token, vec![], &mut store);
        assert!(reg.is_attached(&cid));

        reg.detach(&cid);
        assert!(!reg.is_attached(&cid));
    }

    #[test]
    fn switching_active_detaches_previous() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (mut reg, _rx) = registry(&rt);
        let ab = ConversationId::for_pair("a", "b");
        let ac = ConversationId::for_pair("a", "c");

        reg.set_active(Some(ab.clone()));
        reg.attach(&ab, Some((100, vec![])));
        reg.set_active(Some(ac.clone()));
        assert!(!reg.is_live(&ab));
        // Cursor survives the detach for a later resume.
        assert_eq!(reg.cursor(&ab).unwrap().last_seen_ts(), Some(100));
    }

    #[test]
    fn stale_token_batches_are_dropped() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (mut reg, _rx) = registry(&rt);
        let cid = ConversationId::for_pair("a", "b");
        reg.set_active(Some(cid.clone()));
        let AttachOutcome::Started { token } = reg.attach(&cid, None) else {
            panic!("attach failed");
        };

        let mut store = MessageStore::new();
        assert_eq!(
            reg.handle_batch(&cid, token + 99, vec![msg("m1", 100)], &mut store),
            0
        );
        assert_eq!(
            reg.handle_batch(&cid, token, vec![msg("m1", 100)], &mut store),
            1
        );
    }

    #[test]
    fn non_active_batches_are_dropped() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (mut reg, _rx) = registry(&rt);
        let ab = ConversationId::for_pair("a", "b");
        reg.set_active(Some(ab.clone()));
        let AttachOutcome::Started { token } = reg.attach(&ab, None) else {
            panic!("attach failed");
        };
        // Navigation away makes ab non-authoritative, but leave the
        // subscription entry in place by clearing active directly.
        reg.active = None;

        let mut store = MessageStore::new();
        assert_eq!(reg.handle_batch(&ab, token, vec![msg("m1", 100)], &mut store), 0);
    }

    #[test]
    fn cursor_tracks_max_timestamp_regardless_of_delivery_order() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (mut reg, _rx) = registry(&rt);
        let cid = ConversationId::for_pair("a", "b");
        reg.set_active(Some(cid.clone()));
        let AttachOutcome::Started { token } = reg.attach(&cid, None) else {
            panic!("attach failed");
        };

        let mut store = MessageStore::new();
        reg.handle_batch(&cid, token, vec![msg("m3", 300), msg("m1", 100)], &mut store);
        reg.handle_batch(&cid, token, vec![msg("m2", 200)], &mut store);

        assert_eq!(reg.cursor(&cid).unwrap().last_seen_ts(), Some(300));
        // m2 arrived below the high-water mark: observed but not merged.
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn redelivered_messages_are_not_merged_twice() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (mut reg, _rx) = registry(&rt);
        let cid = ConversationId::for_pair("a", "b");
        reg.set_active(Some(cid.clone()));
        let AttachOutcome::Started { token } = reg.attach(&cid, None) else {
            panic!("attach failed");
        };

        let mut store = MessageStore::new();
        assert_eq!(reg.handle_batch(&cid, token, vec![msg("m1", 100)], &mut store), 1);
        assert_eq!(reg.handle_batch(&cid, token, vec![msg("m1", 100)], &mut store), 0);
        // A different message at the same timestamp is still admitted.
        assert_eq!(reg.handle_batch(&cid, token, vec![msg("m2", 100)], &mut store), 1);
    }

    #[test]
    fn clear_rewinds_cursors_but_detach_does_not() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (mut reg, _rx) = registry(&rt);
        let cid = ConversationId::for_pair("a", "b");
        reg.set_active(Some(cid.clone()));
        reg.attach(&cid, Some((500, vec![])));

        reg.detach(&cid);
        assert_eq!(reg.cursor(&cid).unwrap().last_seen_ts(), Some(500));

        reg.clear();
        assert!(reg.cursor(&cid).is_none());
        assert!(reg.active().is_none());
    }
}
