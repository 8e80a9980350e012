//! Reducer-shaped state for the open conversation's message list.
//!
//! Every transition is safe to dispatch out of order: duplicates are
//! suppressed (by id and by correlation id), ordering is enforced at merge
//! time, and a transition that changes nothing reports `false` so callers
//! can skip redundant UI work.

use std::collections::HashSet;

use crate::types::{Message, MessageStatus, Timestamp};

#[derive(Debug, Default)]
pub struct MessageStore {
    // Invariants: non-decreasing timestamp order; no duplicate ids.
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        self.messages.last().map(|m| m.timestamp)
    }

    pub fn oldest_timestamp(&self) -> Option<Timestamp> {
        self.messages.first().map(|m| m.timestamp)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Wholesale replacement. No-op when the new list is already what we
    /// hold, compared by length and tail-element id (cheap identity check,
    /// avoids redundant downstream work). The incoming list is normalized
    /// first; pages arrive newest-first off the wire, so comparing before
    /// sorting would match the wrong end.
    pub fn set_messages(&mut self, mut list: Vec<Message>) -> bool {
        sort_chronological(&mut list);
        dedup_by_id(&mut list);
        let same = list.len() == self.messages.len()
            && list.last().map(|m| m.id.as_str()) == self.messages.last().map(|m| m.id.as_str());
        if same {
            return false;
        }
        self.messages = list;
        true
    }

    /// Insert one message at its chronological position. No-op when a
    /// message with the same id or the same correlation id already exists.
    pub fn append_message(&mut self, msg: Message) -> bool {
        if self.contains_id(&msg.id) {
            return false;
        }
        if msg.correlation_id.is_some()
            && self
                .messages
                .iter()
                .any(|m| m.correlation_id == msg.correlation_id)
        {
            return false;
        }
        // A live event arriving late relative to a paginated fetch still
        // lands at its correct chronological position, never blindly at
        // the end.
        let pos = self
            .messages
            .partition_point(|m| m.timestamp <= msg.timestamp);
        self.messages.insert(pos, msg);
        true
    }

    /// Merge an older page, dropping anything already present. Returns how
    /// many messages were actually inserted. The survivors are merged at
    /// their chronological positions rather than blindly prepended: a live
    /// event that landed below the page boundary while the page was in
    /// flight must not end up above the page.
    pub fn prepend_older(&mut self, older: Vec<Message>) -> usize {
        let present: HashSet<&str> = self.messages.iter().map(|m| m.id.as_str()).collect();
        let mut fresh: Vec<Message> = older
            .into_iter()
            .filter(|m| !present.contains(m.id.as_str()))
            .collect();
        drop(present);
        if fresh.is_empty() {
            return 0;
        }
        dedup_by_id(&mut fresh);
        let inserted = fresh.len();
        self.messages.append(&mut fresh);
        sort_chronological(&mut self.messages);
        inserted
    }

    /// No-op when the message is absent or already carries that status.
    pub fn update_status(&mut self, id: &str, status: MessageStatus) -> bool {
        let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if msg.status == status {
            return false;
        }
        msg.status = status;
        true
    }

    /// Swap the provisional entry `temp_id` for the server-confirmed
    /// message, in place, marked sent. A missing `temp_id` is logged and
    /// ignored (the view may have been replaced underneath a slow send).
    /// If the confirmed id already arrived through the live channel, the
    /// provisional entry is simply dropped.
    pub fn reconcile_temporary(&mut self, temp_id: &str, mut final_message: Message) -> bool {
        let Some(pos) = self.messages.iter().position(|m| m.id == temp_id) else {
            tracing::warn!(temp_id, "reconcile target missing; ignoring");
            return false;
        };
        final_message.status = MessageStatus::Sent;
        if self
            .messages
            .iter()
            .any(|m| m.id == final_message.id && m.id != temp_id)
        {
            self.messages.remove(pos);
        } else {
            self.messages[pos] = final_message;
        }
        true
    }
}

fn sort_chronological(list: &mut [Message]) {
    // Stable by (timestamp, id) so equal-timestamp messages order the same
    // way on every client.
    list.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

fn dedup_by_id(list: &mut Vec<Message>) {
    let mut seen = HashSet::new();
    list.retain(|m| seen.insert(m.id.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationId;

    fn msg(id: &str, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: ConversationId::for_pair("a", "b"),
            sender_id: "a".into(),
            receiver_id: "b".into(),
            content: format!("msg {id}"),
            timestamp: ts,
            status: MessageStatus::Sent,
            correlation_id: None,
        }
    }

    fn msg_with_correlation(id: &str, ts: i64, corr: &str) -> Message {
        Message {
            correlation_id: Some(corr.to_string()),
            ..msg(id, ts)
        }
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn append_dedupes_by_id_and_correlation_id() {
        let mut store = MessageStore::new();
        assert!(store.append_message(msg("m1", 100)));
        assert!(!store.append_message(msg("m1", 100)));
        assert!(store.append_message(msg_with_correlation("m2", 200, "c1")));
        assert!(!store.append_message(msg_with_correlation("m3", 300, "c1")));
        assert_eq!(ids(&store), vec!["m1", "m2"]);
    }

    #[test]
    fn late_event_lands_at_chronological_position() {
        let mut store = MessageStore::new();
        store.append_message(msg("m1", 100));
        store.append_message(msg("m3", 300));
        store.append_message(msg("m2", 200));
        assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn prepend_filters_known_ids_and_keeps_order() {
        let mut store = MessageStore::new();
        store.set_messages(vec![msg("m3", 300), msg("m4", 400)]);

        let inserted = store.prepend_older(vec![msg("m2", 200), msg("m3", 300), msg("m1", 100)]);
        assert_eq!(inserted, 2);
        assert_eq!(ids(&store), vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn prepend_merges_around_a_late_live_event() {
        let mut store = MessageStore::new();
        store.set_messages(vec![msg("m4", 400)]);
        // A live event older than the page boundary arrived while the
        // older page was still in flight.
        store.append_message(msg("m0", 350));

        assert_eq!(store.prepend_older(vec![msg("m3", 390)]), 1);
        assert_eq!(ids(&store), vec!["m0", "m3", "m4"]);
        let ts: Vec<i64> = store.messages().iter().map(|m| m.timestamp).collect();
        assert_eq!(ts, vec![350, 390, 400]);
    }

    #[test]
    fn prepend_of_fully_known_page_is_a_noop() {
        let mut store = MessageStore::new();
        store.set_messages(vec![msg("m1", 100)]);
        assert_eq!(store.prepend_older(vec![msg("m1", 100)]), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn set_messages_is_noop_for_identical_list() {
        let mut store = MessageStore::new();
        assert!(store.set_messages(vec![msg("m1", 100), msg("m2", 200)]));
        assert!(!store.set_messages(vec![msg("m1", 100), msg("m2", 200)]));
        assert!(store.set_messages(vec![msg("m1", 100), msg("m3", 300)]));
    }

    #[test]
    fn set_messages_is_noop_for_the_same_page_newest_first() {
        let mut store = MessageStore::new();
        assert!(store.set_messages(vec![msg("m2", 200), msg("m1", 100)]));
        assert!(!store.set_messages(vec![msg("m2", 200), msg("m1", 100)]));
        assert_eq!(ids(&store), vec!["m1", "m2"]);
    }

    #[test]
    fn update_status_noops_on_missing_or_same() {
        let mut store = MessageStore::new();
        store.append_message(msg("m1", 100));
        assert!(!store.update_status("nope", MessageStatus::Sent));
        assert!(!store.update_status("m1", MessageStatus::Sent));
        assert!(store.update_status(
            "m1",
            MessageStatus::Failed {
                reason: "offline".into()
            }
        ));
    }

    #[test]
    fn reconcile_replaces_in_place() {
        let mut store = MessageStore::new();
        let mut temp = msg_with_correlation("tmp-1", 100, "c1");
        temp.status = MessageStatus::Sending;
        store.append_message(temp);
        store.append_message(msg("m2", 200));

        let mut confirmed = msg_with_correlation("srv-1", 150, "c1");
        confirmed.status = MessageStatus::Sent;
        assert!(store.reconcile_temporary("tmp-1", confirmed));

        assert_eq!(ids(&store), vec!["srv-1", "m2"]);
        assert_eq!(store.get("srv-1").unwrap().status, MessageStatus::Sent);
    }

    #[test]
    fn reconcile_missing_temp_is_ignored() {
        let mut store = MessageStore::new();
        store.append_message(msg("m1", 100));
        assert!(!store.reconcile_temporary("tmp-gone", msg("srv-1", 150)));
        assert_eq!(ids(&store), vec!["m1"]);
    }

    #[test]
    fn reconcile_drops_temp_when_live_copy_arrived_first() {
        let mut store = MessageStore::new();
        let mut temp = msg("tmp-1", 100);
        temp.status = MessageStatus::Sending;
        store.append_message(temp);
        // The realtime channel delivered the confirmed message already.
        store.append_message(msg("srv-1", 150));

        assert!(store.reconcile_temporary("tmp-1", msg("srv-1", 150)));
        assert_eq!(ids(&store), vec!["srv-1"]);
    }

    #[test]
    fn no_duplicate_ids_under_mixed_operations() {
        let mut store = MessageStore::new();
        store.set_messages(vec![msg("m2", 200), msg("m3", 300)]);
        store.append_message(msg("m4", 400));
        store.append_message(msg("m3", 300));
        store.prepend_older(vec![msg("m1", 100), msg("m2", 200)]);

        let mut seen = HashSet::new();
        for m in store.messages() {
            assert!(seen.insert(m.id.clone()), "duplicate id {}", m.id);
        }
        let ts: Vec<i64> = store.messages().iter().map(|m| m.timestamp).collect();
        let mut sorted = ts.clone();
        sorted.sort();
        assert_eq!(ts, sorted);
    }
}
