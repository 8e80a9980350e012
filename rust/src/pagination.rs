//! Backward pagination: bounded pages of messages strictly older than the
//! oldest message held, cursored by timestamp so concurrent inserts at the
//! head never shift the window.

use std::collections::HashSet;

use crate::types::ConversationId;

#[derive(Debug)]
pub struct PaginationEngine {
    page_size: usize,
    in_flight: HashSet<ConversationId>,
}

impl PaginationEngine {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            in_flight: HashSet::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_loading(&self, conversation_id: &ConversationId) -> bool {
        self.in_flight.contains(conversation_id)
    }

    /// Claim the in-flight slot for `conversation_id`. Returns false when a
    /// load is already running, so repeated calls while in flight never
    /// issue duplicate requests.
    pub fn begin(&mut self, conversation_id: &ConversationId) -> bool {
        self.in_flight.insert(conversation_id.clone())
    }

    pub fn finish(&mut self, conversation_id: &ConversationId) {
        self.in_flight.remove(conversation_id);
    }

    pub fn reset(&mut self) {
        self.in_flight.clear();
    }

    /// Heuristic, not a guarantee: an exactly-full page suggests more
    /// history. Callers tolerate one no-op load at the true boundary.
    pub fn has_more(&self, page_len: usize) -> bool {
        page_len == self.page_size
    }
}
