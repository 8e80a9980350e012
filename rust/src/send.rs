//! Optimistic sending: provisional message synthesis and correlation ids.
//!
//! A send inserts a provisional `Sending` message before any network call
//! resolves; the engine later reconciles it to the server-confirmed message
//! or degrades it to `Failed` (visible, retryable, never silently dropped).
//! Exactly one terminal state per correlation id.

use crate::types::{ConversationId, Message, MessageStatus, Timestamp};

/// Unique enough to never collide across rapid sends from one device:
/// participants + wall clock + random nonce.
pub fn correlation_id(sender_id: &str, receiver_id: &str, now_ms: Timestamp) -> String {
    let nonce: u64 = rand::random();
    format!("{sender_id}:{receiver_id}:{now_ms}:{nonce:016x}")
}

/// Synthesize the provisional message for an optimistic send. Its id is a
/// throwaway local id; the server-confirmed message replaces it in place.
pub fn provisional_message(
    sender_id: &str,
    receiver_id: &str,
    content: &str,
    now_ms: Timestamp,
) -> Message {
    Message {
        id: format!("local-{}", uuid::Uuid::new_v4()),
        conversation_id: ConversationId::for_pair(sender_id, receiver_id),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        content: content.to_string(),
        timestamp: now_ms,
        status: MessageStatus::Sending,
        correlation_id: Some(correlation_id(sender_id, receiver_id, now_ms)),
    }
}
