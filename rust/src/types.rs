use std::fmt;

use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type MessageId = String;

/// Unix milliseconds.
pub type Timestamp = i64;

/// Identifier of a two-party thread. Deterministically derived from the
/// sorted pair of participant ids, so two clients never mint two different
/// ids for the same pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn for_pair(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{lo}:{hi}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participant_ids: [UserId; 2],
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub last_message_time: Timestamp,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// The participant that isn't `me`. Falls back to the first participant
    /// for a note-to-self thread.
    pub fn other_participant(&self, me: &str) -> &str {
        self.participant_ids
            .iter()
            .find(|p| p.as_str() != me)
            .unwrap_or(&self.participant_ids[0])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum MessageStatus {
    Sending,
    Sent,
    Failed { reason: String },
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Sending)
    }

    fn sent() -> Self {
        Self::Sent
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: Timestamp,
    // Server payloads carry no status; anything the backend returns is sent.
    #[serde(default = "MessageStatus::sent")]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FriendRequestKind {
    Incoming,
    Outgoing,
}

impl FriendRequestKind {
    /// Value of the `type` query parameter, also used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: String,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        let a = ConversationId::for_pair("user-b", "user-a");
        let b = ConversationId::for_pair("user-a", "user-b");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "user-a:user-b");
    }

    #[test]
    fn other_participant_resolves_peer() {
        let convo = Conversation {
            id: ConversationId::for_pair("me", "them"),
            participant_ids: ["me".into(), "them".into()],
            last_message: String::new(),
            last_message_time: 0,
            unread_count: 0,
        };
        assert_eq!(convo.other_participant("me"), "them");
        assert_eq!(convo.other_participant("them"), "me");
    }

    #[test]
    fn server_message_defaults_to_sent() {
        let json = r#"{
            "id": "m1",
            "conversationId": "a:b",
            "senderId": "a",
            "receiverId": "b",
            "content": "hi",
            "timestamp": 1000
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(msg.correlation_id.is_none());
    }
}
