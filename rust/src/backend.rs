//! Consumed backend contracts.
//!
//! The REST service and the real-time document store are external
//! collaborators; these traits are the seams the engine is written and
//! tested against. [`crate::http::HttpBackend`] is the production REST
//! binding; the production realtime binding lives in the app shell.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::SyncResult;
use crate::types::{
    Conversation, ConversationId, Friend, FriendRequest, FriendRequestKind, Message, UserId,
};

/// Outcome of a fetch that presented a version token.
#[derive(Clone, Debug)]
pub enum VersionedResponse<T> {
    /// The presented version is still current; keep the cached payload.
    Unchanged,
    Changed {
        items: Vec<T>,
        version: String,
        /// True when `items` is an increment to append to the cached
        /// collection rather than a full replacement. Server-decided; the
        /// client never infers it.
        delta_update: bool,
    },
}

/// Opaque credential source. Token acquisition is out of scope; the engine
/// only needs to know whether a credential exists right now.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Full chat-list fetch. This collection is full-replace-only; the
    /// backend exposes no version parameter for it.
    async fn fetch_conversations(&self) -> SyncResult<Vec<Conversation>>;

    /// Page of messages with `other_user_id`, newest first, strictly older
    /// than `before_ts` when given.
    async fn fetch_messages(
        &self,
        other_user_id: &str,
        limit: usize,
        before_ts: Option<i64>,
    ) -> SyncResult<Vec<Message>>;

    async fn send_message(&self, receiver_id: &str, content: &str) -> SyncResult<Message>;

    async fn fetch_friends(
        &self,
        since_version: Option<&str>,
    ) -> SyncResult<VersionedResponse<Friend>>;

    async fn fetch_friend_ids(
        &self,
        since_version: Option<&str>,
    ) -> SyncResult<VersionedResponse<UserId>>;

    async fn fetch_friend_requests(
        &self,
        kind: FriendRequestKind,
        since_version: Option<&str>,
    ) -> SyncResult<VersionedResponse<FriendRequest>>;

    async fn send_friend_request(&self, to_user_id: &str) -> SyncResult<FriendRequest>;

    async fn respond_friend_request(&self, request_id: &str, accept: bool) -> SyncResult<()>;

    async fn remove_friend(&self, user_id: &str) -> SyncResult<()>;
}

/// Batches of live messages for one conversation, ascending by timestamp.
pub type MessageBatchStream = BoxStream<'static, Vec<Message>>;

/// Real-time document store. One subscription per call; dropping the stream
/// cancels it.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Subscribe to messages in `conversation_id` strictly newer than
    /// `after_ts` (no lower bound when `None`), ordered ascending, each
    /// batch capped at `limit`.
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
        after_ts: Option<i64>,
        limit: usize,
    ) -> SyncResult<MessageBatchStream>;
}
