use crate::backend::VersionedResponse;
use crate::error::{SyncError, SyncResult};
use crate::types::{
    Conversation, ConversationId, Friend, FriendRequest, FriendRequestKind, Message, UserId,
};

/// State pushed to the app shell. Each update carries a monotonically
/// increasing `rev` so a renderer can discard out-of-date payloads.
#[derive(Debug, Clone)]
pub enum SyncUpdate {
    ConversationsChanged {
        rev: u64,
        conversations: Vec<Conversation>,
    },
    ActiveConversationChanged {
        rev: u64,
        view: Option<ConversationView>,
    },
    FriendsChanged {
        rev: u64,
        friends: Vec<Friend>,
    },
    FriendIdsChanged {
        rev: u64,
        friend_ids: Vec<UserId>,
    },
    FriendRequestsChanged {
        rev: u64,
        kind: FriendRequestKind,
        requests: Vec<FriendRequest>,
    },
    /// A fetch or send failed in a way the UI should surface (retry
    /// affordance, sign-in prompt). Cache state is unaffected.
    SyncFailed {
        rev: u64,
        context: &'static str,
        error: String,
        retryable: bool,
    },
}

impl SyncUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            SyncUpdate::ConversationsChanged { rev, .. } => *rev,
            SyncUpdate::ActiveConversationChanged { rev, .. } => *rev,
            SyncUpdate::FriendsChanged { rev, .. } => *rev,
            SyncUpdate::FriendIdsChanged { rev, .. } => *rev,
            SyncUpdate::FriendRequestsChanged { rev, .. } => *rev,
            SyncUpdate::SyncFailed { rev, .. } => *rev,
        }
    }
}

/// Render model for the open conversation.
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub conversation_id: ConversationId,
    pub other_user_id: UserId,
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub loading_older: bool,
}

/// Results of engine-spawned async work, fed back into the actor over the
/// internal channel so all state mutation stays serialized.
#[derive(Debug)]
pub enum EngineEvent {
    ConversationsFetched {
        started_at: i64,
        result: SyncResult<Vec<Conversation>>,
    },
    /// Initial (forward) message window for a freshly opened conversation.
    MessagesFetched {
        conversation_id: ConversationId,
        open_token: u64,
        result: SyncResult<Vec<Message>>,
    },
    OlderPageFetched {
        conversation_id: ConversationId,
        result: SyncResult<Vec<Message>>,
    },
    ListenerBatch {
        conversation_id: ConversationId,
        attach_token: u64,
        batch: Vec<Message>,
    },
    ListenerFailed {
        conversation_id: ConversationId,
        attach_token: u64,
        error: String,
    },
    SendFinished {
        conversation_id: ConversationId,
        temp_id: String,
        correlation_id: String,
        result: SyncResult<Message>,
    },
    SocialFetched {
        started_at: i64,
        since_version: Option<String>,
        result: SyncResult<SocialResponse>,
    },
    FriendRequestSent {
        temp_request_id: String,
        result: SyncResult<FriendRequest>,
    },
    /// Accept/reject/remove round-trip finished; on success the affected
    /// cache entries have to be invalidated and refetched.
    FriendMutationFinished {
        context: &'static str,
        result: SyncResult<()>,
    },
    /// The background grace period elapsed; detach live subscriptions if
    /// the app is still backgrounded.
    BackgroundGraceElapsed {
        background_token: u64,
    },
}

/// Which social collection a [`EngineEvent::SocialFetched`] belongs to.
#[derive(Debug)]
pub enum SocialResponse {
    Friends(VersionedResponse<Friend>),
    FriendIds(VersionedResponse<UserId>),
    Requests(FriendRequestKind, VersionedResponse<FriendRequest>),
}

impl SocialResponse {
    pub fn collection_tag(&self) -> &'static str {
        match self {
            SocialResponse::Friends(_) => "friends",
            SocialResponse::FriendIds(_) => "friend-ids",
            SocialResponse::Requests(..) => "friend-requests",
        }
    }
}

impl SyncError {
    /// Shorthand used when errors cross the internal event channel.
    pub fn for_update(&self) -> (String, bool) {
        (self.to_string(), self.is_retryable())
    }
}
