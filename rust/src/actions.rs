use crate::types::FriendRequestKind;

/// Everything the app shell can ask the engine to do.
#[derive(Debug, Clone)]
pub enum SyncAction {
    // Conversations
    OpenConversation { other_user_id: String },
    CloseConversation,
    RefreshConversations,
    SendMessage { receiver_id: String, content: String },
    RetryMessage { message_id: String },
    LoadOlderMessages,

    // Social graph
    RefreshFriends,
    RefreshFriendIds,
    RefreshFriendRequests { kind: FriendRequestKind },
    SendFriendRequest { to_user_id: String },
    RespondFriendRequest { request_id: String, accept: bool },
    RemoveFriend { user_id: String },

    // Lifecycle
    AppBackgrounded,
    AppForegrounded,
    /// Logout / account deletion: tear down subscriptions and wipe caches.
    ClearAll,
}

impl SyncAction {
    /// Log-safe action tag (never includes message content).
    pub fn tag(&self) -> &'static str {
        match self {
            SyncAction::OpenConversation { .. } => "OpenConversation",
            SyncAction::CloseConversation => "CloseConversation",
            SyncAction::RefreshConversations => "RefreshConversations",
            SyncAction::SendMessage { .. } => "SendMessage",
            SyncAction::RetryMessage { .. } => "RetryMessage",
            SyncAction::LoadOlderMessages => "LoadOlderMessages",

            SyncAction::RefreshFriends => "RefreshFriends",
            SyncAction::RefreshFriendIds => "RefreshFriendIds",
            SyncAction::RefreshFriendRequests { .. } => "RefreshFriendRequests",
            SyncAction::SendFriendRequest { .. } => "SendFriendRequest",
            SyncAction::RespondFriendRequest { .. } => "RespondFriendRequest",
            SyncAction::RemoveFriend { .. } => "RemoveFriend",

            SyncAction::AppBackgrounded => "AppBackgrounded",
            SyncAction::AppForegrounded => "AppForegrounded",
            SyncAction::ClearAll => "ClearAll",
        }
    }
}
