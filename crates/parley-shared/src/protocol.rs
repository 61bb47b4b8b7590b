use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::*;
use crate::types::*;

// ---------------------------------------------------------------------------
// Bus events
// ---------------------------------------------------------------------------

/// Row-level change kind, mirrored from the store mutation that produced it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// Body of a bus event. Every payload is fully denormalized so that
/// receivers can render it without another round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// A channel message or a direct message, with its author snapshot.
    Message(MessageWithAuthor),

    Channel(Channel),
    ChannelRemoved {
        server_id: ServerId,
        channel_id: ChannelId,
    },

    /// Published to the owner's profile topic on creation and to the
    /// server topic on rename.
    Server(Server),
    ServerRemoved {
        server_id: ServerId,
    },

    MemberJoined(Member),
    MemberLeft {
        server_id: ServerId,
        profile_id: ProfileId,
    },

    FriendRequestReceived(FriendRequestView),
    FriendRequestSent(FriendRequestView),
    /// A rejected request, sent to its sender.
    FriendRequestResolved(FriendRequestView),
    /// An accepted request with the conversation it opened. The `other`
    /// side of `conversation` is relative to the receiving profile topic.
    FriendRequestAccepted {
        request: FriendRequestView,
        conversation: ConversationView,
    },
}

/// A single event as it leaves the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusEvent {
    pub topic: Topic,
    /// Monotonically increasing per topic, starting at 1.
    pub seq: u64,
    pub kind: EventKind,
    pub payload: EventPayload,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// WebSocket frames
// ---------------------------------------------------------------------------

/// Frames a client sends over the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topics: Vec<Topic> },
    Unsubscribe { topics: Vec<Topic> },
    Ping,
}

/// Frames the server sends over the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Event(BusEvent),
    Subscribed { topic: Topic },
    Unsubscribed { topic: Topic },
    Denied { topic: Topic, reason: String },
    /// `dropped` events were discarded for this subscriber; re-fetch the topic.
    Lagged { topic: Topic, dropped: u64 },
    Pong,
    Error { reason: String },
}

// ---------------------------------------------------------------------------
// HTTP request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateServerRequest {
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UpdateServerRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}

fn default_channel_kind() -> ChannelKind {
    ChannelKind::Text
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default = "default_channel_kind")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<ChannelKind>,
}

/// Exactly one of `channel_id` / `conversation_id` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_mime: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditMessageRequest {
    pub content: String,
}

/// Target of a new friend request, matched against username or email.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateFriendRequest {
    pub target: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestAction {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespondFriendRequest {
    pub action: FriendRequestAction,
}

/// Pending requests addressed to and sent by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FriendRequestList {
    pub incoming: Vec<FriendRequestView>,
    pub outgoing: Vec<FriendRequestView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendView {
    pub friendship: Friendship,
    pub friend: ProfileSnapshot,
}

/// Query string of the history endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HistoryQuery {
    /// Only return messages created strictly before this instant.
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaTokenQuery {
    pub room: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaTokenResponse {
    pub token: String,
    pub room: String,
    pub expires_at: DateTime<Utc>,
}
