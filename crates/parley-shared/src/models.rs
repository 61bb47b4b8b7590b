//! Domain model structs persisted by the row store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to HTTP responses and realtime events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::GENERAL_CHANNEL_NAME;
use crate::types::*;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Presence status shown next to a profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Online,
    Idle,
    Dnd,
    #[default]
    Offline,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Online => "online",
            ProfileStatus::Idle => "idle",
            ProfileStatus::Dnd => "dnd",
            ProfileStatus::Offline => "offline",
        }
    }
}

impl FromStr for ProfileStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "idle" => Ok(Self::Idle),
            "dnd" => Ok(Self::Dnd),
            "offline" => Ok(Self::Offline),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A user known to the platform, mirrored from the external identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: ProfileId,
    /// Subject id assigned by the identity provider.
    pub external_id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub status: ProfileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// The public slice of a profile embedded in denormalized events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub id: ProfileId,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Fields pushed by the identity provider on sign-in or change events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileSync {
    pub external_id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    /// `Some` overwrites the stored status, `None` keeps it.
    pub status: Option<ProfileStatus>,
}

// ---------------------------------------------------------------------------
// Server (community)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub icon_url: Option<String>,
    /// Exactly one owner. Only the owner may rename or delete the server.
    pub owner_id: ProfileId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub server_id: ServerId,
    pub name: String,
    pub is_default: bool,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    pub server_id: ServerId,
    pub name: String,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub id: MembershipId,
    pub profile_id: ProfileId,
    pub server_id: ServerId,
    pub role_id: RoleId,
    pub joined_at: DateTime<Utc>,
}

/// A member row joined with the member's public profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub membership: Membership,
    pub profile: ProfileSnapshot,
}

/// Everything a client needs to render a server's sidebar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerDetail {
    pub server: Server,
    pub roles: Vec<Role>,
    pub categories: Vec<Category>,
    pub channels: Vec<Channel>,
    pub members: Vec<Member>,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
    Video,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
            ChannelKind::Video => "video",
        }
    }
}

impl FromStr for ChannelKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "voice" => Ok(Self::Voice),
            "video" => Ok(Self::Video),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub server_id: ServerId,
    pub category_id: Option<CategoryId>,
    pub name: String,
    pub kind: ChannelKind,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// The `general` channel may never be deleted.
    pub fn is_protected(&self) -> bool {
        self.name == GENERAL_CHANNEL_NAME
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A direct-message thread between exactly two profiles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub member_one_id: ProfileId,
    pub member_two_id: ProfileId,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, profile: ProfileId) -> bool {
        self.member_one_id == profile || self.member_two_id == profile
    }

    /// The participant that is not `profile`.
    pub fn other(&self, profile: ProfileId) -> ProfileId {
        if self.member_one_id == profile {
            self.member_two_id
        } else {
            self.member_one_id
        }
    }
}

/// A conversation with the counterpart's profile, as listed in the DM sidebar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationView {
    pub conversation: Conversation,
    pub other: ProfileSnapshot,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Where a message lives. Channel messages and direct messages are stored
/// separately but share one lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageScope {
    Channel(ChannelId),
    Conversation(ConversationId),
}

impl MessageScope {
    pub fn topic(&self) -> Topic {
        match self {
            MessageScope::Channel(id) => Topic::Channel(*id),
            MessageScope::Conversation(id) => Topic::Conversation(*id),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, MessageScope::Conversation(_))
    }
}

/// Reference to a file held by the external blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub mime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub scope: MessageScope,
    pub author_id: ProfileId,
    /// `None` for attachment-only messages.
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    /// Idempotency key chosen by the sending client, echoed back in events.
    pub client_key: Option<String>,
    pub edited: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The client-facing form: a deleted message is sent without its body.
    /// The stored row keeps it.
    pub fn redacted(mut self) -> Self {
        if self.is_deleted() {
            self.content = None;
            self.attachment = None;
        }
        self
    }
}

/// A message with its author's profile snapshot, so receivers never need a
/// follow-up fetch to render it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageWithAuthor {
    pub message: Message,
    pub author: ProfileSnapshot,
}

// ---------------------------------------------------------------------------
// Social graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendRequestStatus::Pending => "pending",
            FriendRequestStatus::Accepted => "accepted",
            FriendRequestStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for FriendRequestStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendRequest {
    pub id: FriendRequestId,
    pub sender_id: ProfileId,
    pub receiver_id: ProfileId,
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
}

/// A friend request with both parties' profiles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendRequestView {
    pub request: FriendRequest,
    pub sender: ProfileSnapshot,
    pub receiver: ProfileSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friendship {
    pub id: FriendshipId,
    pub profile_one_id: ProfileId,
    pub profile_two_id: ProfileId,
    pub created_at: DateTime<Utc>,
}

/// Parse failure for the string-backed enums above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant: {}", self.0)
    }
}

impl std::error::Error for UnknownVariant {}
