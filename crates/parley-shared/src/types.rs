use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Internal profile identifier. Stable across identity-provider changes.
    ProfileId
);
uuid_id!(ServerId);
uuid_id!(RoleId);
uuid_id!(CategoryId);
uuid_id!(ChannelId);
uuid_id!(ConversationId);
uuid_id!(MembershipId);
uuid_id!(
    /// Durable id of a channel message or a direct message.
    MessageId
);
uuid_id!(FriendRequestId);
uuid_id!(FriendshipId);

/// Order two profile ids so that an unordered pair has one canonical form.
pub fn ordered_pair(a: ProfileId, b: ProfileId) -> (ProfileId, ProfileId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// An addressable event stream: one channel, one conversation, one server's
/// structure, or one profile's social inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    Channel(ChannelId),
    Conversation(ConversationId),
    Profile(ProfileId),
    Server(ServerId),
}

impl Topic {
    fn prefix(&self) -> &'static str {
        match self {
            Topic::Channel(_) => "channel",
            Topic::Conversation(_) => "conversation",
            Topic::Profile(_) => "profile",
            Topic::Server(_) => "server",
        }
    }

    fn id(&self) -> Uuid {
        match self {
            Topic::Channel(id) => id.0,
            Topic::Conversation(id) => id.0,
            Topic::Profile(id) => id.0,
            Topic::Server(id) => id.0,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix(), self.id())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopicParseError {
    #[error("topic is missing the ':' separator")]
    MissingSeparator,

    #[error("unknown topic kind: {0}")]
    UnknownKind(String),

    #[error("invalid topic id: {0}")]
    InvalidId(#[from] uuid::Error),
}

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once(':').ok_or(TopicParseError::MissingSeparator)?;
        let id = Uuid::parse_str(id)?;
        match kind {
            "channel" => Ok(Topic::Channel(ChannelId(id))),
            "conversation" => Ok(Topic::Conversation(ConversationId(id))),
            "profile" => Ok(Topic::Profile(ProfileId(id))),
            "server" => Ok(Topic::Server(ServerId(id))),
            other => Err(TopicParseError::UnknownKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}
