//! Authorization chain evaluator.
//!
//! The gateway resolves everything a rule could need into an [`AuthContext`]
//! once per request and hands it to [`can_perform`]. Rules never fetch; they
//! only inspect what was resolved, so the evaluator is pure and cheap to test.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::models::*;
use crate::types::*;

/// A state change or read the actor is attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RenameServer,
    DeleteServer,
    /// `owner_only` selects the restrictive variant; the gateway uses the
    /// member-permitted one.
    CreateChannel { owner_only: bool },
    UpdateChannel,
    DeleteChannel,
    SendMessage,
    EditMessage,
    DeleteMessage,
    SendFriendRequest,
    RespondFriendRequest,
    JoinServer,
    LeaveServer,
    /// History reads and event-stream subscriptions.
    ReadTopic,
}

/// The resource an action applies to, with its parent chain already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Server {
        server: Server,
        membership: Option<Membership>,
    },
    Channel {
        channel: Channel,
        server: Server,
        membership: Option<Membership>,
    },
    Message {
        message: Message,
    },
    Conversation {
        conversation: Conversation,
    },
    /// A prospective friend pair, with whatever already links it.
    FriendPair {
        receiver: ProfileId,
        pending: Option<FriendRequest>,
        friendship: Option<Friendship>,
    },
    FriendRequest {
        request: FriendRequest,
    },
    Profile {
        profile_id: ProfileId,
    },
}

/// Everything a rule may inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// `None` when the session could not be resolved to a profile.
    pub actor: Option<ProfileId>,
    pub target: Target,
}

impl AuthContext {
    pub fn new(actor: ProfileId, target: Target) -> Self {
        Self {
            actor: Some(actor),
            target,
        }
    }

    pub fn anonymous(target: Target) -> Self {
        Self {
            actor: None,
            target,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("not-owner")]
    NotOwner,
    #[error("not-member")]
    NotMember,
    #[error("not-participant")]
    NotParticipant,
    #[error("protected-channel")]
    ProtectedChannel,
    #[error("forbidden")]
    Forbidden,
    #[error("self-request")]
    SelfRequest,
    #[error("duplicate")]
    Duplicate,
    #[error("not-receiver")]
    NotReceiver,
    #[error("already-resolved")]
    AlreadyResolved,
    #[error("already-member")]
    AlreadyMember,
    #[error("owner-cannot-leave")]
    OwnerCannotLeave,
    #[error("wrong-target")]
    WrongTarget,
}

impl DenyReason {
    /// The error category a denial is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DenyReason::Unauthenticated => ErrorKind::Unauthenticated,
            DenyReason::Duplicate | DenyReason::AlreadyMember => ErrorKind::Conflict,
            DenyReason::AlreadyResolved => ErrorKind::NotFound,
            DenyReason::SelfRequest => ErrorKind::InvalidInput,
            DenyReason::NotOwner
            | DenyReason::NotMember
            | DenyReason::NotParticipant
            | DenyReason::ProtectedChannel
            | DenyReason::Forbidden
            | DenyReason::NotReceiver
            | DenyReason::OwnerCannotLeave
            | DenyReason::WrongTarget => ErrorKind::Forbidden,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

fn allow_if(cond: bool, otherwise: DenyReason) -> Decision {
    if cond {
        Decision::Allow
    } else {
        Decision::Deny(otherwise)
    }
}

/// Evaluate the rule chain for `action` on the resolved context.
pub fn can_perform(ctx: &AuthContext, action: Action) -> Decision {
    let Some(actor) = ctx.actor else {
        return Decision::Deny(DenyReason::Unauthenticated);
    };

    match (action, &ctx.target) {
        (Action::RenameServer | Action::DeleteServer, Target::Server { server, .. }) => {
            allow_if(server.owner_id == actor, DenyReason::NotOwner)
        }

        (Action::CreateChannel { owner_only: true }, Target::Server { server, .. }) => {
            allow_if(server.owner_id == actor, DenyReason::NotOwner)
        }
        (Action::CreateChannel { owner_only: false }, Target::Server { membership, .. }) => {
            allow_if(membership.is_some(), DenyReason::NotMember)
        }

        (Action::UpdateChannel | Action::DeleteChannel, Target::Channel { channel, server, .. }) => {
            // Protection wins over ownership.
            if channel.is_protected() {
                return Decision::Deny(DenyReason::ProtectedChannel);
            }
            allow_if(server.owner_id == actor, DenyReason::NotOwner)
        }

        (Action::EditMessage | Action::DeleteMessage, Target::Message { message }) => {
            allow_if(message.author_id == actor, DenyReason::Forbidden)
        }

        (Action::SendMessage | Action::ReadTopic, Target::Channel { membership, .. }) => {
            allow_if(membership.is_some(), DenyReason::NotMember)
        }
        (Action::SendMessage | Action::ReadTopic, Target::Conversation { conversation }) => {
            allow_if(conversation.has_participant(actor), DenyReason::NotParticipant)
        }
        (Action::ReadTopic, Target::Server { membership, .. }) => {
            allow_if(membership.is_some(), DenyReason::NotMember)
        }
        (Action::ReadTopic, Target::Profile { profile_id }) => {
            allow_if(*profile_id == actor, DenyReason::Forbidden)
        }

        (
            Action::SendFriendRequest,
            Target::FriendPair {
                receiver,
                pending,
                friendship,
            },
        ) => {
            if *receiver == actor {
                Decision::Deny(DenyReason::SelfRequest)
            } else if pending.is_some() || friendship.is_some() {
                Decision::Deny(DenyReason::Duplicate)
            } else {
                Decision::Allow
            }
        }

        (Action::RespondFriendRequest, Target::FriendRequest { request }) => {
            if request.receiver_id != actor {
                Decision::Deny(DenyReason::NotReceiver)
            } else if request.status != FriendRequestStatus::Pending {
                Decision::Deny(DenyReason::AlreadyResolved)
            } else {
                Decision::Allow
            }
        }

        (Action::JoinServer, Target::Server { membership, .. }) => {
            allow_if(membership.is_none(), DenyReason::AlreadyMember)
        }
        (Action::LeaveServer, Target::Server { server, membership }) => {
            if server.owner_id == actor {
                Decision::Deny(DenyReason::OwnerCannotLeave)
            } else {
                allow_if(membership.is_some(), DenyReason::NotMember)
            }
        }

        _ => Decision::Deny(DenyReason::WrongTarget),
    }
}
