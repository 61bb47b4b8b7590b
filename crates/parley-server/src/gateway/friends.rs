//! Friend requests, friendships and the conversations they open.

use chrono::Utc;
use parley_shared::authz::{Action, AuthContext, Target};
use parley_shared::models::*;
use parley_shared::protocol::{
    CreateFriendRequest, EventKind, EventPayload, FriendRequestAction, FriendRequestList, FriendView,
};
use parley_shared::{ordered_pair, ConversationId, FriendRequestId, FriendshipId, ProfileId, Topic};
use parley_store::StoreError;
use tokio::sync::OwnedMutexGuard;

use super::{named, observe, stage, step_failed, validate, Gateway, Stage};
use crate::error::{GatewayError, Result};

impl Gateway {
    /// Both profile topics of a pair, locked in a canonical order.
    async fn pair_guards(&self, a: ProfileId, b: ProfileId) -> [OwnedMutexGuard<()>; 2] {
        let (low, high) = ordered_pair(a, b);
        let first = self.bus.ordered(Topic::Profile(low)).await;
        let second = self.bus.ordered(Topic::Profile(high)).await;
        [first, second]
    }

    async fn request_view(&self, request: FriendRequest) -> Result<FriendRequestView> {
        Ok(FriendRequestView {
            sender: self.snapshot_of(request.sender_id).await?,
            receiver: self.snapshot_of(request.receiver_id).await?,
            request,
        })
    }

    /// Send a friend request to the profile whose username or email is
    /// `req.target`.
    pub async fn send_friend_request(&self, actor: &Profile, req: CreateFriendRequest) -> Result<FriendRequestView> {
        const OP: &str = "send_friend_request";
        observe(OP, async {
            let handle = validate::required(&req.target, "target")?;
            stage(OP, Stage::Validated);

            let receiver = self
                .store
                .find_profile_by_handle(handle)
                .await?
                .ok_or_else(|| GatewayError::not_found("profile"))?;
            let pending = self.store.find_pending_request(actor.id, receiver.id).await?;
            let friendship = self.store.find_friendship(actor.id, receiver.id).await?;
            self.authorize(
                OP,
                &AuthContext::new(
                    actor.id,
                    Target::FriendPair {
                        receiver: receiver.id,
                        pending,
                        friendship,
                    },
                ),
                Action::SendFriendRequest,
            )?;

            let request = FriendRequest {
                id: FriendRequestId::new(),
                sender_id: actor.id,
                receiver_id: receiver.id,
                status: FriendRequestStatus::Pending,
                created_at: Utc::now(),
            };

            let _order = self.pair_guards(actor.id, receiver.id).await;
            self.store
                .insert_friend_request(request.clone())
                .await
                .map_err(|e| match e {
                    StoreError::Conflict(_) => GatewayError::Conflict("duplicate".into()),
                    other => other.into(),
                })?;
            stage(OP, Stage::Persisted);

            let view = FriendRequestView {
                request,
                sender: actor.snapshot(),
                receiver: receiver.snapshot(),
            };
            self.publish(
                OP,
                Topic::Profile(receiver.id),
                EventKind::Insert,
                EventPayload::FriendRequestReceived(view.clone()),
            )
            .await;
            self.publish(
                OP,
                Topic::Profile(actor.id),
                EventKind::Insert,
                EventPayload::FriendRequestSent(view.clone()),
            )
            .await;
            Ok(view)
        })
        .await
    }

    /// Accept or reject a pending request addressed to the actor.
    ///
    /// Acceptance marks the request, then inserts the friendship and the
    /// conversation for the pair. Rows that already exist for the pair are
    /// reused.
    pub async fn respond_friend_request(
        &self,
        actor: &Profile,
        id: FriendRequestId,
        action: FriendRequestAction,
    ) -> Result<FriendRequestView> {
        const OP: &str = "respond_friend_request";
        observe(OP, async {
            stage(OP, Stage::Validated);
            let request = self
                .store
                .get_friend_request(id)
                .await
                .map_err(named("friend request"))?;
            self.authorize(
                OP,
                &AuthContext::new(actor.id, Target::FriendRequest { request: request.clone() }),
                Action::RespondFriendRequest,
            )?;

            let status = match action {
                FriendRequestAction::Accept => FriendRequestStatus::Accepted,
                FriendRequestAction::Reject => FriendRequestStatus::Rejected,
            };
            let (sender, receiver) = (request.sender_id, request.receiver_id);

            let _order = self.pair_guards(sender, receiver).await;
            let resolved = self
                .store
                .resolve_friend_request(id, status)
                .await
                .inspect_err(|e| step_failed(OP, "resolve_request", e))?;
            if !resolved {
                return Err(GatewayError::not_found("friend request"));
            }
            let view = self
                .request_view(FriendRequest { status, ..request })
                .await?;

            if status == FriendRequestStatus::Rejected {
                stage(OP, Stage::Persisted);
                self.publish(
                    OP,
                    Topic::Profile(sender),
                    EventKind::Update,
                    EventPayload::FriendRequestResolved(view.clone()),
                )
                .await;
                return Ok(view);
            }

            let now = Utc::now();
            let friendship = Friendship {
                id: FriendshipId::new(),
                profile_one_id: sender,
                profile_two_id: receiver,
                created_at: now,
            };
            match self.store.insert_friendship(friendship).await {
                Ok(_) => {}
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(op = OP, "friendship already exists for pair");
                }
                Err(e) => {
                    step_failed(OP, "friendship", &e);
                    return Err(e.into());
                }
            }

            let conversation = Conversation {
                id: ConversationId::new(),
                member_one_id: sender,
                member_two_id: receiver,
                created_at: now,
            };
            let conversation = match self.store.insert_conversation(conversation).await {
                Ok(c) => c,
                Err(StoreError::Conflict(_)) => self
                    .store
                    .find_conversation(sender, receiver)
                    .await
                    .inspect_err(|e| step_failed(OP, "conversation", e))?
                    .ok_or_else(|| GatewayError::Conflict("conversation".into()))?,
                Err(e) => {
                    step_failed(OP, "conversation", &e);
                    return Err(e.into());
                }
            };
            stage(OP, Stage::Persisted);
            tracing::info!(conversation = %conversation.id, "friend request accepted");

            for (me, other) in [(sender, &view.receiver), (receiver, &view.sender)] {
                let topic = Topic::Profile(me);
                self.publish(
                    OP,
                    topic,
                    EventKind::Update,
                    EventPayload::FriendRequestAccepted {
                        request: view.clone(),
                        conversation: ConversationView {
                            conversation: conversation.clone(),
                            other: other.clone(),
                        },
                    },
                )
                .await;
            }
            Ok(view)
        })
        .await
    }

    pub async fn list_friend_requests(&self, actor: &Profile) -> Result<FriendRequestList> {
        observe("list_friend_requests", async {
            let (incoming, outgoing) = self.store.list_pending_requests(actor.id).await?;
            let mut list = FriendRequestList::default();
            for request in incoming {
                list.incoming.push(self.request_view(request).await?);
            }
            for request in outgoing {
                list.outgoing.push(self.request_view(request).await?);
            }
            Ok(list)
        })
        .await
    }

    pub async fn list_friends(&self, actor: &Profile) -> Result<Vec<FriendView>> {
        observe("list_friends", async {
            let mut friends = Vec::new();
            for friendship in self.store.list_friendships(actor.id).await? {
                let other = if friendship.profile_one_id == actor.id {
                    friendship.profile_two_id
                } else {
                    friendship.profile_one_id
                };
                friends.push(FriendView {
                    friend: self.snapshot_of(other).await?,
                    friendship,
                });
            }
            Ok(friends)
        })
        .await
    }

    pub async fn list_conversations(&self, actor: &Profile) -> Result<Vec<ConversationView>> {
        observe("list_conversations", async {
            let mut views = Vec::new();
            for conversation in self.store.list_conversations(actor.id).await? {
                views.push(ConversationView {
                    other: self.snapshot_of(conversation.other(actor.id)).await?,
                    conversation,
                });
            }
            Ok(views)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::bus::BusItem;
    use parley_shared::protocol::SendMessageRequest;

    fn to(target: &str) -> CreateFriendRequest {
        CreateFriendRequest { target: target.into() }
    }

    fn payloads(rx: &mut tokio::sync::mpsc::Receiver<BusItem>) -> Vec<EventPayload> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let BusItem::Event(e) = item {
                out.push(e.payload.clone());
            }
        }
        out
    }

    #[tokio::test]
    async fn request_by_username_or_email() {
        let gw = gateway();
        let p1 = profile(&gw, "p1").await;
        let p2 = profile(&gw, "p2").await;
        let p3 = profile(&gw, "p3").await;
        let mut inbox = gw.bus().subscribe(Topic::Profile(p2.id)).await;
        let mut outbox = gw.bus().subscribe(Topic::Profile(p1.id)).await;

        let view = gw.send_friend_request(&p1, to("p2")).await.unwrap();
        assert_eq!(view.receiver.id, p2.id);
        gw.send_friend_request(&p1, to("p3@example.com")).await.unwrap();

        assert!(matches!(
            payloads(&mut inbox).as_slice(),
            [EventPayload::FriendRequestReceived(v)] if v.sender.id == p1.id
        ));
        assert_eq!(payloads(&mut outbox).len(), 2);

        let list = gw.list_friend_requests(&p1).await.unwrap();
        assert_eq!(list.outgoing.len(), 2);
        assert!(list.incoming.is_empty());
        let list = gw.list_friend_requests(&p3).await.unwrap();
        assert_eq!(list.incoming.len(), 1);
    }

    #[tokio::test]
    async fn self_duplicate_and_unknown_targets() {
        let gw = gateway();
        let p1 = profile(&gw, "p1").await;
        let _p2 = profile(&gw, "p2").await;

        assert!(matches!(
            gw.send_friend_request(&p1, to("p1")).await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert!(matches!(
            gw.send_friend_request(&p1, to("nobody")).await,
            Err(GatewayError::NotFound(_))
        ));
        gw.send_friend_request(&p1, to("p2")).await.unwrap();
        assert!(matches!(
            gw.send_friend_request(&p1, to("p2")).await,
            Err(GatewayError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn reverse_request_is_a_duplicate() {
        let gw = gateway();
        let p1 = profile(&gw, "p1").await;
        let p2 = profile(&gw, "p2").await;
        gw.send_friend_request(&p1, to("p2")).await.unwrap();
        assert!(matches!(
            gw.send_friend_request(&p2, to("p1")).await,
            Err(GatewayError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn accept_creates_one_friendship_and_conversation() {
        let gw = gateway();
        let p1 = profile(&gw, "p1").await;
        let p2 = profile(&gw, "p2").await;
        let request = gw.send_friend_request(&p1, to("p2")).await.unwrap().request;

        assert!(matches!(
            gw.respond_friend_request(&p1, request.id, FriendRequestAction::Accept).await,
            Err(GatewayError::Forbidden(_))
        ));

        let mut p1_inbox = gw.bus().subscribe(Topic::Profile(p1.id)).await;
        let mut p2_inbox = gw.bus().subscribe(Topic::Profile(p2.id)).await;
        let view = gw
            .respond_friend_request(&p2, request.id, FriendRequestAction::Accept)
            .await
            .unwrap();
        assert_eq!(view.request.status, FriendRequestStatus::Accepted);

        assert!(matches!(
            gw.respond_friend_request(&p2, request.id, FriendRequestAction::Accept).await,
            Err(GatewayError::NotFound(_))
        ));

        // One event per participant, each naming the other side.
        let p1_events = payloads(&mut p1_inbox);
        let p2_events = payloads(&mut p2_inbox);
        assert!(matches!(
            p1_events.as_slice(),
            [EventPayload::FriendRequestAccepted { request, conversation }]
                if request.request.status == FriendRequestStatus::Accepted
                    && conversation.other.id == p2.id
        ));
        assert!(matches!(
            p2_events.as_slice(),
            [EventPayload::FriendRequestAccepted { conversation, .. }] if conversation.other.id == p1.id
        ));

        assert_eq!(gw.list_friends(&p1).await.unwrap().len(), 1);
        assert_eq!(gw.list_friends(&p2).await.unwrap()[0].friend.id, p1.id);
        let conversations = gw.list_conversations(&p2).await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].other.id, p1.id);

        assert!(matches!(
            gw.send_friend_request(&p2, to("p1")).await,
            Err(GatewayError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn reject_notifies_sender_only() {
        let gw = gateway();
        let p1 = profile(&gw, "p1").await;
        let p2 = profile(&gw, "p2").await;
        let request = gw.send_friend_request(&p1, to("p2")).await.unwrap().request;

        let mut p1_inbox = gw.bus().subscribe(Topic::Profile(p1.id)).await;
        let mut p2_inbox = gw.bus().subscribe(Topic::Profile(p2.id)).await;
        gw.respond_friend_request(&p2, request.id, FriendRequestAction::Reject)
            .await
            .unwrap();

        assert!(matches!(
            payloads(&mut p1_inbox).as_slice(),
            [EventPayload::FriendRequestResolved(v)] if v.request.status == FriendRequestStatus::Rejected
        ));
        assert!(payloads(&mut p2_inbox).is_empty());
        assert!(gw.list_friends(&p1).await.unwrap().is_empty());
        assert!(gw.list_conversations(&p1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn friends_exchange_direct_messages() {
        let gw = gateway();
        let p1 = profile(&gw, "p1").await;
        let p2 = profile(&gw, "p2").await;
        let p3 = profile(&gw, "p3").await;
        let request = gw.send_friend_request(&p1, to("p2")).await.unwrap().request;
        gw.respond_friend_request(&p2, request.id, FriendRequestAction::Accept)
            .await
            .unwrap();
        let conversation = gw.list_conversations(&p2).await.unwrap()[0].conversation.id;

        gw.authorize_topic(&p2, Topic::Conversation(conversation)).await.unwrap();
        let mut rx = gw.bus().subscribe(Topic::Conversation(conversation)).await;

        let dm = SendMessageRequest {
            conversation_id: Some(conversation),
            content: Some("hi".into()),
            ..Default::default()
        };
        gw.send_message(&p1, dm.clone()).await.unwrap();
        assert!(matches!(
            gw.send_message(&p3, dm).await,
            Err(GatewayError::Forbidden(_))
        ));

        match rx.recv().await.unwrap() {
            BusItem::Event(e) => match &e.payload {
                EventPayload::Message(m) => {
                    assert_eq!(e.kind, EventKind::Insert);
                    assert_eq!(m.message.content.as_deref(), Some("hi"));
                    assert_eq!(m.author.id, p1.id);
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}
