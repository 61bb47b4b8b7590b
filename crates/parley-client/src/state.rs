//! Client-side application state.
//!
//! [`ClientState`] is owned by a single event loop: session events go in
//! through [`handle`](ClientState::handle), user actions through the other
//! methods. Anything that changes the desired topic set returns a
//! [`Delta`] for the caller to forward to the session.

use std::collections::HashMap;

use parley_shared::models::{
    Attachment, ConversationView, FriendRequestView, MessageScope, MessageWithAuthor, Profile, ProfileSnapshot,
};
use parley_shared::protocol::{BusEvent, EventPayload, FriendRequestList, ServerFrame};
use parley_shared::{ConversationId, FriendRequestId, Topic};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::SessionEvent;
use crate::media::CallState;
use crate::subscriptions::{Delta, SubscriptionSet};
use crate::timeline::{SendTicket, Timeline};

#[derive(Debug, Default)]
pub struct ClientState {
    me: Option<ProfileSnapshot>,
    connected: bool,
    subscriptions: SubscriptionSet,
    timelines: HashMap<Topic, Timeline>,
    conversations: HashMap<ConversationId, ConversationView>,
    incoming_requests: HashMap<FriendRequestId, FriendRequestView>,
    outgoing_requests: HashMap<FriendRequestId, FriendRequestView>,
    pub call: CallState,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn me(&self) -> Option<&ProfileSnapshot> {
        self.me.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    pub fn timeline(&self, scope: MessageScope) -> Option<&Timeline> {
        self.timelines.get(&scope.topic())
    }

    pub fn conversations(&self) -> impl Iterator<Item = &ConversationView> {
        self.conversations.values()
    }

    pub fn incoming_requests(&self) -> impl Iterator<Item = &FriendRequestView> {
        self.incoming_requests.values()
    }

    pub fn outgoing_requests(&self) -> impl Iterator<Item = &FriendRequestView> {
        self.outgoing_requests.values()
    }

    // -- loading ------------------------------------------------------------

    pub fn set_profile(&mut self, profile: &Profile) -> Delta {
        self.me = Some(profile.snapshot());
        self.subscriptions.set_profile(profile.id)
    }

    pub fn load_conversations(&mut self, list: Vec<ConversationView>) -> Delta {
        self.conversations = list
            .into_iter()
            .map(|view| (view.conversation.id, view))
            .collect();
        let topics = self.conversations.keys().map(|id| Topic::Conversation(*id));
        self.subscriptions.load_conversations(topics)
    }

    pub fn load_friend_requests(&mut self, list: FriendRequestList) {
        self.incoming_requests = list.incoming.into_iter().map(|r| (r.request.id, r)).collect();
        self.outgoing_requests = list.outgoing.into_iter().map(|r| (r.request.id, r)).collect();
    }

    // -- views --------------------------------------------------------------

    /// Open a message view. The timeline is created empty; load its history
    /// with [`load_history`](Self::load_history).
    pub fn open_timeline(&mut self, scope: MessageScope) -> Delta {
        let topic = scope.topic();
        self.timelines
            .entry(topic)
            .or_insert_with(|| Timeline::new(scope));
        self.subscriptions.open_view(topic)
    }

    /// Close a message view, dropping the timeline once nothing keeps its
    /// topic subscribed.
    pub fn close_timeline(&mut self, scope: MessageScope) -> Delta {
        let topic = scope.topic();
        let delta = self.subscriptions.close_view(topic);
        if !self.subscriptions.contains(topic) {
            self.timelines.remove(&topic);
        }
        delta
    }

    pub fn load_history(&mut self, scope: MessageScope, page: Vec<MessageWithAuthor>) {
        self.timelines
            .entry(scope.topic())
            .or_insert_with(|| Timeline::new(scope))
            .load_history(page);
    }

    /// Topics whose timelines missed events and should be re-fetched.
    pub fn stale_scopes(&self) -> Vec<MessageScope> {
        self.timelines
            .values()
            .filter(|t| t.is_stale())
            .map(Timeline::scope)
            .collect()
    }

    // -- sending ------------------------------------------------------------

    /// Start an optimistic send into an open timeline. `None` when not signed
    /// in or the view is not open.
    pub fn begin_send(
        &mut self,
        scope: MessageScope,
        content: Option<String>,
        attachment: Option<Attachment>,
    ) -> Option<SendTicket> {
        let me = self.me.clone()?;
        let timeline = self.timelines.get_mut(&scope.topic())?;
        Some(timeline.begin_send(me, content, attachment))
    }

    /// Settle a send with the HTTP outcome.
    pub fn finish_send<E: std::fmt::Display>(
        &mut self,
        scope: MessageScope,
        temp_id: Uuid,
        outcome: Result<MessageWithAuthor, E>,
    ) {
        let Some(timeline) = self.timelines.get_mut(&scope.topic()) else {
            return;
        };
        match outcome {
            Ok(message) => {
                timeline.confirm(message);
            }
            Err(e) => {
                warn!(error = %e, %temp_id, "send failed");
                timeline.fail_send(temp_id);
            }
        }
    }

    // -- events -------------------------------------------------------------

    /// Fold one session event into the state.
    pub fn handle(&mut self, event: SessionEvent) -> Delta {
        match event {
            SessionEvent::Connected => {
                self.connected = true;
                Delta::default()
            }
            SessionEvent::Disconnected { retry_in } => {
                // Events published while offline are not replayed.
                if self.connected {
                    info!(?retry_in, "event stream lost");
                }
                self.connected = false;
                for timeline in self.timelines.values_mut() {
                    timeline.mark_stale();
                }
                Delta::default()
            }
            SessionEvent::Frame(frame) => self.handle_frame(frame),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) -> Delta {
        match frame {
            ServerFrame::Event(event) => return self.apply_event(event),
            ServerFrame::Lagged { topic, dropped } => {
                warn!(%topic, dropped, "events dropped");
                if let Some(timeline) = self.timelines.get_mut(&topic) {
                    timeline.mark_stale();
                }
            }
            ServerFrame::Denied { topic, reason } => {
                warn!(%topic, %reason, "subscription denied");
            }
            ServerFrame::Error { reason } => warn!(%reason, "event stream error"),
            ServerFrame::Subscribed { topic } => debug!(%topic, "subscribed"),
            ServerFrame::Unsubscribed { topic } => debug!(%topic, "unsubscribed"),
            ServerFrame::Pong => {}
        }
        Delta::default()
    }

    fn apply_event(&mut self, event: BusEvent) -> Delta {
        match &event.payload {
            EventPayload::Message(_) => {
                if let Some(timeline) = self.timelines.get_mut(&event.topic) {
                    timeline.apply(&event);
                }
            }
            EventPayload::FriendRequestAccepted { request, conversation } => {
                self.incoming_requests.remove(&request.request.id);
                self.outgoing_requests.remove(&request.request.id);
                let id = conversation.conversation.id;
                self.conversations.insert(id, conversation.clone());
                return self.subscriptions.add_conversation(Topic::Conversation(id));
            }
            EventPayload::FriendRequestReceived(view) => {
                self.incoming_requests.insert(view.request.id, view.clone());
            }
            EventPayload::FriendRequestSent(view) => {
                self.outgoing_requests.insert(view.request.id, view.clone());
            }
            EventPayload::FriendRequestResolved(view) => {
                self.incoming_requests.remove(&view.request.id);
                self.outgoing_requests.remove(&view.request.id);
            }
            _ => debug!(topic = %event.topic, seq = event.seq, "structure event"),
        }
        Delta::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_shared::models::{Conversation, FriendRequest, FriendRequestStatus, Message, ProfileStatus};
    use parley_shared::protocol::EventKind;
    use parley_shared::{ChannelId, MessageId, ProfileId};
    use std::time::Duration;

    fn profile(name: &str) -> Profile {
        Profile {
            id: ProfileId::new(),
            external_id: format!("user_{name}"),
            username: name.into(),
            display_name: name.into(),
            email: None,
            avatar_url: None,
            status: ProfileStatus::Online,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn conversation_with(me: &Profile, other: &Profile) -> ConversationView {
        ConversationView {
            conversation: Conversation {
                id: ConversationId::new(),
                member_one_id: me.id,
                member_two_id: other.id,
                created_at: Utc::now(),
            },
            other: other.snapshot(),
        }
    }

    fn event(topic: Topic, kind: EventKind, payload: EventPayload) -> SessionEvent {
        SessionEvent::Frame(ServerFrame::Event(BusEvent {
            topic,
            seq: 1,
            kind,
            payload,
            at: Utc::now(),
        }))
    }

    fn request(sender: &Profile, receiver: &Profile, status: FriendRequestStatus) -> FriendRequestView {
        FriendRequestView {
            request: FriendRequest {
                id: FriendRequestId::new(),
                sender_id: sender.id,
                receiver_id: receiver.id,
                status,
                created_at: Utc::now(),
            },
            sender: sender.snapshot(),
            receiver: receiver.snapshot(),
        }
    }

    #[test]
    fn accepted_request_extends_the_subscription_set() {
        let me = profile("alice");
        let bob = profile("bob");
        let mut state = ClientState::new();
        let delta = state.set_profile(&me);
        assert_eq!(delta.subscribe, vec![Topic::Profile(me.id)]);

        let existing = conversation_with(&me, &profile("carol"));
        let existing_topic = Topic::Conversation(existing.conversation.id);
        let delta = state.load_conversations(vec![existing]);
        assert_eq!(delta.subscribe, vec![existing_topic]);

        let outgoing = request(&me, &bob, FriendRequestStatus::Pending);
        state.handle(event(
            Topic::Profile(me.id),
            EventKind::Insert,
            EventPayload::FriendRequestSent(outgoing.clone()),
        ));
        assert_eq!(state.outgoing_requests().count(), 1);

        let mut accepted = outgoing;
        accepted.request.status = FriendRequestStatus::Accepted;
        let view = conversation_with(&me, &bob);
        let topic = Topic::Conversation(view.conversation.id);
        let delta = state.handle(event(
            Topic::Profile(me.id),
            EventKind::Update,
            EventPayload::FriendRequestAccepted {
                request: accepted.clone(),
                conversation: view.clone(),
            },
        ));
        assert_eq!(delta.subscribe, vec![topic]);
        assert_eq!(state.outgoing_requests().count(), 0);
        assert!(state.subscriptions().contains(topic));
        assert!(state.subscriptions().contains(existing_topic));
        assert_eq!(state.conversations().count(), 2);

        // Replaying the same event changes nothing.
        let delta = state.handle(event(
            Topic::Profile(me.id),
            EventKind::Update,
            EventPayload::FriendRequestAccepted {
                request: accepted,
                conversation: view,
            },
        ));
        assert!(delta.is_empty());
    }

    #[test]
    fn friend_requests_follow_events() {
        let me = profile("alice");
        let bob = profile("bob");
        let mut state = ClientState::new();
        state.set_profile(&me);

        let incoming = request(&bob, &me, FriendRequestStatus::Pending);
        state.handle(event(
            Topic::Profile(me.id),
            EventKind::Insert,
            EventPayload::FriendRequestReceived(incoming.clone()),
        ));
        assert_eq!(state.incoming_requests().count(), 1);

        let mut resolved = incoming;
        resolved.request.status = FriendRequestStatus::Accepted;
        state.handle(event(
            Topic::Profile(me.id),
            EventKind::Update,
            EventPayload::FriendRequestResolved(resolved),
        ));
        assert_eq!(state.incoming_requests().count(), 0);
    }

    #[test]
    fn optimistic_send_round_trip() {
        let me = profile("alice");
        let mut state = ClientState::new();
        let scope = MessageScope::Channel(ChannelId::new());
        assert!(state.begin_send(scope, Some("hi".into()), None).is_none());

        state.set_profile(&me);
        let delta = state.open_timeline(scope);
        assert_eq!(delta.subscribe, vec![scope.topic()]);

        let ticket = state.begin_send(scope, Some("hi".into()), None).unwrap();
        assert!(state.timeline(scope).unwrap().entries()[0].is_pending());

        let confirmed = MessageWithAuthor {
            message: Message {
                id: MessageId::new(),
                scope,
                author_id: me.id,
                content: Some("hi".into()),
                attachment: None,
                client_key: ticket.request.client_key.clone(),
                edited: false,
                deleted_at: None,
                created_at: Utc::now(),
            },
            author: me.snapshot(),
        };
        state.handle(event(
            scope.topic(),
            EventKind::Insert,
            EventPayload::Message(confirmed.clone()),
        ));
        state.finish_send::<String>(scope, ticket.temp_id, Ok(confirmed));

        let entries = state.timeline(scope).unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_pending());

        let ticket = state.begin_send(scope, Some("again".into()), None).unwrap();
        state.finish_send(scope, ticket.temp_id, Err("offline"));
        assert_eq!(state.timeline(scope).unwrap().len(), 1);
    }

    #[test]
    fn closing_the_last_view_drops_the_timeline() {
        let mut state = ClientState::new();
        let scope = MessageScope::Channel(ChannelId::new());
        state.open_timeline(scope);
        state.open_timeline(scope);
        assert!(state.close_timeline(scope).is_empty());
        let delta = state.close_timeline(scope);
        assert_eq!(delta.unsubscribe, vec![scope.topic()]);
        assert!(state.timeline(scope).is_none());
    }

    #[test]
    fn lag_and_disconnect_mark_timelines_stale() {
        let mut state = ClientState::new();
        let a = MessageScope::Channel(ChannelId::new());
        let b = MessageScope::Channel(ChannelId::new());
        state.open_timeline(a);
        state.open_timeline(b);
        state.handle(SessionEvent::Connected);

        state.handle(SessionEvent::Frame(ServerFrame::Lagged {
            topic: a.topic(),
            dropped: 4,
        }));
        assert_eq!(state.stale_scopes(), vec![a]);

        state.load_history(a, Vec::new());
        assert!(state.stale_scopes().is_empty());

        state.handle(SessionEvent::Disconnected {
            retry_in: Duration::from_millis(500),
        });
        assert!(!state.is_connected());
        assert_eq!(state.stale_scopes().len(), 2);
    }
}
