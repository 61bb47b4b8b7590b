use chrono::Utc;
use parley_shared::authz::{Action, AuthContext, Target};
use parley_shared::constants::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use parley_shared::models::{Attachment, Message, MessageScope, MessageWithAuthor, Profile};
use parley_shared::protocol::{EventKind, EventPayload, HistoryQuery, SendMessageRequest};
use parley_shared::{ChannelId, ConversationId, MessageId};
use parley_store::{MessagePage, MessageTable, StoreError};

use super::{named, observe, stage, validate, Gateway, Stage};
use crate::error::{GatewayError, Result};

/// A send request after structural validation.
#[derive(Debug)]
struct Outgoing {
    scope: MessageScope,
    content: Option<String>,
    attachment: Option<Attachment>,
    client_key: Option<String>,
}

impl Outgoing {
    fn parse(req: SendMessageRequest) -> Result<Self> {
        let scope = match (req.channel_id, req.conversation_id) {
            (Some(id), None) => MessageScope::Channel(id),
            (None, Some(id)) => MessageScope::Conversation(id),
            (None, None) => return Err(GatewayError::invalid("channel_id or conversation_id is required")),
            (Some(_), Some(_)) => {
                return Err(GatewayError::invalid(
                    "only one of channel_id and conversation_id may be set",
                ))
            }
        };

        let url = req.attachment_url.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let mime = req.attachment_mime.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let attachment = match (url, mime) {
            (Some(url), Some(mime)) => Some(Attachment {
                url: url.to_string(),
                mime: mime.to_string(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(GatewayError::invalid("attachment_mime is required with an attachment")),
            (None, Some(_)) => return Err(GatewayError::invalid("attachment_mime without an attachment")),
        };

        let content = validate::optional_content(req.content.as_deref())?;
        if content.is_none() && attachment.is_none() {
            return Err(GatewayError::invalid("content or attachment is required"));
        }

        Ok(Self {
            scope,
            content,
            attachment,
            client_key: validate::client_key(req.client_key.as_deref())?,
        })
    }
}

fn page(query: HistoryQuery) -> Result<MessagePage> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit == 0 {
        return Err(GatewayError::invalid("limit must be positive"));
    }
    Ok(MessagePage {
        before: query.before,
        limit: limit.min(MAX_HISTORY_LIMIT),
        include_deleted: query.include_deleted,
    })
}

impl Gateway {
    /// Send a channel message or a direct message.
    ///
    /// With a client key, repeating the send returns the stored message and
    /// publishes nothing. Reusing a key in a different scope is a conflict.
    pub async fn send_message(&self, actor: &Profile, req: SendMessageRequest) -> Result<MessageWithAuthor> {
        const OP: &str = "send_message";
        observe(OP, async {
            let out = Outgoing::parse(req)?;
            stage(OP, Stage::Validated);

            let target = self.scope_target(actor, out.scope).await?;
            self.authorize(OP, &AuthContext::new(actor.id, target), Action::SendMessage)?;

            if let Some(existing) = self.replayed(actor, &out).await? {
                tracing::debug!(op = OP, message = %existing.id, "idempotent replay");
                return Ok(MessageWithAuthor {
                    message: existing,
                    author: actor.snapshot(),
                });
            }

            let message = Message {
                id: MessageId::new(),
                scope: out.scope,
                author_id: actor.id,
                content: out.content.clone(),
                attachment: out.attachment.clone(),
                client_key: out.client_key.clone(),
                edited: false,
                deleted_at: None,
                created_at: Utc::now(),
            };

            let topic = out.scope.topic();
            let _order = self.bus.ordered(topic).await;
            match self.store.insert_message(message.clone()).await {
                Ok(()) => {}
                // A concurrent send with the same key won the race.
                Err(StoreError::Conflict(_)) if out.client_key.is_some() => {
                    return match self.replayed(actor, &out).await? {
                        Some(existing) => Ok(MessageWithAuthor {
                            message: existing,
                            author: actor.snapshot(),
                        }),
                        None => Err(GatewayError::Conflict("duplicate message".into())),
                    };
                }
                Err(e) => return Err(e.into()),
            }
            stage(OP, Stage::Persisted);

            let sent = MessageWithAuthor {
                message,
                author: actor.snapshot(),
            };
            self.publish(OP, topic, EventKind::Insert, EventPayload::Message(sent.clone()))
                .await;
            Ok(sent)
        })
        .await
    }

    /// A message previously stored under the same client key, if any.
    async fn replayed(&self, actor: &Profile, out: &Outgoing) -> Result<Option<Message>> {
        let Some(key) = out.client_key.clone() else {
            return Ok(None);
        };
        let table = MessageTable::from(&out.scope);
        match self.store.find_message_by_client_key(table, actor.id, key).await? {
            Some(existing) if existing.scope == out.scope => Ok(Some(existing)),
            Some(_) => Err(GatewayError::Conflict(
                "client_key already used in another scope".into(),
            )),
            None => Ok(None),
        }
    }

    /// Replace the content of a message. Author only; deleted messages
    /// cannot be edited.
    pub async fn edit_message(&self, actor: &Profile, id: MessageId, content: &str) -> Result<MessageWithAuthor> {
        const OP: &str = "edit_message";
        observe(OP, async {
            let content = validate::content(content)?;
            stage(OP, Stage::Validated);

            let message = self.message(id).await?;
            let topic = message.scope.topic();
            self.authorize(
                OP,
                &AuthContext::new(actor.id, Target::Message { message }),
                Action::EditMessage,
            )?;

            let _order = self.bus.ordered(topic).await;
            let message = self
                .store
                .edit_message(id, content)
                .await
                .map_err(named("message"))?;
            stage(OP, Stage::Persisted);

            let edited = MessageWithAuthor {
                message,
                author: actor.snapshot(),
            };
            self.publish(OP, topic, EventKind::Update, EventPayload::Message(edited.clone()))
                .await;
            Ok(edited)
        })
        .await
    }

    /// Soft-delete a message, leaving a tombstone. Author only.
    pub async fn delete_message(&self, actor: &Profile, id: MessageId) -> Result<MessageWithAuthor> {
        const OP: &str = "delete_message";
        observe(OP, async {
            stage(OP, Stage::Validated);
            let message = self.message(id).await?;
            let topic = message.scope.topic();
            self.authorize(
                OP,
                &AuthContext::new(actor.id, Target::Message { message }),
                Action::DeleteMessage,
            )?;

            let _order = self.bus.ordered(topic).await;
            let tombstone = self
                .store
                .soft_delete_message(id, Utc::now())
                .await
                .map_err(named("message"))?;
            stage(OP, Stage::Persisted);

            let deleted = MessageWithAuthor {
                message: tombstone.redacted(),
                author: actor.snapshot(),
            };
            self.publish(OP, topic, EventKind::Delete, EventPayload::Message(deleted.clone()))
                .await;
            Ok(deleted)
        })
        .await
    }

    pub async fn channel_history(
        &self,
        actor: &Profile,
        id: ChannelId,
        query: HistoryQuery,
    ) -> Result<Vec<MessageWithAuthor>> {
        self.history("channel_history", actor, MessageScope::Channel(id), query)
            .await
    }

    pub async fn conversation_history(
        &self,
        actor: &Profile,
        id: ConversationId,
        query: HistoryQuery,
    ) -> Result<Vec<MessageWithAuthor>> {
        self.history("conversation_history", actor, MessageScope::Conversation(id), query)
            .await
    }

    async fn history(
        &self,
        op: &'static str,
        actor: &Profile,
        scope: MessageScope,
        query: HistoryQuery,
    ) -> Result<Vec<MessageWithAuthor>> {
        observe(op, async {
            let page = page(query)?;
            let target = self.scope_target(actor, scope).await?;
            self.authorize(op, &AuthContext::new(actor.id, target), Action::ReadTopic)?;
            let messages = self.store.list_messages(scope, page).await?;
            Ok(messages
                .into_iter()
                .map(|m| MessageWithAuthor {
                    message: m.message.redacted(),
                    author: m.author,
                })
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::bus::BusItem;
    use parley_shared::protocol::CreateServerRequest;
    use parley_shared::Topic;

    async fn general(gw: &Gateway, owner: &Profile) -> ChannelId {
        let detail = gw
            .create_server(
                owner,
                CreateServerRequest {
                    name: "Test".into(),
                    icon_url: None,
                },
            )
            .await
            .unwrap();
        detail.channels[0].id
    }

    fn text(channel: ChannelId, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            channel_id: Some(channel),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    #[test]
    fn send_validation() {
        let channel = ChannelId::new();
        assert!(Outgoing::parse(SendMessageRequest::default()).is_err());
        assert!(Outgoing::parse(SendMessageRequest {
            channel_id: Some(channel),
            conversation_id: Some(ConversationId::new()),
            content: Some("hi".into()),
            ..Default::default()
        })
        .is_err());
        assert!(Outgoing::parse(SendMessageRequest {
            channel_id: Some(channel),
            ..Default::default()
        })
        .is_err());
        assert!(Outgoing::parse(SendMessageRequest {
            channel_id: Some(channel),
            attachment_url: Some("https://files/x.png".into()),
            ..Default::default()
        })
        .is_err());

        let ok = Outgoing::parse(SendMessageRequest {
            channel_id: Some(channel),
            attachment_url: Some("https://files/x.png".into()),
            attachment_mime: Some("image/png".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(ok.content.is_none());
        assert_eq!(ok.attachment.unwrap().mime, "image/png");
    }

    #[test]
    fn history_limits() {
        assert_eq!(page(HistoryQuery::default()).unwrap().limit, DEFAULT_HISTORY_LIMIT);
        let big = HistoryQuery {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(page(big).unwrap().limit, MAX_HISTORY_LIMIT);
        let zero = HistoryQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert!(page(zero).is_err());
    }

    #[tokio::test]
    async fn send_publishes_denormalized_insert() {
        let gw = gateway();
        let owner = profile(&gw, "owner").await;
        let channel = general(&gw, &owner).await;
        let mut rx = gw.bus().subscribe(Topic::Channel(channel)).await;

        let sent = gw.send_message(&owner, text(channel, " hello ")).await.unwrap();
        assert_eq!(sent.message.content.as_deref(), Some("hello"));

        match rx.recv().await.unwrap() {
            BusItem::Event(e) => {
                assert_eq!(e.kind, EventKind::Insert);
                assert_eq!(e.seq, 1);
                match &e.payload {
                    EventPayload::Message(m) => {
                        assert_eq!(m.message.id, sent.message.id);
                        assert_eq!(m.author.username, "owner");
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_member_cannot_send() {
        let gw = gateway();
        let owner = profile(&gw, "owner").await;
        let stranger = profile(&gw, "stranger").await;
        let channel = general(&gw, &owner).await;
        assert!(matches!(
            gw.send_message(&stranger, text(channel, "hi")).await,
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn client_key_makes_send_idempotent() {
        let gw = gateway();
        let owner = profile(&gw, "owner").await;
        let channel = general(&gw, &owner).await;
        let mut rx = gw.bus().subscribe(Topic::Channel(channel)).await;

        let mut req = text(channel, "hello");
        req.client_key = Some("k-1".into());
        let first = gw.send_message(&owner, req.clone()).await.unwrap();
        let second = gw.send_message(&owner, req).await.unwrap();
        assert_eq!(first.message.id, second.message.id);
        assert_eq!(first.message.client_key.as_deref(), Some("k-1"));

        assert!(matches!(rx.recv().await, Some(BusItem::Event(_))));
        assert!(rx.try_recv().is_err());

        let history = gw
            .channel_history(&owner, channel, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn only_author_edits_and_deletes() {
        let gw = gateway();
        let owner = profile(&gw, "owner").await;
        let member = profile(&gw, "member").await;
        let channel = general(&gw, &owner).await;
        let server = gw.store().get_channel(channel).await.unwrap().server_id;
        gw.join_server(&member, server).await.unwrap();

        let sent = gw.send_message(&member, text(channel, "mine")).await.unwrap();
        let id = sent.message.id;

        // The server owner has no moderation override.
        assert!(matches!(
            gw.edit_message(&owner, id, "theirs").await,
            Err(GatewayError::Forbidden(_))
        ));
        assert!(matches!(
            gw.delete_message(&owner, id).await,
            Err(GatewayError::Forbidden(_))
        ));

        let edited = gw.edit_message(&member, id, "mine, edited").await.unwrap();
        assert!(edited.message.edited);

        let deleted = gw.delete_message(&member, id).await.unwrap();
        assert!(deleted.message.is_deleted());
        assert!(deleted.message.content.is_none());

        // Only the outgoing copy is blanked; the row keeps its body.
        let stored = gw.store().get_message(id).await.unwrap();
        assert!(stored.is_deleted());
        assert_eq!(stored.content.as_deref(), Some("mine, edited"));
        assert!(matches!(
            gw.edit_message(&member, id, "again").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            gw.delete_message(&member, id).await,
            Err(GatewayError::NotFound(_))
        ));

        let visible = gw
            .channel_history(&owner, channel, HistoryQuery::default())
            .await
            .unwrap();
        assert!(visible.is_empty());
        let with_tombstones = gw
            .channel_history(
                &owner,
                channel,
                HistoryQuery {
                    include_deleted: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(with_tombstones.len(), 1);
        assert!(with_tombstones[0].message.content.is_none());
    }
}
